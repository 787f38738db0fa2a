use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error kinds of the task management core.
///
/// Each variant maps onto one of the platform's error categories and carries
/// a caller-safe message; upstream detail is logged, never echoed. The
/// variants also map to HTTP status codes at the transport edge.
///
/// # Examples
///
/// ```rust
/// use task_core::error::CoreError;
///
/// let err = CoreError::task_not_found();
/// assert!(err.is_not_found());
/// assert_eq!(err.status_code(), 404);
///
/// let err = CoreError::Transient("bus unavailable".to_string());
/// assert!(err.is_transient());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Rejected input: bounds, enums, missing required fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Target does not exist or is not owned by the principal; the two cases
    /// are indistinguishable to the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-conflict or uniqueness violation after retry exhaustion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store operation failure, retryable
    #[error("Database error: {0}")]
    Database(String),

    /// Retryable failure from the bus, LLM, or email upstream
    #[error("Transient upstream error: {0}")]
    Transient(String),

    /// Non-retryable upstream rejection
    #[error("Permanent upstream error: {0}")]
    Permanent(String),

    /// Deadline reached before the operation completed
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Configuration error, surfaced at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Uniform not-found for tasks; deliberately does not say whether the
    /// task exists under another owner
    pub fn task_not_found() -> Self {
        Self::NotFound("task not found".to_string())
    }

    pub fn conversation_not_found() -> Self {
        Self::NotFound("conversation not found".to_string())
    }

    pub fn tag_not_found() -> Self {
        Self::NotFound("tag not found".to_string())
    }

    /// Uniform credential failure; no hint about which field failed
    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("invalid credentials".to_string())
    }

    /// Create a validation error for an empty required field
    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("Field '{field}' cannot be empty"))
    }

    /// Create a validation error for a field exceeding its length bound
    pub fn too_long(field: &str, max: usize) -> Self {
        Self::Validation(format!("Field '{field}' exceeds {max} characters"))
    }

    /// Check if this error indicates a not found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }

    /// Check if this error indicates a validation problem
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }

    /// Check if this error indicates a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }

    /// Whether an event handler should return the event to the bus for
    /// redelivery instead of acknowledging it
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Database(_) | CoreError::Transient(_) | CoreError::DeadlineExceeded(_)
        )
    }

    /// Convert to the HTTP status code used at the transport edge
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::Unauthorized(_) => 401,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 409,
            CoreError::Database(_) => 500,
            CoreError::Transient(_) => 502,
            CoreError::Permanent(_) => 502,
            CoreError::DeadlineExceeded(_) => 504,
            CoreError::Configuration(_) => 500,
            CoreError::Internal(_) => 500,
        }
    }
}
