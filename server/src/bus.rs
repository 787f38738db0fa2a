use async_trait::async_trait;
use task_core::{
    error::{CoreError, Result},
    events::{EventBus, EventEnvelope},
};

/// Event bus reached through the pub/sub sidecar's HTTP publish endpoint.
///
/// The sidecar owns broker connectivity and delivery; this client only
/// frames one envelope per request. Failures are surfaced as transient so
/// callers (the outbox publisher, the scheduler) retry on their own cadence.
pub struct HttpEventBus {
    http: reqwest::Client,
    sidecar_url: String,
}

impl HttpEventBus {
    pub fn new(sidecar_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Configuration(format!("event bus client: {e}")))?;
        Ok(Self {
            http,
            sidecar_url: sidecar_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EventBus for HttpEventBus {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<()> {
        let url = format!("{}/publish/{topic}", self.sidecar_url);
        let response = self
            .http
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| CoreError::Transient(format!("sidecar unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(topic, event_id = %event.event_id, "Event published");
            return Ok(());
        }
        if status.is_client_error() {
            return Err(CoreError::Permanent(format!(
                "sidecar rejected publish to '{topic}': {status}"
            )));
        }
        Err(CoreError::Transient(format!(
            "sidecar publish to '{topic}' failed: {status}"
        )))
    }
}
