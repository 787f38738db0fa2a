//! Authentication substrate shared by the HTTP surface and trusted workers.
//!
//! Registration hashes passwords with Argon2id; login mints an HS256 bearer
//! token carrying the user id, issue time, and expiry. Trusted workers hold
//! a `service` credential signed with the same secret that may act on behalf
//! of the user id carried in the call.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{NewUser, ProfileChanges, User},
    repository::UserRepository,
    validation::Validator,
};

/// Subject claim used by service credentials
const SERVICE_SUBJECT: &str = "service";

/// Role carried inside a bearer credential
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Service,
}

/// Signed claim set of a bearer credential
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id for user tokens, a fixed marker for service tokens
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated identity attached to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    /// An end user; may act only on their own state
    User(Uuid),
    /// A trusted worker; acts on behalf of the user id carried in the call
    Service,
}

impl Principal {
    /// Resolve the owner a call operates on.
    ///
    /// User principals ignore an absent `acting` and reject a mismatched
    /// one; service principals require it.
    pub fn owner_for(&self, acting: Option<Uuid>) -> Result<Uuid> {
        match (self, acting) {
            (Principal::User(id), None) => Ok(*id),
            (Principal::User(id), Some(requested)) if requested == *id => Ok(*id),
            (Principal::User(_), Some(_)) => Err(CoreError::Unauthorized(
                "credential does not permit acting for another user".to_string(),
            )),
            (Principal::Service, Some(requested)) => Ok(requested),
            (Principal::Service, None) => Err(CoreError::Validation(
                "service calls must name the user they act for".to_string(),
            )),
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Principal::Service)
    }
}

/// Mints and verifies bearer credentials with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self { secret: secret.into(), ttl }
    }

    /// Mint a user credential
    pub fn issue_user(&self, user_id: Uuid) -> Result<String> {
        self.issue(user_id.to_string(), Role::User)
    }

    /// Mint a service credential for trusted workers
    pub fn issue_service(&self) -> Result<String> {
        self.issue(SERVICE_SUBJECT.to_string(), Role::Service)
    }

    fn issue(&self, sub: String, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub,
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| CoreError::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify a presented credential and derive its principal.
    ///
    /// Expired, malformed, or mis-signed tokens all collapse to the same
    /// uniform error.
    pub fn verify(&self, token: &str) -> Result<Principal> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| CoreError::invalid_credentials())?;

        match data.claims.role {
            Role::Service => Ok(Principal::Service),
            Role::User => {
                let id = Uuid::parse_str(&data.claims.sub)
                    .map_err(|_| CoreError::invalid_credentials())?;
                Ok(Principal::User(id))
            }
        }
    }
}

/// Argon2id cost parameters; the default is calibrated so one verify takes
/// on the order of 100 ms on reference hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self { memory_kib: 19_456, iterations: 2, parallelism: 1 }
    }
}

impl KdfConfig {
    /// Cheap parameters for tests; never use outside of them
    pub fn insecure_for_tests() -> Self {
        Self { memory_kib: 8, iterations: 1, parallelism: 1 }
    }

    fn params(&self) -> Result<Params> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| CoreError::Configuration(format!("invalid KDF parameters: {e}")))
    }
}

/// Hash a password into a PHC string with the configured cost.
pub fn hash_password(password: &str, kdf: &KdfConfig) -> Result<String> {
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, kdf.params()?);
    let salt = SaltString::generate(&mut OsRng);
    argon
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a password against a stored PHC string. The hash encodes its own
/// parameters, so cost changes only affect newly stored hashes.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Registration, login, and profile operations over the user store.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: TokenCodec,
    kdf: KdfConfig,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, tokens: TokenCodec, kdf: KdfConfig) -> Self {
        Self { users, tokens, kdf }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    /// Register a new user. Email uniqueness is case-insensitive and also
    /// enforced by the store's unique index.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<User> {
        Validator::validate_email(email)?;
        Validator::validate_password(password)?;
        Validator::validate_display_name(display_name)?;

        if self.users.get_user_by_email(email).await?.is_some() {
            return Err(CoreError::Conflict("email already registered".to_string()));
        }

        let user = self
            .users
            .create_user(NewUser {
                email: email.trim().to_string(),
                password_hash: hash_password(password, &self.kdf)?,
                display_name: display_name.trim().to_string(),
                avatar_url: None,
            })
            .await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Verify credentials and mint a bearer token. Unknown email and wrong
    /// password return the same error.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let user = self
            .users
            .get_user_by_email(email)
            .await?
            .ok_or_else(CoreError::invalid_credentials)?;

        if !verify_password(password, &user.password_hash) {
            return Err(CoreError::invalid_credentials());
        }

        let token = self.tokens.issue_user(user.id)?;
        tracing::info!(user_id = %user.id, "User logged in");
        Ok((user, token))
    }

    /// Fetch the authenticated user's own record
    pub async fn me(&self, user_id: Uuid) -> Result<User> {
        self.users
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(CoreError::invalid_credentials)
    }

    /// Update profile fields; an email change re-validates global
    /// case-insensitive uniqueness.
    pub async fn update_profile(&self, user_id: Uuid, changes: ProfileChanges) -> Result<User> {
        if let Some(email) = &changes.email {
            Validator::validate_email(email)?;
            if let Some(existing) = self.users.get_user_by_email(email).await? {
                if existing.id != user_id {
                    return Err(CoreError::Conflict("email already registered".to_string()));
                }
            }
        }
        if let Some(name) = &changes.display_name {
            Validator::validate_display_name(name)?;
        }

        self.users
            .update_profile(user_id, changes)
            .await?
            .ok_or_else(CoreError::invalid_credentials)
    }
}
