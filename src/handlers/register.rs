use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::utils::with_minimum_duration;
use super::{AuthHandlers, Operation};
use crate::clock::Clock;
use crate::crypto::PasswordHasher;
use crate::email::{normalize_email, valid_email};
use crate::model::User;
use crate::store::{InsertOutcome, Store};
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Success,
    BadRequest(String),
    EmailAlreadyExists,
    /// A fresh verification email went out instead of creating a duplicate.
    EmailExistsButEmailNotVerified,
}

impl AuthHandlers {
    /// Create an unverified account and send its verification email.
    ///
    /// # Errors
    /// Infrastructure failures and `Error::Cancelled`.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        request: RegisterRequest,
        cancel: &CancellationToken,
    ) -> Result<RegisterOutcome> {
        with_minimum_duration(
            Operation::Register,
            self.minimum_duration(Operation::Register),
            cancel,
            self.register_user(request),
        )
        .await
    }

    async fn register_user(&self, request: RegisterRequest) -> Result<RegisterOutcome> {
        let email = normalize_email(&request.email);
        if let Some(message) = self.validate_registration(&email, &request.password) {
            info!(reason = %message, "registration rejected");
            return Ok(RegisterOutcome::BadRequest(message));
        }

        if let Some(existing) = self.user_by_email(&email).await? {
            if existing.email_verified {
                debug!(user_id = %existing.id, "registration for a verified email");
                return Ok(RegisterOutcome::EmailAlreadyExists);
            }
            self.email_verification.create_and_send(&existing).await?;
            debug!(user_id = %existing.id, "resent verification to an unverified account");
            return Ok(RegisterOutcome::EmailExistsButEmailNotVerified);
        }

        let hashed = self.hasher.hash_password(&request.password).await?;
        let now = self.clock.now();
        let user = User {
            id: Uuid::now_v7(),
            email,
            username: request.username.unwrap_or_default().trim().to_string(),
            password_hash: hashed.hash,
            password_salt: hashed.salt,
            email_verified: false,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        if tx.insert_user(&user).await? == InsertOutcome::Conflict {
            // Lost a race with a concurrent registration of the same email.
            tx.rollback().await?;
            info!("registration raced with an existing account");
            return Ok(RegisterOutcome::EmailAlreadyExists);
        }
        tx.commit().await?;
        debug!(user_id = %user.id, "user created");

        self.email_verification.create_and_send(&user).await?;
        Ok(RegisterOutcome::Success)
    }

    fn validate_registration(&self, email: &str, password: &str) -> Option<String> {
        if email.is_empty() {
            return Some("Email is required.".to_string());
        }
        if password.trim().is_empty() {
            return Some("Password is required.".to_string());
        }
        if !valid_email(email) {
            return Some("Email is not valid.".to_string());
        }
        let minimum = self.settings.minimum_password_length();
        if password.chars().count() < minimum {
            return Some(format!(
                "Password must be at least {minimum} characters long."
            ));
        }
        None
    }
}
