use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::utils::with_minimum_duration;
use super::{AuthHandlers, Operation};
use crate::email::{normalize_email, valid_email};
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

/// Only `BadRequest` is visible to callers; the rest collapse to the same response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResendVerificationOutcome {
    Success,
    BadRequest(String),
    EmailNotFound,
    EmailAlreadyVerified,
}

impl AuthHandlers {
    /// Send a new verification link to an unverified account.
    ///
    /// # Errors
    /// Infrastructure failures (including email delivery) and `Error::Cancelled`.
    #[instrument(skip_all)]
    pub async fn resend_verification(
        &self,
        request: ResendVerificationRequest,
        cancel: &CancellationToken,
    ) -> Result<ResendVerificationOutcome> {
        with_minimum_duration(
            Operation::ResendVerification,
            self.minimum_duration(Operation::ResendVerification),
            cancel,
            self.resend_verification_email(request),
        )
        .await
    }

    async fn resend_verification_email(
        &self,
        request: ResendVerificationRequest,
    ) -> Result<ResendVerificationOutcome> {
        let email = normalize_email(&request.email);
        if email.is_empty() {
            return Ok(ResendVerificationOutcome::BadRequest(
                "Email is required.".to_string(),
            ));
        }
        if !valid_email(&email) {
            return Ok(ResendVerificationOutcome::BadRequest(
                "Email is not valid.".to_string(),
            ));
        }

        let Some(user) = self.user_by_email(&email).await? else {
            info!("verification resend for unknown email");
            return Ok(ResendVerificationOutcome::EmailNotFound);
        };
        if user.email_verified {
            debug!(user_id = %user.id, "verification resend for a verified account");
            return Ok(ResendVerificationOutcome::EmailAlreadyVerified);
        }

        self.email_verification.create_and_send(&user).await?;
        Ok(ResendVerificationOutcome::Success)
    }
}
