use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::utils::{redact_token, with_minimum_duration};
use super::{AuthHandlers, Operation};
use crate::model::ApiToken;
use crate::services::VerifyEmailStatus;
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyEmailOutcome {
    /// The account is verified and signed in.
    Success {
        access_token: ApiToken,
        refresh_token: ApiToken,
    },
    BadRequest(String),
    LinkNotFound,
    LinkExpired,
    LinkInvalid,
}

impl AuthHandlers {
    /// Consume an email verification link and sign the user in.
    ///
    /// # Errors
    /// Infrastructure failures and `Error::Cancelled`.
    #[instrument(skip_all)]
    pub async fn verify_email(
        &self,
        request: VerifyEmailRequest,
        cancel: &CancellationToken,
    ) -> Result<VerifyEmailOutcome> {
        with_minimum_duration(
            Operation::VerifyEmail,
            self.minimum_duration(Operation::VerifyEmail),
            cancel,
            self.verify_email_token(request),
        )
        .await
    }

    async fn verify_email_token(&self, request: VerifyEmailRequest) -> Result<VerifyEmailOutcome> {
        let raw = request.token.trim();
        if raw.is_empty() {
            info!("verification rejected: empty token");
            return Ok(VerifyEmailOutcome::BadRequest(
                "Verification token is required.".to_string(),
            ));
        }

        let status = self.email_verification.verify_email(raw).await?;

        let token = redact_token(raw);
        let user = match status {
            VerifyEmailStatus::Verified(user) => user,
            VerifyEmailStatus::LinkNotFound => {
                info!(%token, "verification link not found");
                return Ok(VerifyEmailOutcome::LinkNotFound);
            }
            VerifyEmailStatus::LinkExpired => {
                info!(%token, "verification link expired");
                return Ok(VerifyEmailOutcome::LinkExpired);
            }
            VerifyEmailStatus::LinkInvalid => return Ok(VerifyEmailOutcome::LinkInvalid),
        };

        let access_token = self.access_tokens.generate_token(user.id, &user.email)?;
        let refresh_token = self
            .refresh_tokens
            .generate_refresh_token(&user, None, true)
            .await?;

        Ok(VerifyEmailOutcome::Success {
            access_token,
            refresh_token,
        })
    }
}
