use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::utils::{redact_token, with_minimum_duration};
use super::{AuthHandlers, Operation};
use crate::services::ResetPasswordStatus;
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetPasswordOutcome {
    Success,
    BadRequest(String),
    LinkNotFound,
    LinkExpired,
    LinkInvalid,
}

impl From<ResetPasswordStatus> for ResetPasswordOutcome {
    fn from(status: ResetPasswordStatus) -> Self {
        match status {
            ResetPasswordStatus::Success => Self::Success,
            ResetPasswordStatus::LinkNotFound => Self::LinkNotFound,
            ResetPasswordStatus::LinkExpired => Self::LinkExpired,
            ResetPasswordStatus::LinkInvalid => Self::LinkInvalid,
        }
    }
}

impl AuthHandlers {
    /// Consume a reset link and set a new password, signing out every session.
    ///
    /// # Errors
    /// Infrastructure failures and `Error::Cancelled`.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        request: ResetPasswordRequest,
        cancel: &CancellationToken,
    ) -> Result<ResetPasswordOutcome> {
        with_minimum_duration(
            Operation::ResetPassword,
            self.minimum_duration(Operation::ResetPassword),
            cancel,
            self.reset_user_password(request),
        )
        .await
    }

    async fn reset_user_password(&self, request: ResetPasswordRequest) -> Result<ResetPasswordOutcome> {
        let raw = request.token.trim();
        if raw.is_empty() {
            return Ok(ResetPasswordOutcome::BadRequest(
                "Reset token is required.".to_string(),
            ));
        }
        if request.password.trim().is_empty() {
            return Ok(ResetPasswordOutcome::BadRequest(
                "Password is required.".to_string(),
            ));
        }
        let minimum = self.settings.minimum_password_length();
        if request.password.chars().count() < minimum {
            return Ok(ResetPasswordOutcome::BadRequest(format!(
                "Password must be at least {minimum} characters long."
            )));
        }

        let status = self
            .password_reset
            .reset_password(raw, &request.password)
            .await?;

        info!(token = %redact_token(raw), ?status, "password reset attempt");
        Ok(status.into())
    }
}
