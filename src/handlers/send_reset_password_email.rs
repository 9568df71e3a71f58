use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::utils::with_minimum_duration;
use super::{AuthHandlers, Operation};
use crate::email::{normalize_email, valid_email};
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct SendResetPasswordEmailRequest {
    pub email: String,
}

/// `EmailNotFound` is only for logs; callers see the same response as `Success`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendResetPasswordEmailOutcome {
    Success,
    BadRequest(String),
    EmailNotFound,
}

impl AuthHandlers {
    /// Email a password reset link if the account exists.
    ///
    /// # Errors
    /// Infrastructure failures (including email delivery) and `Error::Cancelled`.
    #[instrument(skip_all)]
    pub async fn send_reset_password_email(
        &self,
        request: SendResetPasswordEmailRequest,
        cancel: &CancellationToken,
    ) -> Result<SendResetPasswordEmailOutcome> {
        with_minimum_duration(
            Operation::SendResetPasswordEmail,
            self.minimum_duration(Operation::SendResetPasswordEmail),
            cancel,
            self.send_reset_email(request),
        )
        .await
    }

    async fn send_reset_email(
        &self,
        request: SendResetPasswordEmailRequest,
    ) -> Result<SendResetPasswordEmailOutcome> {
        let email = normalize_email(&request.email);
        if email.is_empty() || !valid_email(&email) {
            return Ok(SendResetPasswordEmailOutcome::BadRequest(
                "A valid email is required.".to_string(),
            ));
        }

        let Some(user) = self.user_by_email(&email).await? else {
            info!("password reset requested for unknown email");
            return Ok(SendResetPasswordEmailOutcome::EmailNotFound);
        };

        self.password_reset.create_and_send(&user).await?;
        debug!(user_id = %user.id, "password reset link issued");
        Ok(SendResetPasswordEmailOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::TEMPLATE_RESET_PASSWORD;
    use crate::handlers::testing::handlers;

    #[tokio::test]
    async fn existing_account_gets_a_reset_link() {
        let (fixture, handlers) = handlers();
        fixture.user("a@example.com", "longenough", true).await;
        let cancel = CancellationToken::new();

        let outcome = handlers
            .send_reset_password_email(
                SendResetPasswordEmailRequest {
                    email: "a@example.com".to_string(),
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(outcome, SendResetPasswordEmailOutcome::Success);
        let sent = fixture.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, TEMPLATE_RESET_PASSWORD);
    }

    #[tokio::test]
    async fn unknown_account_sends_nothing() {
        let (fixture, handlers) = handlers();

        let outcome = handlers
            .send_reset_password_email(
                SendResetPasswordEmailRequest {
                    email: "ghost@example.com".to_string(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, SendResetPasswordEmailOutcome::EmailNotFound);
        assert!(fixture.sender.sent().is_empty());
    }
}
