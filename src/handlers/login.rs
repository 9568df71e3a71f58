use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::utils::{redact_token, with_minimum_duration};
use super::{AuthHandlers, Operation};
use crate::crypto::PasswordHasher;
use crate::email::normalize_email;
use crate::model::ApiToken;
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Success {
        access_token: ApiToken,
        refresh_token: ApiToken,
    },
    BadRequest(String),
    UsernameNotFound,
    InvalidPassword,
    /// A fresh verification email was sent; no tokens were issued.
    EmailNotVerified,
    ServerError,
}

impl AuthHandlers {
    /// Authenticate with email and password.
    ///
    /// # Errors
    /// Infrastructure failures (including malformed stored credentials) and
    /// `Error::Cancelled`.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        request: LoginRequest,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome> {
        with_minimum_duration(
            Operation::Login,
            self.minimum_duration(Operation::Login),
            cancel,
            self.login_user(request),
        )
        .await
    }

    async fn login_user(&self, request: LoginRequest) -> Result<LoginOutcome> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.trim().is_empty() {
            info!("login rejected: empty email or password");
            return Ok(LoginOutcome::BadRequest(
                "email and password are required".to_string(),
            ));
        }

        let Some(user) = self.user_by_email(&email).await? else {
            info!("login for unknown email");
            return Ok(LoginOutcome::UsernameNotFound);
        };

        if !self
            .hasher
            .verify(&request.password, &user.password_salt, &user.password_hash)
            .await?
        {
            info!(user_id = %user.id, "login with invalid password");
            return Ok(LoginOutcome::InvalidPassword);
        }

        if !user.email_verified {
            self.email_verification.create_and_send(&user).await?;
            debug!(user_id = %user.id, "login before verification, link resent");
            return Ok(LoginOutcome::EmailNotVerified);
        }

        let access_token = self.access_tokens.generate_token(user.id, &user.email)?;
        let refresh_token = self
            .refresh_tokens
            .generate_refresh_token(&user, None, true)
            .await?;

        if access_token.token.trim().is_empty() || refresh_token.token.trim().is_empty() {
            error!(
                user_id = %user.id,
                access_token = %redact_token(&access_token.token),
                refresh_token = %redact_token(&refresh_token.token),
                "token generation returned an empty token"
            );
            return Ok(LoginOutcome::ServerError);
        }

        debug!(user_id = %user.id, "login succeeded");
        Ok(LoginOutcome::Success {
            access_token,
            refresh_token,
        })
    }
}
