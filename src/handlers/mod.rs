//! User-facing operations.
//!
//! Each handler validates its request, composes the credential and token services,
//! and returns a typed outcome. Expected branches (unknown user, wrong password,
//! expired link) are outcome variants; only infrastructure failures and cancellation
//! come back as [`crate::Error`].
//!
//! Every handler runs under [`utils::with_minimum_duration`], so the visible response
//! time does not reveal which branch was taken.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::crypto::{AccessTokenIssuer, PasswordHasher};
use crate::model::User;
use crate::services::{EmailVerificationService, PasswordResetService, RefreshTokenService};
use crate::store::Store;
use crate::Result;

pub mod login;
pub mod logout;
pub mod refresh;
pub mod register;
pub mod reset_password;
pub mod resend_verification;
pub mod send_reset_password_email;
pub mod utils;
pub mod verify_email;

pub use login::{LoginOutcome, LoginRequest};
pub use logout::{LogoutOutcome, LogoutRequest};
pub use refresh::{RefreshOutcome, RefreshRequest};
pub use register::{RegisterOutcome, RegisterRequest};
pub use reset_password::{ResetPasswordOutcome, ResetPasswordRequest};
pub use resend_verification::{ResendVerificationOutcome, ResendVerificationRequest};
pub use send_reset_password_email::{SendResetPasswordEmailOutcome, SendResetPasswordEmailRequest};
pub use verify_email::{VerifyEmailOutcome, VerifyEmailRequest};

pub const DEFAULT_MINIMUM_PASSWORD_LENGTH: usize = 8;
pub const DEFAULT_MINIMUM_DURATION: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Login,
    Refresh,
    Logout,
    VerifyEmail,
    ResendVerification,
    SendResetPasswordEmail,
    ResetPassword,
}

impl Operation {
    pub const ALL: [Self; 8] = [
        Self::Register,
        Self::Login,
        Self::Refresh,
        Self::Logout,
        Self::VerifyEmail,
        Self::ResendVerification,
        Self::SendResetPasswordEmail,
        Self::ResetPassword,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Refresh => "refresh",
            Self::Logout => "logout",
            Self::VerifyEmail => "verify-email",
            Self::ResendVerification => "resend-verification",
            Self::SendResetPasswordEmail => "send-reset-password-email",
            Self::ResetPassword => "reset-password",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct HandlerSettings {
    minimum_password_length: usize,
    default_minimum_duration: Duration,
    minimum_durations: HashMap<Operation, Duration>,
}

impl HandlerSettings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            minimum_password_length: DEFAULT_MINIMUM_PASSWORD_LENGTH,
            default_minimum_duration: DEFAULT_MINIMUM_DURATION,
            minimum_durations: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_minimum_password_length(mut self, length: usize) -> Self {
        self.minimum_password_length = length;
        self
    }

    /// Floor for every operation without its own override.
    #[must_use]
    pub fn with_default_minimum_duration(mut self, duration: Duration) -> Self {
        self.default_minimum_duration = duration;
        self
    }

    #[must_use]
    pub fn with_minimum_duration(mut self, operation: Operation, duration: Duration) -> Self {
        self.minimum_durations.insert(operation, duration);
        self
    }

    #[must_use]
    pub fn minimum_password_length(&self) -> usize {
        self.minimum_password_length
    }

    #[must_use]
    pub fn minimum_duration(&self, operation: Operation) -> Duration {
        self.minimum_durations
            .get(&operation)
            .copied()
            .unwrap_or(self.default_minimum_duration)
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the handlers delegate to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub access_tokens: Arc<dyn AccessTokenIssuer>,
    pub refresh_tokens: RefreshTokenService,
    pub email_verification: EmailVerificationService,
    pub password_reset: PasswordResetService,
}

#[derive(Clone)]
pub struct AuthHandlers {
    settings: HandlerSettings,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PasswordHasher>,
    access_tokens: Arc<dyn AccessTokenIssuer>,
    refresh_tokens: RefreshTokenService,
    email_verification: EmailVerificationService,
    password_reset: PasswordResetService,
}

impl AuthHandlers {
    #[must_use]
    pub fn new(settings: HandlerSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            clock,
            hasher,
            access_tokens,
            refresh_tokens,
            email_verification,
            password_reset,
        } = collaborators;
        Self {
            settings,
            store,
            clock,
            hasher,
            access_tokens,
            refresh_tokens,
            email_verification,
            password_reset,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    fn minimum_duration(&self, operation: Operation) -> Duration {
        self.settings.minimum_duration(operation)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut tx = self.store.begin().await?;
        let user = tx.user_by_email(email).await?;
        tx.rollback().await?;
        Ok(user)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_duration_falls_back_to_default() {
        let settings = HandlerSettings::new()
            .with_default_minimum_duration(Duration::from_millis(300))
            .with_minimum_duration(Operation::Login, Duration::from_secs(1));

        assert_eq!(settings.minimum_duration(Operation::Login), Duration::from_secs(1));
        assert_eq!(
            settings.minimum_duration(Operation::Register),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn operation_names_are_unique() {
        let mut names: Vec<_> = Operation::ALL.iter().map(|op| op.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Operation::ALL.len());
    }
}
