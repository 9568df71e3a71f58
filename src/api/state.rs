use anyhow::{Context, Result};
use std::sync::Arc;

use crate::clock::Clock;
use crate::crypto::{
    Argon2PasswordHasher, JwtIssuer, JwtSettings, PasswordHasher, PasswordSettings,
    VerificationTokenService, VerificationTokenSettings, VerificationTokens,
};
use crate::email::{EmailSender, Mailer, MailerConfig};
use crate::handlers::{AuthHandlers, Collaborators, HandlerSettings};
use crate::random::SecureRandom;
use crate::services::{
    EmailVerificationService, EmailVerificationSettings, PasswordResetService,
    PasswordResetSettings, RefreshTokenService, RefreshTokenSettings,
};
use crate::store::Store;

/// Every tunable the server is built from.
#[derive(Clone, Debug)]
pub struct AppSettings {
    pub password: PasswordSettings,
    pub verification: VerificationTokenSettings,
    pub jwt: JwtSettings,
    pub refresh_tokens: RefreshTokenSettings,
    pub email_verification: EmailVerificationSettings,
    pub password_reset: PasswordResetSettings,
    pub handlers: HandlerSettings,
    pub mailer: MailerConfig,
}

/// What the routes need at request time.
#[derive(Clone)]
pub struct AppState {
    pub handlers: AuthHandlers,
    /// Decodes bearer tokens on `/refresh` and `/logout`.
    pub access_tokens: Arc<JwtIssuer>,
    pub store: Arc<dyn Store>,
}

impl AppState {
    /// Wire the services and handlers over the given capabilities.
    ///
    /// # Errors
    /// Returns an error if the password hashing parameters are rejected.
    pub fn new(
        settings: &AppSettings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn SecureRandom>,
        sender: Arc<dyn EmailSender>,
    ) -> Result<Self> {
        let hasher: Arc<dyn PasswordHasher> = Arc::new(
            Argon2PasswordHasher::new(settings.password.clone(), random.clone())
                .context("Failed to configure password hashing")?,
        );
        let tokens: Arc<dyn VerificationTokens> = Arc::new(VerificationTokenService::new(
            settings.verification.clone(),
            random.clone(),
        ));
        let access_tokens = Arc::new(JwtIssuer::new(settings.jwt.clone(), clock.clone()));
        let mailer = Mailer::new(settings.mailer.clone(), sender);

        let refresh_tokens = RefreshTokenService::new(
            settings.refresh_tokens.clone(),
            store.clone(),
            clock.clone(),
            random,
        );
        let email_verification = EmailVerificationService::new(
            &settings.email_verification,
            store.clone(),
            clock.clone(),
            tokens.clone(),
            mailer.clone(),
        );
        let password_reset = PasswordResetService::new(
            &settings.password_reset,
            store.clone(),
            clock.clone(),
            tokens,
            hasher.clone(),
            refresh_tokens.clone(),
            mailer,
        );

        let handlers = AuthHandlers::new(
            settings.handlers.clone(),
            Collaborators {
                store: store.clone(),
                clock,
                hasher,
                access_tokens: access_tokens.clone(),
                refresh_tokens,
                email_verification,
                password_reset,
            },
        );

        Ok(Self {
            handlers,
            access_tokens,
            store,
        })
    }
}
