//! Outbound email: message building and the delivery abstraction.
//!
//! The core never talks SMTP. Flows hand a raw link token to the [`Mailer`], which
//! renders the verification or reset message and passes it to an [`EmailSender`].
//! Delivery failures propagate to the caller; nothing is retried here.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and returns `Ok(())`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::redact::redact_token;

const MAX_EMAIL_LENGTH: usize = 254;

static EMAIL_REGEX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

pub const TEMPLATE_VERIFY_EMAIL: &str = "verify_email";
pub const TEMPLATE_RESET_PASSWORD: &str = "reset_password";

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Email format check on already-normalized input.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    if email.trim().is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return false;
    }
    EMAIL_REGEX
        .as_ref()
        .is_some_and(|regex| regex.is_match(email))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: &'static str,
    pub subject: String,
    pub html_body: String,
    /// Link embedded in the body, kept separately for logging and tests.
    pub link: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error for the caller to surface.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            subject = %message.subject,
            link = %message.link,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MailerConfig {
    frontend_base_url: String,
    app_name: String,
}

impl MailerConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, app_name: String) -> Self {
        Self {
            frontend_base_url,
            app_name,
        }
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }
}

/// Renders link emails and hands them to the configured sender.
#[derive(Clone)]
pub struct Mailer {
    config: MailerConfig,
    sender: Arc<dyn EmailSender>,
}

impl Mailer {
    #[must_use]
    pub fn new(config: MailerConfig, sender: Arc<dyn EmailSender>) -> Self {
        Self { config, sender }
    }

    /// # Errors
    /// Returns an error if the link can't be built or delivery fails.
    pub async fn send_verification_email(
        &self,
        to_email: &str,
        token: &str,
        expires_in_hours: i64,
    ) -> Result<()> {
        let link = build_link(&self.config.frontend_base_url, "verify-email", token, to_email)?;
        let app = &self.config.app_name;
        let html_body = format!(
            "<h2>Welcome to {app}!</h2>\
             <p>Please verify your email address to complete your registration.</p>\
             <p><a href=\"{link}\">Verify Email Address</a></p>\
             <p>This link will expire in {expires_in_hours} hours.</p>\
             <p>If you didn't create an account with us, please ignore this email.</p>"
        );
        let message = EmailMessage {
            to_email: to_email.to_string(),
            template: TEMPLATE_VERIFY_EMAIL,
            subject: format!("Verify your {app} account"),
            html_body,
            link,
        };
        self.deliver(&message, token).await
    }

    /// # Errors
    /// Returns an error if the link can't be built or delivery fails.
    pub async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
        expires_in_hours: i64,
    ) -> Result<()> {
        let link = build_link(&self.config.frontend_base_url, "reset-password", token, to_email)?;
        let app = &self.config.app_name;
        let html_body = format!(
            "<h2>Password Reset Request</h2>\
             <p>We received a request to reset your password for your {app} account.</p>\
             <p><a href=\"{link}\">Reset Password</a></p>\
             <p>This link will expire in {expires_in_hours} hours.</p>\
             <p>If you didn't request a password reset, please ignore this email. \
             Your password won't be changed.</p>"
        );
        let message = EmailMessage {
            to_email: to_email.to_string(),
            template: TEMPLATE_RESET_PASSWORD,
            subject: format!("Reset your {app} password"),
            html_body,
            link,
        };
        self.deliver(&message, token).await
    }

    async fn deliver(&self, message: &EmailMessage, token: &str) -> Result<()> {
        self.sender.send(message).await.with_context(|| {
            format!(
                "failed to send {} email for token {}",
                message.template,
                redact_token(token)
            )
        })
    }
}

/// Build the frontend link included in outbound emails.
fn build_link(frontend_base_url: &str, path: &str, token: &str, email: &str) -> Result<String> {
    let base = frontend_base_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/{path}"))
        .with_context(|| format!("invalid frontend base URL: {frontend_base_url}"))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("email", email);
    Ok(url.to_string())
}
