#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use latchkey::api::{AppSettings, AppState};
use latchkey::clock::ManualClock;
use latchkey::crypto::{JwtSettings, PasswordSettings, VerificationTokenSettings};
use latchkey::email::{EmailMessage, EmailSender, MailerConfig};
use latchkey::handlers::{AuthHandlers, HandlerSettings};
use latchkey::model::{RefreshToken, User, VerificationKind, VerificationRecord};
use latchkey::random::OsRandom;
use latchkey::services::{
    EmailVerificationSettings, PasswordResetSettings, RefreshTokenSettings,
};
use latchkey::store::{MemoryStore, Store};
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery";

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Raw token from the link of the last message sent to `email`.
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let message = sent.iter().rev().find(|message| message.to_email == email)?;
        let link = Url::parse(&message.link).ok()?;
        link.query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub fn settings(minimum_duration: Duration) -> AppSettings {
    AppSettings {
        password: PasswordSettings::new()
            .with_iterations(1)
            .with_memory_kb(64),
        verification: VerificationTokenSettings::new(SecretString::from(
            "integration-verification-key",
        )),
        jwt: JwtSettings::new(
            SecretString::from("integration-signing-key-0123456789abcdef"),
            "latchkey".to_string(),
            "latchkey-clients".to_string(),
        ),
        refresh_tokens: RefreshTokenSettings::new(),
        email_verification: EmailVerificationSettings::default(),
        password_reset: PasswordResetSettings::default(),
        handlers: HandlerSettings::new().with_default_minimum_duration(minimum_duration),
        mailer: MailerConfig::new("https://app.test".to_string(), "Latchkey".to_string()),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<RecordingSender>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_minimum_duration(Duration::ZERO)
    }

    pub fn with_minimum_duration(minimum_duration: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let sender = Arc::new(RecordingSender::default());
        let state = AppState::new(
            &settings(minimum_duration),
            store.clone(),
            clock.clone(),
            Arc::new(OsRandom),
            sender.clone(),
        )
        .unwrap();

        Self {
            store,
            clock,
            sender,
            state,
        }
    }

    pub fn handlers(&self) -> &AuthHandlers {
        &self.state.handlers
    }

    pub async fn user(&self, email: &str) -> Result<Option<User>> {
        let mut tx = self.store.begin().await?;
        let user = tx.user_by_email(email).await?;
        tx.rollback().await?;
        Ok(user)
    }

    pub async fn refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let mut tx = self.store.begin().await?;
        let tokens = tx.refresh_tokens_for_user(user_id).await?;
        tx.rollback().await?;
        Ok(tokens)
    }

    pub async fn verifications(
        &self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<Vec<VerificationRecord>> {
        let mut tx = self.store.begin().await?;
        let records = tx.verifications_for_user(kind, user_id).await?;
        tx.rollback().await?;
        Ok(records)
    }
}
