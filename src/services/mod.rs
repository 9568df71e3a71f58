//! Token lifecycle services: refresh tokens, email verification and password reset.
//!
//! Each service owns its settings and shares the store, clock and crypto
//! capabilities through `Arc`s, so cloning one is cheap.

mod links;

pub mod email_verification;
pub mod password_reset;
pub mod refresh_token;

pub use email_verification::{EmailVerificationService, EmailVerificationSettings, VerifyEmailStatus};
pub use password_reset::{PasswordResetService, PasswordResetSettings, ResetPasswordStatus};
pub use refresh_token::{RefreshTokenService, RefreshTokenSettings};

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    use crate::clock::{Clock, ManualClock};
    use crate::crypto::{
        Argon2PasswordHasher, PasswordHasher, PasswordSettings, VerificationTokenService,
        VerificationTokenSettings, VerificationTokens,
    };
    use crate::email::{EmailMessage, EmailSender, Mailer, MailerConfig};
    use crate::model::User;
    use crate::random::OsRandom;
    use crate::store::{MemoryStore, Store};

    #[derive(Default)]
    pub(crate) struct RecordingSender {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    impl RecordingSender {
        pub(crate) fn failing() -> Self {
            Self {
                sent: Mutex::default(),
                fail: true,
            }
        }

        pub(crate) fn sent(&self) -> Vec<EmailMessage> {
            self.sent.lock().unwrap().clone()
        }

        /// Raw token carried by the most recent link.
        pub(crate) fn last_token(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            let url = url::Url::parse(&sent.last()?.link).ok()?;
            url.query_pairs()
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    /// Shared collaborators for service and handler unit tests.
    pub(crate) struct Fixture {
        pub(crate) store: Arc<MemoryStore>,
        pub(crate) clock: Arc<ManualClock>,
        pub(crate) sender: Arc<RecordingSender>,
        pub(crate) tokens: Arc<dyn VerificationTokens>,
        pub(crate) hasher: Arc<dyn PasswordHasher>,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            Self::with_sender(RecordingSender::default())
        }

        pub(crate) fn with_sender(sender: RecordingSender) -> Self {
            let random = Arc::new(OsRandom);
            let settings = PasswordSettings::new()
                .with_iterations(1)
                .with_memory_kb(64);
            let hasher = Argon2PasswordHasher::new(settings, random.clone()).unwrap();
            let tokens = VerificationTokenService::new(
                VerificationTokenSettings::new(SecretString::from("test-hmac-secret")),
                random,
            );
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(ManualClock::new(
                    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                )),
                sender: Arc::new(sender),
                tokens: Arc::new(tokens),
                hasher: Arc::new(hasher),
            }
        }

        pub(crate) fn mailer(&self) -> Mailer {
            Mailer::new(
                MailerConfig::new("https://app.test".to_string(), "Latchkey".to_string()),
                self.sender.clone(),
            )
        }

        /// Insert a user with `password` hashed for real.
        pub(crate) async fn user(&self, email: &str, password: &str, verified: bool) -> User {
            let hashed = self.hasher.hash_password(password).await.unwrap();
            let now = self.clock.now();
            let user = User {
                id: Uuid::now_v7(),
                email: email.to_string(),
                username: email.to_string(),
                password_hash: hashed.hash,
                password_salt: hashed.salt,
                email_verified: verified,
                created_at: now,
                updated_at: now,
            };
            let mut tx = self.store.begin().await.unwrap();
            tx.insert_user(&user).await.unwrap();
            tx.commit().await.unwrap();
            user
        }

        pub(crate) async fn reload(&self, user: &User) -> User {
            let mut tx = self.store.begin().await.unwrap();
            tx.user_by_id(user.id).await.unwrap().unwrap()
        }
    }
}
