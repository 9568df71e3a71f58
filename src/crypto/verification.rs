//! Single-use link tokens and their keyed hashes.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;

use crate::random::{random_bytes, SecureRandom};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOKEN_SIZE: usize = 32;

#[derive(Clone, Debug)]
pub struct VerificationTokenSettings {
    token_size: usize,
    secret_key: SecretString,
}

impl VerificationTokenSettings {
    #[must_use]
    pub fn new(secret_key: SecretString) -> Self {
        Self {
            token_size: DEFAULT_TOKEN_SIZE,
            secret_key,
        }
    }

    #[must_use]
    pub fn with_token_size(mut self, token_size: usize) -> Self {
        self.token_size = token_size;
        self
    }

    #[must_use]
    pub fn token_size(&self) -> usize {
        self.token_size
    }
}

pub trait VerificationTokens: Send + Sync {
    /// Create a raw token suitable for a URL.
    ///
    /// # Errors
    /// Returns an error if the entropy source fails.
    fn generate_token(&self) -> Result<String>;

    /// `base64(HMAC-SHA256(secret, context + ":" + raw))`.
    ///
    /// # Errors
    /// `InvalidArgument` when `context` is empty.
    fn hash_token(&self, raw: &str, context: &str) -> Result<String>;
}

pub struct VerificationTokenService {
    settings: VerificationTokenSettings,
    random: Arc<dyn SecureRandom>,
}

impl VerificationTokenService {
    #[must_use]
    pub fn new(settings: VerificationTokenSettings, random: Arc<dyn SecureRandom>) -> Self {
        Self { settings, random }
    }
}

impl VerificationTokens for VerificationTokenService {
    fn generate_token(&self) -> Result<String> {
        let bytes = random_bytes(self.random.as_ref(), self.settings.token_size)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    fn hash_token(&self, raw: &str, context: &str) -> Result<String> {
        if context.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "verification token context is required".to_string(),
            ));
        }

        let mut mac =
            HmacSha256::new_from_slice(self.settings.secret_key.expose_secret().as_bytes())
                .map_err(|e| Error::InvalidState(format!("invalid hmac key: {e}")))?;
        mac.update(context.as_bytes());
        mac.update(b":");
        mac.update(raw.as_bytes());

        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{testing::FixedRandom, OsRandom};

    fn service() -> VerificationTokenService {
        VerificationTokenService::new(
            VerificationTokenSettings::new(SecretString::from("test-secret-key")),
            Arc::new(OsRandom),
        )
    }

    #[test]
    fn generated_tokens_are_url_safe_and_sized() {
        let service = VerificationTokenService::new(
            VerificationTokenSettings::new(SecretString::from("k")).with_token_size(24),
            Arc::new(FixedRandom(0xff)),
        );
        let token = service.generate_token().unwrap();

        assert!(!token.contains('+') && !token.contains('/') && !token.contains('='));
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap(), vec![0xff; 24]);
    }

    #[test]
    fn generated_tokens_differ() {
        let service = service();
        assert_ne!(
            service.generate_token().unwrap(),
            service.generate_token().unwrap()
        );
    }

    #[test]
    fn hash_is_deterministic_per_context() {
        let service = service();
        let first = service.hash_token("raw", "EmailVerification").unwrap();
        let second = service.hash_token("raw", "EmailVerification").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn contexts_do_not_collide() {
        let service = service();
        assert_ne!(
            service.hash_token("raw", "EmailVerification").unwrap(),
            service.hash_token("raw", "PasswordReset").unwrap()
        );
    }

    #[test]
    fn secret_key_changes_the_hash() {
        let other = VerificationTokenService::new(
            VerificationTokenSettings::new(SecretString::from("another-secret")),
            Arc::new(OsRandom),
        );
        assert_ne!(
            service().hash_token("raw", "PasswordReset").unwrap(),
            other.hash_token("raw", "PasswordReset").unwrap()
        );
    }

    #[test]
    fn hash_matches_known_hmac() {
        let mut mac = HmacSha256::new_from_slice(b"test-secret-key").unwrap();
        mac.update(b"PasswordReset:raw");
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(service().hash_token("raw", "PasswordReset").unwrap(), expected);
    }

    #[test]
    fn empty_context_fails_fast() {
        assert!(matches!(
            service().hash_token("raw", ""),
            Err(Error::InvalidArgument(_))
        ));
    }
}
