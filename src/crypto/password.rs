//! Argon2id password hashing with a separately stored random salt.
//!
//! Hash and salt are both kept as standard base64. Verification re-derives the hash
//! with the stored salt and compares the two outputs in constant time, so the
//! comparison never short-circuits on the first differing byte.

use argon2::{password_hash::Output, Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use std::sync::Arc;

use crate::random::{random_bytes, SecureRandom};
use crate::{Error, Result};

/// Target identifier for password hashing logs.
const PASSWORD_HASHING_TARGET: &str = "latchkey::crypto::password";

const DEFAULT_ITERATIONS: u32 = 3;
const DEFAULT_MEMORY_KB: u32 = 19 * 1024;
const DEFAULT_PARALLELISM: u32 = 1;
const DEFAULT_HASH_LENGTH: usize = 32;
const DEFAULT_SALT_LENGTH: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordSettings {
    iterations: u32,
    memory_kb: u32,
    parallelism: u32,
    hash_length: usize,
    salt_length: usize,
}

impl PasswordSettings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            memory_kb: DEFAULT_MEMORY_KB,
            parallelism: DEFAULT_PARALLELISM,
            hash_length: DEFAULT_HASH_LENGTH,
            salt_length: DEFAULT_SALT_LENGTH,
        }
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_memory_kb(mut self, memory_kb: u32) -> Self {
        self.memory_kb = memory_kb;
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn with_hash_length(mut self, hash_length: usize) -> Self {
        self.hash_length = hash_length;
        self
    }

    #[must_use]
    pub fn with_salt_length(mut self, salt_length: usize) -> Self {
        self.salt_length = salt_length;
        self
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    #[must_use]
    pub fn memory_kb(&self) -> u32 {
        self.memory_kb
    }

    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    #[must_use]
    pub fn hash_length(&self) -> usize {
        self.hash_length
    }

    #[must_use]
    pub fn salt_length(&self) -> usize {
        self.salt_length
    }
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// A freshly derived credential, both halves base64 encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashedPassword {
    pub hash: String,
    pub salt: String,
}

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    /// Hash `password` under a new random salt.
    ///
    /// # Errors
    /// `InvalidState` for an empty password or empty KDF output, otherwise KDF or
    /// entropy failures.
    async fn hash_password(&self, password: &str) -> Result<HashedPassword>;

    /// Re-derive the hash of `password` under an existing base64 `salt`.
    ///
    /// # Errors
    /// `InvalidArgument` for empty inputs, `Encoding` for a malformed salt.
    async fn compute_hash(&self, password: &str, salt: &str) -> Result<String>;

    /// Check `password` against a stored hash/salt pair.
    ///
    /// # Errors
    /// `Encoding` if the stored salt or hash is not valid base64. Callers must treat
    /// that as a server fault, never as a wrong password.
    async fn verify(&self, password: &str, salt: &str, expected_hash: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
    settings: PasswordSettings,
    random: Arc<dyn SecureRandom>,
}

impl Argon2PasswordHasher {
    /// # Errors
    /// Returns an error if the Argon2 parameters are out of range or the hash length
    /// falls outside what verification can compare.
    pub fn new(settings: PasswordSettings, random: Arc<dyn SecureRandom>) -> Result<Self> {
        if !(Output::MIN_LENGTH..=Output::MAX_LENGTH).contains(&settings.hash_length) {
            return Err(Error::InvalidArgument(format!(
                "password hash length must be between {} and {} bytes",
                Output::MIN_LENGTH,
                Output::MAX_LENGTH
            )));
        }

        let params = Params::new(
            settings.memory_kb,
            settings.iterations,
            settings.parallelism,
            Some(settings.hash_length),
        )
        .map_err(|e| {
            tracing::error!(
                target: PASSWORD_HASHING_TARGET,
                error = %e,
                "Failed to create Argon2 parameters"
            );
            Error::InvalidArgument(format!("invalid password hashing parameters: {e}"))
        })?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            settings,
            random,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &PasswordSettings {
        &self.settings
    }

    // The KDF is deliberately slow; keep it off the async workers.
    async fn derive(&self, password: &str, salt: Vec<u8>) -> Result<Vec<u8>> {
        let argon2 = self.argon2.clone();
        let password = password.as_bytes().to_vec();
        let hash_length = self.settings.hash_length;

        tokio::task::spawn_blocking(move || {
            let mut output = vec![0u8; hash_length];
            argon2
                .hash_password_into(&password, &salt, &mut output)
                .map_err(|e| {
                    tracing::error!(
                        target: PASSWORD_HASHING_TARGET,
                        error = %e,
                        "Password hashing operation failed"
                    );
                    Error::Hashing(e.to_string())
                })?;
            Ok(output)
        })
        .await?
    }
}

#[async_trait]
impl PasswordHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<HashedPassword> {
        if password.trim().is_empty() {
            return Err(Error::InvalidState("password can't be empty".to_string()));
        }

        let salt = random_bytes(self.random.as_ref(), self.settings.salt_length)?;
        let hash = self.derive(password, salt.clone()).await?;
        if hash.is_empty() {
            return Err(Error::InvalidState("password hash is empty".to_string()));
        }

        Ok(HashedPassword {
            hash: Base64::encode_string(&hash),
            salt: Base64::encode_string(&salt),
        })
    }

    async fn compute_hash(&self, password: &str, salt: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::InvalidArgument("password can't be empty".to_string()));
        }
        if salt.is_empty() {
            return Err(Error::InvalidArgument("salt can't be empty".to_string()));
        }

        let salt = Base64::decode_vec(salt).map_err(|_| Error::Encoding("password salt"))?;
        let hash = self.derive(password, salt).await?;
        Ok(Base64::encode_string(&hash))
    }

    async fn verify(&self, password: &str, salt: &str, expected_hash: &str) -> Result<bool> {
        let salt = Base64::decode_vec(salt).map_err(|_| Error::Encoding("password salt"))?;
        let expected =
            Base64::decode_vec(expected_hash).map_err(|_| Error::Encoding("password hash"))?;

        let actual = self.derive(password, salt).await?;
        if actual.len() != expected.len() {
            return Ok(false);
        }

        // Output's PartialEq is constant-time
        let actual = Output::new(&actual).map_err(|e| Error::Hashing(e.to_string()))?;
        let expected = Output::new(&expected).map_err(|e| Error::Hashing(e.to_string()))?;
        Ok(actual == expected)
    }
}
