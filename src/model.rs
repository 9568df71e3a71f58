//! Persisted records and the token value object handed to the boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
}

impl RefreshToken {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Valid iff not revoked and expiring in the future.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && self.expires_at > now
    }
}

/// Which single-use link a verification record belongs to.
///
/// The two kinds live in separate tables and hash under different contexts, so a
/// token minted for one purpose never matches a record of the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerificationKind {
    EmailVerification,
    PasswordReset,
}

impl VerificationKind {
    /// HMAC context string.
    #[must_use]
    pub const fn context(self) -> &'static str {
        match self {
            Self::EmailVerification => "EmailVerification",
            Self::PasswordReset => "PasswordReset",
        }
    }

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verifications",
            Self::PasswordReset => "password_reset_verifications",
        }
    }
}

/// Email verification or password reset record. Only the HMAC of the raw token is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hashed_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl ApiToken {
    #[must_use]
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }
}
