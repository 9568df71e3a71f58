//! Persistence for users, refresh tokens and verification records.
//!
//! All work happens inside a [`Transaction`]. Dropping a transaction without calling
//! [`Transaction::commit`] rolls it back, which is how cancelled operations leave no
//! partial state behind.
//!
//! Exactly-once consumption relies on conditional updates that report how many rows
//! they touched (`mark_email_verified`, `revoke_refresh_token`), not on in-process
//! locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{RefreshToken, User, VerificationKind, VerificationRecord};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of inserting a user whose email may already be taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// # Errors
    /// Returns an error if a connection or transaction can't be obtained.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>>;

    async fn user_by_id(&mut self, user_id: Uuid) -> Result<Option<User>>;

    /// Insert a user, reporting `Conflict` on a duplicate email.
    async fn insert_user(&mut self, user: &User) -> Result<InsertOutcome>;

    /// `verified = true WHERE id = ? AND verified = false`; returns rows affected.
    async fn mark_email_verified(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    /// Overwrite hash and salt for the user; returns rows affected.
    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        password_salt: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn insert_verification(
        &mut self,
        kind: VerificationKind,
        record: &VerificationRecord,
    ) -> Result<()>;

    async fn verification_by_hash(
        &mut self,
        kind: VerificationKind,
        hashed_token: &str,
    ) -> Result<Option<VerificationRecord>>;

    async fn verifications_for_user(
        &mut self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<Vec<VerificationRecord>>;

    async fn delete_verifications_for_user(
        &mut self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<u64>;

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<()>;

    /// Lookup scoped to the owner; another user's token never matches.
    async fn refresh_token_for_user(
        &mut self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>>;

    /// Lookup filtered on unrevoked and unexpired at `now`.
    async fn valid_refresh_token(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>>;

    async fn refresh_tokens_for_user(&mut self, user_id: Uuid) -> Result<Vec<RefreshToken>>;

    /// Revoke `old_id` if still unrevoked and point it at `new_id`; returns rows affected.
    async fn link_replaced_refresh_token(
        &mut self,
        old_id: Uuid,
        new_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Revoke a token that is not revoked yet; returns rows affected.
    async fn revoke_refresh_token(&mut self, token_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    /// Delete the user's tokens that expired before `cutoff`.
    async fn delete_stale_refresh_tokens(
        &mut self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    async fn delete_refresh_tokens_for_user(&mut self, user_id: Uuid) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
