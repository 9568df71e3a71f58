//! Password reset links: issue, send, and consume exactly once.
//!
//! A successful reset rewrites the credential and deletes every refresh token of the
//! user in the same transaction, which logs out all existing sessions.

use std::sync::Arc;
use tracing::{debug, warn};

use super::links::{Consumption, LinkIssuer};
use super::refresh_token::RefreshTokenService;
use crate::clock::Clock;
use crate::crypto::{PasswordHasher, VerificationTokens};
use crate::email::Mailer;
use crate::model::{User, VerificationKind};
use crate::store::Store;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct PasswordResetSettings {
    hours_to_live: i64,
}

impl PasswordResetSettings {
    #[must_use]
    pub fn new(hours_to_live: i64) -> Self {
        Self { hours_to_live }
    }

    #[must_use]
    pub fn hours_to_live(&self) -> i64 {
        self.hours_to_live
    }
}

impl Default for PasswordResetSettings {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetPasswordStatus {
    Success,
    LinkNotFound,
    LinkExpired,
    /// The record pointed at a user row that no longer exists.
    LinkInvalid,
}

#[derive(Clone)]
pub struct PasswordResetService {
    links: LinkIssuer,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PasswordHasher>,
    refresh_tokens: RefreshTokenService,
    mailer: Mailer,
}

impl PasswordResetService {
    #[must_use]
    pub fn new(
        settings: &PasswordResetSettings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn VerificationTokens>,
        hasher: Arc<dyn PasswordHasher>,
        refresh_tokens: RefreshTokenService,
        mailer: Mailer,
    ) -> Self {
        let links = LinkIssuer::new(
            store,
            clock.clone(),
            tokens,
            VerificationKind::PasswordReset,
            settings.hours_to_live,
        );
        Self {
            links,
            clock,
            hasher,
            refresh_tokens,
            mailer,
        }
    }

    /// Supersede any pending reset link for `user` and email a new one.
    ///
    /// # Errors
    /// Storage and entropy failures, or `Error::Email` when delivery fails.
    pub async fn create_and_send(&self, user: &User) -> Result<()> {
        let raw = self.links.create(user.id).await?;
        self.mailer
            .send_password_reset_email(&user.email, &raw, self.links.hours_to_live())
            .await
            .map_err(Error::Email)?;
        debug!(user_id = %user.id, "password reset email sent");
        Ok(())
    }

    /// Consume a reset token and replace the user's password.
    ///
    /// # Errors
    /// Storage and hashing failures; every expected branch is a
    /// [`ResetPasswordStatus`].
    pub async fn reset_password(&self, raw: &str, new_password: &str) -> Result<ResetPasswordStatus> {
        let (mut tx, user_id) = match self.links.consume(raw).await? {
            Consumption::NotFound => return Ok(ResetPasswordStatus::LinkNotFound),
            Consumption::Expired => return Ok(ResetPasswordStatus::LinkExpired),
            Consumption::Live { tx, user_id } => (tx, user_id),
        };

        let hashed = self.hasher.hash_password(new_password).await?;
        let updated = tx
            .update_password(user_id, &hashed.hash, &hashed.salt, self.clock.now())
            .await?;
        if updated == 0 {
            // Not committed, so the reset record survives.
            warn!(%user_id, "reset record points at a missing user");
            return Ok(ResetPasswordStatus::LinkInvalid);
        }

        let purged = self.refresh_tokens.purge_all_in(tx.as_mut(), user_id).await?;
        tx.commit().await?;

        debug!(%user_id, purged, "password reset");
        Ok(ResetPasswordStatus::Success)
    }
}
