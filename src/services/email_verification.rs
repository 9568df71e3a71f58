//! Email verification links: issue, send, and consume exactly once.
//!
//! `Unverified --(valid unexpired token, first use)--> Verified`. The flip is a
//! conditional update (`WHERE email_verified = FALSE`), so two concurrent attempts
//! with the same token resolve to a single `Verified`.

use std::sync::Arc;
use tracing::{debug, info};

use super::links::{Consumption, LinkIssuer};
use crate::clock::Clock;
use crate::crypto::VerificationTokens;
use crate::email::Mailer;
use crate::model::{User, VerificationKind};
use crate::store::Store;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct EmailVerificationSettings {
    hours_to_live: i64,
}

impl EmailVerificationSettings {
    #[must_use]
    pub fn new(hours_to_live: i64) -> Self {
        Self { hours_to_live }
    }

    #[must_use]
    pub fn hours_to_live(&self) -> i64 {
        self.hours_to_live
    }
}

impl Default for EmailVerificationSettings {
    fn default() -> Self {
        Self::new(24)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyEmailStatus {
    /// First use of a live token; carries the freshly read user row.
    Verified(User),
    LinkNotFound,
    LinkExpired,
    /// The record existed but the user was already verified.
    LinkInvalid,
}

#[derive(Clone)]
pub struct EmailVerificationService {
    links: LinkIssuer,
    clock: Arc<dyn Clock>,
    mailer: Mailer,
}

impl EmailVerificationService {
    #[must_use]
    pub fn new(
        settings: &EmailVerificationSettings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn VerificationTokens>,
        mailer: Mailer,
    ) -> Self {
        let links = LinkIssuer::new(
            store,
            clock.clone(),
            tokens,
            VerificationKind::EmailVerification,
            settings.hours_to_live,
        );
        Self {
            links,
            clock,
            mailer,
        }
    }

    /// Supersede any pending link for `user` and email a new one.
    ///
    /// The record is committed before sending; a delivery failure leaves it in place
    /// for the next resend to replace.
    ///
    /// # Errors
    /// Storage and entropy failures, or `Error::Email` when delivery fails.
    pub async fn create_and_send(&self, user: &User) -> Result<()> {
        let raw = self.links.create(user.id).await?;
        self.mailer
            .send_verification_email(&user.email, &raw, self.links.hours_to_live())
            .await
            .map_err(Error::Email)?;
        debug!(user_id = %user.id, "verification email sent");
        Ok(())
    }

    /// Consume a verification token.
    ///
    /// # Errors
    /// Storage failures only; every expected branch is a [`VerifyEmailStatus`].
    pub async fn verify_email(&self, raw: &str) -> Result<VerifyEmailStatus> {
        let (mut tx, user_id) = match self.links.consume(raw).await? {
            Consumption::NotFound => return Ok(VerifyEmailStatus::LinkNotFound),
            Consumption::Expired => return Ok(VerifyEmailStatus::LinkExpired),
            Consumption::Live { tx, user_id } => (tx, user_id),
        };

        if tx.mark_email_verified(user_id, self.clock.now()).await? == 0 {
            tx.commit().await?;
            info!(%user_id, "verification link used for an already verified user");
            return Ok(VerifyEmailStatus::LinkInvalid);
        }

        let user = tx.user_by_id(user_id).await?.ok_or_else(|| {
            Error::InvalidState(format!("user {user_id} vanished after verification"))
        })?;
        tx.commit().await?;

        debug!(%user_id, "email verified");
        Ok(VerifyEmailStatus::Verified(user))
    }
}
