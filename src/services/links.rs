//! Single-use link records shared by email verification and password reset.

use chrono::Duration;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{shifted, Clock};
use crate::crypto::VerificationTokens;
use crate::model::{VerificationKind, VerificationRecord};
use crate::store::{Store, Transaction};
use crate::Result;

/// What looking up a presented link token found.
pub(crate) enum Consumption {
    NotFound,
    /// The record existed but had expired; all of the user's records are gone.
    Expired,
    /// The user's records are deleted inside `tx`, which the caller must finish.
    Live {
        tx: Box<dyn Transaction>,
        user_id: Uuid,
    },
}

#[derive(Clone)]
pub(crate) struct LinkIssuer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn VerificationTokens>,
    kind: VerificationKind,
    hours_to_live: i64,
}

impl LinkIssuer {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn VerificationTokens>,
        kind: VerificationKind,
        hours_to_live: i64,
    ) -> Self {
        Self {
            store,
            clock,
            tokens,
            kind,
            hours_to_live,
        }
    }

    pub(crate) fn hours_to_live(&self) -> i64 {
        self.hours_to_live
    }

    /// Replace every record the user holds with a fresh one and return its raw token.
    pub(crate) async fn create(&self, user_id: Uuid) -> Result<String> {
        let raw = self.tokens.generate_token()?;
        let hashed_token = self.tokens.hash_token(&raw, self.kind.context())?;
        let now = self.clock.now();
        let expires_at = shifted(
            now,
            Duration::try_hours(self.hours_to_live),
            "link lifetime",
        )?;
        let record = VerificationRecord {
            id: Uuid::now_v7(),
            user_id,
            hashed_token,
            created_at: now,
            expires_at,
        };

        let mut tx = self.store.begin().await?;
        let superseded = tx.delete_verifications_for_user(self.kind, user_id).await?;
        tx.insert_verification(self.kind, &record).await?;
        tx.commit().await?;

        debug!(
            kind = self.kind.context(),
            %user_id,
            superseded,
            "link record created"
        );
        Ok(raw)
    }

    /// Look up `raw` and, when found, clear every record of its owner.
    pub(crate) async fn consume(&self, raw: &str) -> Result<Consumption> {
        let hashed_token = self.tokens.hash_token(raw, self.kind.context())?;

        let mut tx = self.store.begin().await?;
        let Some(record) = tx.verification_by_hash(self.kind, &hashed_token).await? else {
            tx.rollback().await?;
            return Ok(Consumption::NotFound);
        };

        // Single use: the attempt consumes the user's whole slot, win or lose.
        tx.delete_verifications_for_user(self.kind, record.user_id)
            .await?;

        if record.is_expired(self.clock.now()) {
            tx.commit().await?;
            return Ok(Consumption::Expired);
        }

        Ok(Consumption::Live {
            tx,
            user_id: record.user_id,
        })
    }
}
