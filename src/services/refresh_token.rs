//! Refresh token issuance, rotation and purging.
//!
//! A token is `Active` until it is revoked (optionally linked to its successor) or it
//! expires. Rows leave the table only through a purge: the stale purge that runs with
//! issuance, or the full purge that follows a password reset.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{shifted, Clock};
use crate::redact::redact_token;
use crate::model::{ApiToken, RefreshToken, User};
use crate::random::{random_bytes, SecureRandom};
use crate::store::{Store, Transaction};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct RefreshTokenSettings {
    token_length: usize,
    lifetime_hours: i64,
    purge_cutoff_days: i64,
}

impl RefreshTokenSettings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_length: 64,
            lifetime_hours: 24 * 7,
            purge_cutoff_days: 30,
        }
    }

    /// Random bytes per token before encoding.
    #[must_use]
    pub fn with_token_length(mut self, token_length: usize) -> Self {
        self.token_length = token_length;
        self
    }

    #[must_use]
    pub fn with_lifetime_hours(mut self, lifetime_hours: i64) -> Self {
        self.lifetime_hours = lifetime_hours;
        self
    }

    /// Tokens that expired more than this many days ago are purged on issuance.
    #[must_use]
    pub fn with_purge_cutoff_days(mut self, purge_cutoff_days: i64) -> Self {
        self.purge_cutoff_days = purge_cutoff_days;
        self
    }

    #[must_use]
    pub fn token_length(&self) -> usize {
        self.token_length
    }

    #[must_use]
    pub fn lifetime_hours(&self) -> i64 {
        self.lifetime_hours
    }

    #[must_use]
    pub fn purge_cutoff_days(&self) -> i64 {
        self.purge_cutoff_days
    }
}

impl Default for RefreshTokenSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct RefreshTokenService {
    settings: RefreshTokenSettings,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn SecureRandom>,
}

impl RefreshTokenService {
    #[must_use]
    pub fn new(
        settings: RefreshTokenSettings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn SecureRandom>,
    ) -> Self {
        Self {
            settings,
            store,
            clock,
            random,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RefreshTokenSettings {
        &self.settings
    }

    /// Mint a refresh token for `user` in its own transaction.
    ///
    /// With `old_token`, the old row is revoked and linked to the new one. With
    /// `purge_old_tokens`, the user's tokens that expired before the cutoff are
    /// deleted. Either everything is committed or nothing is.
    ///
    /// # Errors
    /// `InvalidArgument` for a nil user id, `Conflict` if `old_token` was revoked by
    /// a concurrent caller, otherwise storage or entropy failures.
    pub async fn generate_refresh_token(
        &self,
        user: &User,
        old_token: Option<&RefreshToken>,
        purge_old_tokens: bool,
    ) -> Result<ApiToken> {
        let mut tx = self.store.begin().await?;
        let token = self
            .generate_in(tx.as_mut(), user, old_token, purge_old_tokens)
            .await?;
        tx.commit().await?;
        Ok(token)
    }

    /// Same as [`Self::generate_refresh_token`] inside a caller-owned transaction.
    ///
    /// # Errors
    /// See [`Self::generate_refresh_token`].
    pub async fn generate_in(
        &self,
        tx: &mut dyn Transaction,
        user: &User,
        old_token: Option<&RefreshToken>,
        purge_old_tokens: bool,
    ) -> Result<ApiToken> {
        if user.id.is_nil() {
            return Err(Error::InvalidArgument("user id can't be empty".to_string()));
        }

        let bytes = random_bytes(self.random.as_ref(), self.settings.token_length)?;
        let value = URL_SAFE_NO_PAD.encode(bytes);
        if value.trim().is_empty() {
            return Err(Error::InvalidState(
                "refresh token generation produced an empty token".to_string(),
            ));
        }

        let now = self.clock.now();
        let expires_at = shifted(
            now,
            Duration::try_hours(self.settings.lifetime_hours),
            "refresh token lifetime",
        )?;
        let token = RefreshToken {
            id: Uuid::now_v7(),
            token: value,
            user_id: user.id,
            created_at: now,
            expires_at,
            revoked_at: None,
            replaced_by: None,
        };
        tx.insert_refresh_token(&token).await?;

        if let Some(old) = old_token {
            let linked = tx.link_replaced_refresh_token(old.id, token.id, now).await?;
            if linked == 0 {
                return Err(Error::Conflict(format!(
                    "refresh token {} was already rotated",
                    redact_token(&old.token)
                )));
            }
            debug!(old_id = %old.id, new_id = %token.id, "rotated refresh token");
        }

        if purge_old_tokens {
            let cutoff = shifted(
                now,
                Duration::try_days(self.settings.purge_cutoff_days).map(|days| -days),
                "refresh token purge cutoff",
            )?;
            let purged = tx.delete_stale_refresh_tokens(user.id, cutoff).await?;
            debug!(user_id = %user.id, purged, "purged stale refresh tokens");
        }

        Ok(ApiToken::new(token.token, token.expires_at))
    }

    /// Read-only validity check. Not an authorization decision.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn is_refresh_token_valid(&self, token: &str) -> Result<bool> {
        Ok(self.get_valid_refresh_token(token).await?.is_some())
    }

    /// Read-only lookup of an unrevoked, unexpired token.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn get_valid_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let mut tx = self.store.begin().await?;
        let found = tx.valid_refresh_token(token, self.clock.now()).await?;
        tx.rollback().await?;
        Ok(found)
    }

    /// Delete every refresh token of the user.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn purge_all_tokens(&self, user_id: Uuid) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let purged = self.purge_all_in(tx.as_mut(), user_id).await?;
        tx.commit().await?;
        Ok(purged)
    }

    /// Transaction-scoped variant of [`Self::purge_all_tokens`].
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn purge_all_in(&self, tx: &mut dyn Transaction, user_id: Uuid) -> Result<u64> {
        debug!(%user_id, "purging all refresh tokens");
        tx.delete_refresh_tokens_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{testing::FixedRandom, OsRandom};
    use crate::services::testing::Fixture;

    fn service(fixture: &Fixture) -> RefreshTokenService {
        RefreshTokenService::new(
            RefreshTokenSettings::new().with_lifetime_hours(48),
            fixture.store.clone(),
            fixture.clock.clone(),
            Arc::new(OsRandom),
        )
    }

    async fn tokens_of(fixture: &Fixture, user: &User) -> Vec<RefreshToken> {
        let mut tx = fixture.store.begin().await.unwrap();
        tx.refresh_tokens_for_user(user.id).await.unwrap()
    }

    #[tokio::test]
    async fn issued_token_is_persisted_and_active() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = service(&fixture);

        let issued = service
            .generate_refresh_token(&user, None, false)
            .await
            .unwrap();

        let now = fixture.clock.now();
        assert_eq!(issued.expires_at, now + Duration::hours(48));
        let stored = tokens_of(&fixture, &user).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].token, issued.token);
        assert!(stored[0].is_active(now));
        assert!(service.is_refresh_token_valid(&issued.token).await.unwrap());
    }

    #[tokio::test]
    async fn unrepresentable_lifetime_is_an_error_not_a_panic() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = RefreshTokenService::new(
            RefreshTokenSettings::new().with_lifetime_hours(i64::MAX),
            fixture.store.clone(),
            fixture.clock.clone(),
            Arc::new(OsRandom),
        );

        let result = service.generate_refresh_token(&user, None, false).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(tokens_of(&fixture, &user).await.is_empty());

        let service = RefreshTokenService::new(
            RefreshTokenSettings::new().with_purge_cutoff_days(i64::MAX),
            fixture.store.clone(),
            fixture.clock.clone(),
            Arc::new(OsRandom),
        );
        let result = service.generate_refresh_token(&user, None, true).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(tokens_of(&fixture, &user).await.is_empty());
    }

    #[tokio::test]
    async fn token_encoding_is_url_safe_without_padding() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = RefreshTokenService::new(
            RefreshTokenSettings::new().with_token_length(64),
            fixture.store.clone(),
            fixture.clock.clone(),
            Arc::new(FixedRandom(0xfb)),
        );

        let issued = service
            .generate_refresh_token(&user, None, false)
            .await
            .unwrap();

        // 64 bytes -> 86 chars; 0xfb bytes exercise the '-' and '_' alphabet.
        assert_eq!(issued.token.len(), 86);
        assert!(!issued.token.contains(['+', '/', '=']));
    }

    #[tokio::test]
    async fn rotation_revokes_and_links_the_old_token() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = service(&fixture);

        let first = service
            .generate_refresh_token(&user, None, false)
            .await
            .unwrap();
        let old = service
            .get_valid_refresh_token(&first.token)
            .await
            .unwrap()
            .unwrap();

        fixture.clock.advance(Duration::minutes(5));
        let second = service
            .generate_refresh_token(&user, Some(&old), true)
            .await
            .unwrap();

        let stored = tokens_of(&fixture, &user).await;
        let old_row = stored.iter().find(|t| t.id == old.id).unwrap();
        let new_row = stored.iter().find(|t| t.token == second.token).unwrap();
        assert_eq!(old_row.revoked_at, Some(fixture.clock.now()));
        assert_eq!(old_row.replaced_by, Some(new_row.id));
        assert!(new_row.is_active(fixture.clock.now()));
        assert!(!service.is_refresh_token_valid(&first.token).await.unwrap());
    }

    #[tokio::test]
    async fn rotating_an_already_rotated_token_conflicts_and_writes_nothing() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = service(&fixture);

        let first = service
            .generate_refresh_token(&user, None, false)
            .await
            .unwrap();
        let old = service
            .get_valid_refresh_token(&first.token)
            .await
            .unwrap()
            .unwrap();
        service
            .generate_refresh_token(&user, Some(&old), false)
            .await
            .unwrap();

        let err = service
            .generate_refresh_token(&user, Some(&old), false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(tokens_of(&fixture, &user).await.len(), 2);
    }

    #[tokio::test]
    async fn stale_purge_respects_the_cutoff() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = service(&fixture);

        service
            .generate_refresh_token(&user, None, false)
            .await
            .unwrap();
        // Expired 48h in, purged once it is more than 30 days past expiry.
        fixture.clock.advance(Duration::days(20));
        service
            .generate_refresh_token(&user, None, true)
            .await
            .unwrap();
        assert_eq!(tokens_of(&fixture, &user).await.len(), 2);

        fixture.clock.advance(Duration::days(15));
        service
            .generate_refresh_token(&user, None, true)
            .await
            .unwrap();
        assert_eq!(tokens_of(&fixture, &user).await.len(), 2);
    }

    #[tokio::test]
    async fn purge_all_removes_every_token() {
        let fixture = Fixture::new();
        let user = fixture.user("a@example.com", "password-1", true).await;
        let service = service(&fixture);
        for _ in 0..3 {
            service
                .generate_refresh_token(&user, None, false)
                .await
                .unwrap();
        }

        assert_eq!(service.purge_all_tokens(user.id).await.unwrap(), 3);
        assert!(tokens_of(&fixture, &user).await.is_empty());
    }

    #[tokio::test]
    async fn nil_user_is_rejected() {
        let fixture = Fixture::new();
        let mut user = fixture.user("a@example.com", "password-1", true).await;
        user.id = Uuid::nil();

        let err = service(&fixture)
            .generate_refresh_token(&user, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
