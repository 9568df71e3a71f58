use chrono::Duration;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::utils::{redact_token, with_minimum_duration};
use super::{AuthHandlers, Operation};
use crate::clock::Clock;
use crate::model::ApiToken;
use crate::store::Store;
use crate::{Error, Result};

/// Remaining lifetime above which a refresh token is handed back unchanged.
const ROTATION_THRESHOLD_DAYS: i64 = 1;

#[derive(Clone, Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success {
        access_token: ApiToken,
        refresh_token: ApiToken,
    },
    BadRequest(String),
    TokenNotFound,
    TokenExpired,
    TokenRevoked,
    /// The token exists but its owner does not.
    UserNotFound,
}

impl AuthHandlers {
    /// Exchange a refresh token of `user_id` for a new access token.
    ///
    /// `user_id` is the subject of the caller's access token, which may be expired.
    ///
    /// # Errors
    /// Infrastructure failures and `Error::Cancelled`.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        with_minimum_duration(
            Operation::Refresh,
            self.minimum_duration(Operation::Refresh),
            cancel,
            self.refresh_token(request, user_id),
        )
        .await
    }

    async fn refresh_token(&self, request: RefreshRequest, user_id: Uuid) -> Result<RefreshOutcome> {
        let presented = request.refresh_token.trim();
        if presented.is_empty() {
            info!("refresh rejected: empty token");
            return Ok(RefreshOutcome::BadRequest(
                "Refresh token is required.".to_string(),
            ));
        }
        if user_id.is_nil() {
            info!("refresh rejected: empty user id");
            return Ok(RefreshOutcome::BadRequest("UserId is required.".to_string()));
        }

        let mut tx = self.store.begin().await?;
        // Scoped to the caller; another user's token never matches.
        let stored = tx.refresh_token_for_user(presented, user_id).await?;
        let owner = match &stored {
            Some(token) => tx.user_by_id(token.user_id).await?,
            None => None,
        };
        tx.rollback().await?;

        let token = redact_token(presented);
        let Some(stored) = stored else {
            info!(%token, "refresh token not found");
            return Ok(RefreshOutcome::TokenNotFound);
        };

        let now = self.clock.now();
        if stored.is_expired(now) {
            info!(%token, "refresh token already expired");
            return Ok(RefreshOutcome::TokenExpired);
        }
        if stored.is_revoked() {
            info!(%token, "refresh token already revoked");
            return Ok(RefreshOutcome::TokenRevoked);
        }

        let Some(user) = owner else {
            error!(token_id = %stored.id, "refresh token without a user, possible data inconsistency");
            return Ok(RefreshOutcome::UserNotFound);
        };

        let access_token = self.access_tokens.generate_token(user.id, &user.email)?;

        if stored.expires_at >= now + Duration::days(ROTATION_THRESHOLD_DAYS) {
            return Ok(RefreshOutcome::Success {
                access_token,
                refresh_token: ApiToken::new(stored.token, stored.expires_at),
            });
        }

        match self
            .refresh_tokens
            .generate_refresh_token(&user, Some(&stored), true)
            .await
        {
            Ok(refresh_token) => Ok(RefreshOutcome::Success {
                access_token,
                refresh_token,
            }),
            Err(Error::Conflict(reason)) => {
                info!(%token, %reason, "refresh token rotated concurrently");
                Ok(RefreshOutcome::TokenRevoked)
            }
            Err(err) => {
                error!(token_id = %stored.id, error = %err, "refresh token rotation failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::handlers;
    use crate::handlers::{LoginOutcome, LoginRequest};
    use crate::model::User;
    use crate::services::testing::Fixture;

    async fn logged_in(fixture: &Fixture, handlers: &AuthHandlers) -> (User, ApiToken) {
        let user = fixture.user("a@example.com", "longenough", true).await;
        let outcome = handlers
            .login(
                LoginRequest {
                    email: "a@example.com".to_string(),
                    password: "longenough".to_string(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let LoginOutcome::Success { refresh_token, .. } = outcome else {
            panic!("login failed: {outcome:?}");
        };
        (user, refresh_token)
    }

    fn request(token: &ApiToken) -> RefreshRequest {
        RefreshRequest {
            refresh_token: token.token.clone(),
        }
    }

    #[tokio::test]
    async fn long_lived_token_is_returned_unchanged() {
        let (fixture, handlers) = handlers();
        let (user, issued) = logged_in(&fixture, &handlers).await;

        let outcome = handlers
            .refresh(request(&issued), user.id, &CancellationToken::new())
            .await
            .unwrap();

        let RefreshOutcome::Success { refresh_token, .. } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(refresh_token, issued);
    }

    #[tokio::test]
    async fn token_near_expiry_is_rotated() {
        let (fixture, handlers) = handlers();
        let (user, issued) = logged_in(&fixture, &handlers).await;
        // 72h lifetime; 2.5 days in, less than a day remains.
        fixture.clock.advance(Duration::hours(60));

        let outcome = handlers
            .refresh(request(&issued), user.id, &CancellationToken::new())
            .await
            .unwrap();

        let RefreshOutcome::Success { refresh_token, .. } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_ne!(refresh_token.token, issued.token);

        // The old token is now revoked.
        assert_eq!(
            handlers
                .refresh(request(&issued), user.id, &CancellationToken::new())
                .await
                .unwrap(),
            RefreshOutcome::TokenRevoked
        );
    }

    #[tokio::test]
    async fn another_users_token_is_not_found() {
        let (fixture, handlers) = handlers();
        let (_user, issued) = logged_in(&fixture, &handlers).await;
        let other = fixture.user("b@example.com", "longenough", true).await;

        assert_eq!(
            handlers
                .refresh(request(&issued), other.id, &CancellationToken::new())
                .await
                .unwrap(),
            RefreshOutcome::TokenNotFound
        );
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let (fixture, handlers) = handlers();
        let (user, issued) = logged_in(&fixture, &handlers).await;
        fixture.clock.advance(Duration::hours(73));

        assert_eq!(
            handlers
                .refresh(request(&issued), user.id, &CancellationToken::new())
                .await
                .unwrap(),
            RefreshOutcome::TokenExpired
        );
    }

    #[tokio::test]
    async fn empty_inputs_are_bad_requests() {
        let (_fixture, handlers) = handlers();
        let cancel = CancellationToken::new();

        let empty_token = RefreshRequest {
            refresh_token: " ".to_string(),
        };
        assert!(matches!(
            handlers.refresh(empty_token, Uuid::now_v7(), &cancel).await.unwrap(),
            RefreshOutcome::BadRequest(_)
        ));

        let token = RefreshRequest {
            refresh_token: "abc".to_string(),
        };
        assert!(matches!(
            handlers.refresh(token, Uuid::nil(), &cancel).await.unwrap(),
            RefreshOutcome::BadRequest(_)
        ));
    }
}
