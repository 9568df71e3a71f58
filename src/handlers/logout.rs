use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::utils::{redact_token, with_minimum_duration};
use super::{AuthHandlers, Operation};
use crate::clock::Clock;
use crate::store::Store;
use crate::Result;

#[derive(Clone, Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Internal result of a logout. The HTTP boundary reports success for all of them
/// except `BadRequest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogoutOutcome {
    SuccessfullyRevoked,
    NotFound,
    AlreadyRevoked,
    Expired,
    BadRequest(String),
}

impl AuthHandlers {
    /// Revoke the caller's refresh token.
    ///
    /// # Errors
    /// Infrastructure failures and `Error::Cancelled`.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn logout(
        &self,
        request: LogoutRequest,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<LogoutOutcome> {
        with_minimum_duration(
            Operation::Logout,
            self.minimum_duration(Operation::Logout),
            cancel,
            self.logout_user(request, user_id),
        )
        .await
    }

    async fn logout_user(&self, request: LogoutRequest, user_id: Uuid) -> Result<LogoutOutcome> {
        let presented = request.refresh_token.trim();
        if presented.is_empty() {
            info!("logout rejected: empty token");
            return Ok(LogoutOutcome::BadRequest(
                "Refresh token is required.".to_string(),
            ));
        }
        let token = redact_token(presented);

        let mut tx = self.store.begin().await?;
        let Some(stored) = tx.refresh_token_for_user(presented, user_id).await? else {
            tx.rollback().await?;
            info!(%token, "logout with unknown refresh token");
            return Ok(LogoutOutcome::NotFound);
        };

        if stored.is_revoked() {
            tx.rollback().await?;
            debug!(%token, "refresh token already revoked");
            return Ok(LogoutOutcome::AlreadyRevoked);
        }

        let now = self.clock.now();
        if stored.is_expired(now) {
            tx.rollback().await?;
            debug!(%token, "refresh token already expired");
            return Ok(LogoutOutcome::Expired);
        }

        if tx.revoke_refresh_token(stored.id, now).await? == 0 {
            tx.rollback().await?;
            debug!(%token, "refresh token revoked concurrently");
            return Ok(LogoutOutcome::AlreadyRevoked);
        }
        tx.commit().await?;

        debug!(%token, "refresh token revoked");
        Ok(LogoutOutcome::SuccessfullyRevoked)
    }
}
