//! Shared handler plumbing: timing floor and cancellation.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::Operation;
use crate::{Error, Result};

pub use crate::redact::redact_token;

/// Run `work` so that its result is returned no sooner than `minimum` after the call.
///
/// The timer runs alongside the work and never delays the work itself. Cancellation
/// wins immediately: the work future is dropped (rolling back any open transaction)
/// and `Error::Cancelled` is returned without waiting out the floor.
pub(crate) async fn with_minimum_duration<T, F>(
    operation: Operation,
    minimum: Duration,
    cancel: &CancellationToken,
    work: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timed = async {
        let (result, ()) = tokio::join!(work, tokio::time::sleep(minimum));
        result
    };

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = timed => result,
    };

    match &result {
        Err(Error::Cancelled) => debug!(operation = operation.as_str(), "operation cancelled"),
        Err(err) => error!(operation = operation.as_str(), error = %err, "operation failed"),
        Ok(_) => {}
    }

    result
}
