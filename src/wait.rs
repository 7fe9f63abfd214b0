//! Cancellable waiting.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ApplyKitError, Result};

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// # Errors
///
/// Returns [`ApplyKitError::Cancelled`] naming `operation` on cancellation.
pub async fn pause(duration: Duration, token: &CancellationToken, operation: &str) -> Result<()> {
    tokio::select! {
        () = token.cancelled() => Err(ApplyKitError::cancelled(operation)),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Fails if `token` has been cancelled.
///
/// # Errors
///
/// Returns [`ApplyKitError::Cancelled`] naming `operation`.
pub fn checkpoint(token: &CancellationToken, operation: &str) -> Result<()> {
    if token.is_cancelled() {
        return Err(ApplyKitError::cancelled(operation));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_completes() {
        let token = CancellationToken::new();
        assert!(pause(Duration::from_millis(1), &token, "sleep").await.is_ok());
        assert!(checkpoint(&token, "check").is_ok());
    }

    #[tokio::test]
    async fn test_pause_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let err = pause(Duration::from_secs(3600), &token, "backoff")
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ApplyKitError::Cancelled { ref operation } if operation == "backoff"));
        assert!(checkpoint(&token, "check").is_err());
    }

    #[test]
    fn test_cancel_wakes_pending_pause() {
        tokio_test::block_on(async {
            let token = CancellationToken::new();
            let mut waiting = tokio_test::task::spawn(pause(Duration::from_secs(3600), &token, "poll"));
            tokio_test::assert_pending!(waiting.poll());

            token.cancel();
            assert!(waiting.is_woken());
            tokio_test::assert_ready_err!(waiting.poll());
        });
    }
}
