//! Retrying transient failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, StorageError};

/// Runs `operation`, retrying while it fails with a retryable kind
/// ([`crate::ErrorKind::TemporaryFailure`] or [`crate::ErrorKind::Timeout`]).
///
/// Makes at most `max_retries + 1` attempts with exponential backoff
/// (100ms, 200ms, 400ms, ... capped at ~100s). Cancellation during a backoff
/// ends the loop with [`crate::ErrorKind::Cancelled`].
pub async fn retry_transient<F, Fut, T>(
    max_retries: usize,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                let backoff = backoff(attempt);
                warn!(
                    "Retryable error in {} (attempt {}/{}), retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    max_retries,
                    backoff,
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StorageError::cancelled()),
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(100 * (1u64 << attempt.min(10)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failing(kind: ErrorKind) -> StorageError {
        StorageError::new(kind, "boom")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let result = retry_transient(5, "op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(failing(ErrorKind::TemporaryFailure))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let result: Result<()> = retry_transient(5, "op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failing(ErrorKind::NotFound))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let result: Result<()> = retry_transient(3, "op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failing(ErrorKind::Timeout))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = retry_transient(3, "op", &cancel, || async {
            Err(failing(ErrorKind::TemporaryFailure))
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_millis(100));
        assert_eq!(backoff(3), Duration::from_millis(800));
        assert_eq!(backoff(40), backoff(10));
    }
}
