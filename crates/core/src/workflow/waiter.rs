//! Bounded synchronous wait for an asynchronous unit of work.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Why a bounded wait did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The unit returned an error.
    #[error(transparent)]
    Failed(anyhow::Error),

    /// The unit did not finish within the limit.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The unit panicked or was cancelled by the runtime.
    #[error("task aborted: {0}")]
    Panicked(String),
}

/// Run `work` as an independent task and wait at most `limit` for it.
///
/// Failures of the unit are returned to the caller. On timeout the task is
/// aborted, which only takes effect at its next suspension point.
pub async fn run_bounded<F, T>(work: F, limit: Duration) -> Result<T, WaitError>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(work);

    match timeout(limit, &mut handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(WaitError::Failed(e)),
        Ok(Err(join_error)) => Err(WaitError::Panicked(join_error.to_string())),
        Err(_) => {
            handle.abort();
            Err(WaitError::TimedOut(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_value() {
        let value = run_bounded(async { Ok(41 + 1) }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_failure_is_reraised() {
        let result: Result<(), _> = run_bounded(
            async { Err(anyhow::anyhow!("boom")) },
            Duration::from_secs(1),
        )
        .await;

        match result {
            Err(WaitError::Failed(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let result = run_bounded(
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result, Err(WaitError::TimedOut(d)) if d == Duration::from_millis(50)));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let result: Result<(), _> = run_bounded(
            async {
                if true {
                    panic!("handler exploded");
                }
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(WaitError::Panicked(_))));
    }
}
