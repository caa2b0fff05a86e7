//! Utility functions for listkv

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Current Unix milliseconds, strictly increasing within this process.
///
/// Two calls in the same millisecond still produce distinct, ordered
/// values, so queue keys derived from it preserve append order.
pub fn monotonic_millis() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = timestamp_now_millis();
    LAST.fetch_max(now, Ordering::SeqCst);
    LAST.fetch_add(1, Ordering::SeqCst)
}

/// Health state of a remote server as seen by a client pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Alive,
    Failed,
}

impl NodeState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeState::Alive)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Alive => write!(f, "alive"),
            NodeState::Failed => write!(f, "failed"),
        }
    }
}

/// Retry with exponential backoff and a little jitter.
///
/// Delays follow `initial_delay * 2^attempt`, only retryable errors are
/// retried, and the last error is returned once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_attempts: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    use rand::Rng;

    let mut delay = initial_delay;

    for attempt in 0..max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
                let wait = delay + std::time::Duration::from_millis(jitter);
                tracing::warn!(
                    "attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("max retries exceeded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_timestamps_monotone_enough() {
        let a = timestamp_now_millis();
        let b = timestamp_now_millis();
        assert!(b >= a);
        assert!(timestamp_now() > 1_700_000_000);
    }

    #[test]
    fn test_monotonic_millis_strictly_increases() {
        let mut prev = monotonic_millis();
        for _ in 0..1000 {
            let next = monotonic_millis();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_node_state() {
        assert!(NodeState::Alive.is_healthy());
        assert!(!NodeState::Failed.is_healthy());
        assert_eq!(NodeState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::Error::Timeout("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            5,
            std::time::Duration::from_millis(1),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_fatal() {
        let calls = AtomicUsize::new(0);
        let result: crate::Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::BadRequest("nope".into())) }
            },
            5,
            std::time::Duration::from_millis(1),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
