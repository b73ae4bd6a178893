use std::future::Future;
use std::time::Duration;

use demandcast_bucket::BucketError;
use tracing::warn;

/// Bounded retry with linear backoff for per-unit bucket I/O.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> std::result::Result<T, BucketError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BucketError>>,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff * attempt;
            warn!(
                op = op_name,
                attempt,
                backoff_ms = %backoff.as_millis(),
                "retrying bucket operation"
            );
            tokio::time::sleep(backoff).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error
        .unwrap_or_else(|| BucketError::Sdk("retry loop finished without an attempt".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(1),
        };
        let attempts = AtomicU32::new(0);

        let result = with_retry(&policy, "test_op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BucketError::Sdk("transient".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(1),
        };
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), _> = with_retry(&policy, "test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BucketError::Sdk("still down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
