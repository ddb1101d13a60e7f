//! Rate limiting and retry policy around upstream fetches (spec.md §5:
//! "the resolver's HTTP calls are rate-limited to 600 requests per 60
//! second window, bounded to 3 concurrent requests, and retried up to 3
//! times with exponential backoff on transient failure").

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;

use crate::ResolverError;

type DefaultLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Wraps a fetch closure with the token-bucket + concurrency-cap + retry
/// policy every resolver HTTP call goes through.
pub struct RateLimited {
    limiter: DefaultLimiter,
    concurrency: Arc<Semaphore>,
    max_retries: u32,
}

impl RateLimited {
    pub fn new(requests_per_minute: u32, max_concurrent: usize, max_retries: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(nonzero_ext::nonzero!(600u32)));
        RateLimited {
            limiter: RateLimiter::direct(quota),
            concurrency: Arc::new(Semaphore::new(max_concurrent)),
            max_retries,
        }
    }

    pub fn default_policy() -> Self {
        Self::new(600, 3, 3)
    }

    /// Run `op`, waiting for a rate-limit token and a concurrency permit
    /// first, retrying transient failures with exponential backoff
    /// (base 1s, cap 30s).
    pub async fn call<F, Fut, T>(&self, mut op: F) -> Result<T, ResolverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResolverError>>,
    {
        let _permit = self.concurrency.acquire().await.expect("semaphore not closed");
        self.limiter.until_ready().await;

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(30))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(ResolverError::NotFound) => return Err(ResolverError::NotFound),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                    tracing::debug!(attempt, error = %e, "resolver call failed, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let policy = RateLimited::new(600, 3, 3);
        let calls = AtomicU32::new(0);
        let result = policy
            .call(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ResolverError::Transport("timeout".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_never_retries() {
        let policy = RateLimited::new(600, 3, 3);
        let calls = AtomicU32::new(0);
        let result: Result<(), ResolverError> = policy
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResolverError::NotFound)
            })
            .await;
        assert!(matches!(result, Err(ResolverError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
