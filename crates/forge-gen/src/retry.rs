use crate::error::ProviderError;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Retry policy for transient provider failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: f64,
    pub max_delay: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: 0.5,
            max_delay: 30.0,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Compute the delay for a retry attempt. Returns None when no retry should
/// occur.
pub fn compute_backoff_delay(
    policy: &RetryPolicy,
    attempt: usize,
    retry_after: Option<f64>,
) -> Option<f64> {
    if let Some(retry_after) = retry_after {
        if retry_after <= policy.max_delay {
            return Some(retry_after);
        }
        return None;
    }

    let raw = policy.base_delay * policy.backoff_multiplier.powi(attempt as i32);
    let capped = raw.min(policy.max_delay);
    if policy.jitter {
        Some(capped * jitter_factor(attempt))
    } else {
        Some(capped)
    }
}

/// Retry an async operation according to the provided retry policy. Only
/// retryable errors are retried; a provider-supplied `retry_after` wins over
/// the computed backoff.
pub async fn retry_async<T, Op, Fut>(
    policy: &RetryPolicy,
    mut operation: Op,
) -> Result<T, ProviderError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0usize;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.retryable || attempt >= policy.max_retries {
                    return Err(error);
                }
                let Some(delay) = compute_backoff_delay(policy, attempt, error.retry_after) else {
                    return Err(error);
                };
                tracing::debug!(attempt, delay, %error, "retrying provider call");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                attempt += 1;
            }
        }
    }
}

fn jitter_factor(attempt: usize) -> f64 {
    // Deterministic +/-50% jitter derived from attempt.
    let mut x = (attempt as u64).wrapping_add(0x9e3779b97f4a7c15);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    let normalized = (x % 10_000) as f64 / 10_000.0; // [0,1)
    0.5 + normalized
}

/// Cancellation signal shared between callers and in-flight jobs. Aborting
/// stops further polling; it does not undo provider-side state or refund
/// quota.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Controller that owns the underlying signal.
#[derive(Clone, Debug, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.signal.flag.store(true, Ordering::SeqCst);
    }
}
