//! Shared exponential-backoff-with-jitter retry, used by the embedding
//! provider (§4.6), the vector store (§4.8), and the LLM provider (§4.14).
//! Non-transient failures surface immediately; transient ones retry up to
//! `max_attempts` with delay doubling from `initial_delay` and ±25% jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Runs `op` up to `max_attempts` times. `is_transient` classifies a
/// failure as retryable; the first non-transient failure, or exhaustion of
/// attempts, returns that failure to the caller.
pub async fn retry<T, E, Fut, F>(
    max_attempts: u32,
    initial_delay: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                let jitter_factor = rand::thread_rng().gen_range(0.75..1.25);
                let sleep_for = delay.mul_f64(jitter_factor);
                tokio::time::sleep(sleep_for).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(5, Duration::from_millis(1), |_| true, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(5, Duration::from_millis(1), |_| false, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        })
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(3, Duration::from_millis(1), |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>("transient") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
