// Retry with exponential backoff for transient failures

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::ClientError;

/// Whether another attempt could succeed
pub fn is_retryable(error: &ClientError) -> bool {
    match error {
        ClientError::NetworkFailure { .. } => true,
        ClientError::RequestFailed { status, .. } => (500..=599).contains(status),
        _ => false,
    }
}

/// Exponential backoff: base_delay * 2^(attempt-1), plus up to 10% jitter
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base_delay.saturating_mul(2_u32.pow(exponent));
    let jitter = delay.mul_f64(0.1 * rand::thread_rng().gen::<f64>());
    delay + jitter
}

/// Run `op` up to `max_attempts` times, backing off between retryable failures
pub async fn with_retry<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = backoff_delay(base_delay, attempt);
                tracing::warn!(
                    "Attempt {}/{} failed: {}, retrying after {}ms",
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
