use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::AppError;

/// Only decision-service and I/O failures are worth another attempt; bad
/// input, missing rows and store errors fail the same way every time.
pub fn is_retryable(err: &AppError) -> bool {
    match err {
        AppError::Service(message) => is_retryable_message(message),
        AppError::Io(io) => is_retryable_message(&io.to_string()),
        _ => false,
    }
}

fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains("cancelled")
        || lower.contains("unauthorized")
        || lower.contains("bad request")
        || lower.contains("permission")
    {
        return false;
    }

    // client errors stay failed, except timeouts, conflicts and rate limits
    match extract_http_status_code(&lower) {
        Some(status) if (400..500).contains(&status) => matches!(status, 408 | 409 | 429),
        _ => true,
    }
}

fn extract_http_status_code(message: &str) -> Option<u16> {
    for token in message.split(|c: char| !c.is_ascii_digit()) {
        if token.len() != 3 {
            continue;
        }
        let Ok(status) = token.parse::<u16>() else {
            continue;
        };
        if (100..600).contains(&status) {
            return Some(status);
        }
    }
    None
}

pub fn backoff_duration(attempt: usize) -> Duration {
    let exponent = (attempt.saturating_sub(1)).min(5) as u32;
    let base = 250u64
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(5_000u64);
    let jitter_seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter = jitter_seed % 250;
    Duration::from_millis(base + jitter)
}

/// Runs `op` up to `attempts` times. Delays start at 250 ms and double per
/// attempt, capped at 5 s, plus up to 250 ms of jitter. Errors that
/// [`is_retryable`] rejects are returned immediately.
pub async fn with_retry<T, F, Fut>(attempts: usize, label: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = attempts.max(1);
    let mut last_error: Option<AppError> = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let err_text = err.to_string();
                if attempt >= attempts || !is_retryable(&err) {
                    if attempt > 1 {
                        return Err(AppError::Service(format!(
                            "{label} failed after {attempt} attempts: {err_text}"
                        )));
                    }
                    return Err(err);
                }

                let delay = backoff_duration(attempt);
                tracing::debug!(label, attempt, delay_ms = delay.as_millis() as u64, error = %err_text, "retrying");
                last_error = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| AppError::Service(format!("{label} failed with unknown error"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn client_errors_are_not_retried() {
        let service = |msg: &str| AppError::Service(msg.to_string());
        assert!(!is_retryable(&service("ollama error (401 Unauthorized): denied")));
        assert!(!is_retryable(&service("ollama error (404 Not Found): model missing")));
        assert!(!is_retryable(&service("request cancelled")));
        assert!(is_retryable(&service("ollama error (429 Too Many Requests): slow down")));
        assert!(is_retryable(&service("ollama error (503 Service Unavailable): loading")));
        assert!(is_retryable(&service("ollama request failed: connection reset")));
    }

    #[test]
    fn only_service_and_io_failures_retry() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(is_retryable(&AppError::Io(io)));
        assert!(!is_retryable(&AppError::Planner("status 503".into())));
        assert!(!is_retryable(&AppError::Validation(vec!["bad".into()])));
        assert!(!is_retryable(&AppError::NotFound("job".into())));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_duration(1);
        assert!(first >= Duration::from_millis(250) && first < Duration::from_millis(500));
        let third = backoff_duration(3);
        assert!(third >= Duration::from_millis(1_000) && third < Duration::from_millis(1_250));
        let capped = backoff_duration(20);
        assert!(capped >= Duration::from_millis(5_000) && capped < Duration::from_millis(5_250));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(3, "duplicate decision", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::Service("status 503".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AppError> = with_retry(5, "version confirmation", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Service("HTTP 400 bad request".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
