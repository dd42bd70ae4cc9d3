//! LLM error types with retry classification.
//!
//! Distinguishes between transient errors (retried with backoff) and permanent
//! errors (surfaced immediately to the calling stage).

use std::future::Future;
use std::time::{Duration, Instant};

/// Error from LLM API calls.
#[derive(Debug)]
pub struct LlmError {
    /// The kind of error
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn of(kind: LlmErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::of(LlmErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status_code: u16, message: String) -> Self {
        Self::of(LlmErrorKind::ServerError, Some(status_code), message)
    }

    /// Bad request, auth, unknown model.
    pub fn client_error(status_code: u16, message: String) -> Self {
        Self::of(LlmErrorKind::ClientError, Some(status_code), message)
    }

    pub fn network_error(message: String) -> Self {
        Self::of(LlmErrorKind::NetworkError, None, message)
    }

    /// The endpoint answered, but not with what we asked for.
    pub fn parse_error(message: String) -> Self {
        Self::of(LlmErrorKind::ParseError, None, message)
    }

    /// Build an error from an HTTP status and response body.
    pub fn from_status(status_code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match classify_http_status(status_code) {
            LlmErrorKind::RateLimited => Self::rate_limited(body.to_string(), retry_after),
            LlmErrorKind::ClientError => Self::client_error(status_code, body.to_string()),
            _ => Self::server_error(status_code, body.to_string()),
        }
    }

    /// Build an error from a transport failure.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network_error(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            Self::network_error(format!("Connection failed: {}", e))
        } else {
            Self::network_error(format!("Request failed: {}", e))
        }
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Get the suggested delay before retry.
    ///
    /// Returns the `retry_after` if set, otherwise `base * 2^attempt` plus a
    /// deterministic jitter of up to 25%, capped at `max_delay`.
    pub fn suggested_delay(&self, attempt: u32, base: Duration, max_delay: Duration) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after.min(max_delay);
        }

        // Rate limits start higher
        let base_ms = match self.kind {
            LlmErrorKind::RateLimited => base.as_millis() as u64 * 2,
            _ => base.as_millis() as u64,
        };

        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        let jitter_range = delay_ms / 4;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7) % jitter_range
        } else {
            0
        };

        Duration::from_millis(delay_ms.saturating_add(jitter)).min(max_delay)
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Rate limited (429) - transient, should retry with backoff
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient, should retry
    ServerError,
    /// Client error (400, 401, 403, 404) - permanent, should not retry
    ClientError,
    /// Network error (connection failed, timeout) - transient, should retry
    NetworkError,
    /// Response did not match the expected shape - permanent
    ParseError,
}

impl LlmErrorKind {
    /// Check if this error kind is transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::RateLimited => write!(f, "Rate limited"),
            LlmErrorKind::ServerError => write!(f, "Server error"),
            LlmErrorKind::ClientError => write!(f, "Client error"),
            LlmErrorKind::NetworkError => write!(f, "Network error"),
            LlmErrorKind::ParseError => write!(f, "Parse error"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
    /// First backoff step
    pub base_delay: Duration,
    /// Upper bound for a single backoff step
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Check if the given error should be retried based on this config.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500 | 502 | 503 | 504 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Run `call` until it succeeds, fails permanently, or the retry budget is spent.
pub async fn execute_with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut call: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(
                        operation,
                        retries = attempt,
                        elapsed = ?start.elapsed(),
                        "LLM request succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                if !config.should_retry(&error, attempt) {
                    if attempt > 0 {
                        tracing::error!(
                            operation,
                            retries = attempt,
                            elapsed = ?start.elapsed(),
                            "LLM request failed after retries: {}",
                            error
                        );
                    } else {
                        tracing::error!(operation, "LLM request failed: {}", error);
                    }
                    return Err(error);
                }

                let delay = error.suggested_delay(attempt, config.base_delay, config.max_delay);
                let remaining = config.max_retry_duration.saturating_sub(start.elapsed());
                let actual_delay = delay.min(remaining);

                if actual_delay.is_zero() {
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        "Retry budget exhausted: {}",
                        error
                    );
                    return Err(error);
                }

                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    kind = %error.kind,
                    delay = ?actual_delay,
                    "LLM request failed, retrying: {}",
                    error.message
                );

                tokio::time::sleep(actual_delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(5),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmErrorKind::RateLimited.is_transient());
        assert!(LlmErrorKind::ServerError.is_transient());
        assert!(LlmErrorKind::NetworkError.is_transient());
        assert!(!LlmErrorKind::ClientError.is_transient());
        assert!(!LlmErrorKind::ParseError.is_transient());
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
    }

    #[test]
    fn test_exponential_backoff() {
        let error = LlmError::server_error(502, "bad gateway".to_string());
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);

        let delay_0 = error.suggested_delay(0, base, cap);
        let delay_1 = error.suggested_delay(1, base, cap);
        let delay_2 = error.suggested_delay(2, base, cap);

        assert!(delay_1 > delay_0);
        assert!(delay_2 > delay_1);
        assert!(error.suggested_delay(10, base, cap) <= cap);
    }

    #[test]
    fn test_retry_after_respected() {
        let error = LlmError::rate_limited("slow down".to_string(), Some(Duration::from_secs(30)));
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);

        assert_eq!(error.suggested_delay(0, base, cap), Duration::from_secs(30));
        assert_eq!(error.suggested_delay(5, base, cap), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = execute_with_retry(&fast_retry(), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LlmError::server_error(503, "unavailable".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LlmError> = execute_with_retry(&fast_retry(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::network_error("reset".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err().kind, LlmErrorKind::NetworkError);
        // one call plus max_retries retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LlmError> = execute_with_retry(&fast_retry(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::parse_error("not json".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
