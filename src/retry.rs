//! Retry support for transient backend failures.
//!
//! Used by the ephemeral-credential fetch: a call attempt should survive a
//! blip on the network or a momentary 5xx without surfacing an error.

use std::future::Future;
use std::time::Duration;

/// Classification of transient retry causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Connect,
    Timeout,
    RateLimited,
    ServerError,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
        }
    }
}

/// Retry decision for one attempt result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        reason: RetryReason,
        retry_after: Option<Duration>,
    },
    DoNotRetry,
}

/// Metadata for one scheduled retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
    pub reason: RetryReason,
}

/// Strategy for retrying transient failures with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first request.
    pub max_attempts: u32,
    /// Base delay for the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap for later retries.
    pub max_delay: Duration,
    /// Jitter ratio (0.0..=1.0) applied to delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter_ratio: 0.20,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay for the given retry index (1-based).
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let shift = retry_index.saturating_sub(1).min(31);
        let multiplier = 1u32 << shift;
        let base = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        base.min(self.max_delay)
    }

    /// Apply jitter to a delay using a symmetric random range.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let spread = millis * ratio;
        let low = (millis - spread).max(0.0);
        let high = millis + spread;
        let sampled = if high <= low {
            low
        } else {
            rand::random::<f64>() * (high - low) + low
        };
        Duration::from_millis(sampled.round() as u64)
    }
}

/// Parse `Retry-After` header value as a delay.
///
/// Supports delta-seconds (`Retry-After: 5`) and HTTP-date forms.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if let Ok(when) = httpdate::parse_http_date(raw) {
        let now = std::time::SystemTime::now();
        if let Ok(delay) = when.duration_since(now) {
            return Some(delay);
        }
        return Some(Duration::from_secs(0));
    }

    None
}

/// Classify a reqwest result into retry/no-retry.
pub fn classify_reqwest_result(
    result: &std::result::Result<reqwest::Response, reqwest::Error>,
) -> RetryDecision {
    match result {
        Ok(resp) => {
            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return RetryDecision::Retry {
                    reason: RetryReason::RateLimited,
                    retry_after: parse_retry_after(resp.headers()),
                };
            }
            if status == reqwest::StatusCode::REQUEST_TIMEOUT {
                return RetryDecision::Retry {
                    reason: RetryReason::Timeout,
                    retry_after: parse_retry_after(resp.headers()),
                };
            }
            if status.is_server_error() {
                return RetryDecision::Retry {
                    reason: RetryReason::ServerError,
                    retry_after: parse_retry_after(resp.headers()),
                };
            }
            RetryDecision::DoNotRetry
        }
        Err(err) => {
            if err.is_timeout() {
                return RetryDecision::Retry {
                    reason: RetryReason::Timeout,
                    retry_after: None,
                };
            }
            if err.is_connect() || err.is_request() {
                return RetryDecision::Retry {
                    reason: RetryReason::Connect,
                    retry_after: None,
                };
            }
            RetryDecision::DoNotRetry
        }
    }
}

/// Retry an async operation with backoff according to `policy`.
///
/// - `operation(attempt)` is called with a 1-based attempt number.
/// - `classify(result)` decides whether to retry.
/// - `on_retry(info)` is called right before sleeping.
pub async fn retry_with_backoff<T, E, Op, Fut, Classify, OnRetry>(
    policy: &RetryPolicy,
    mut operation: Op,
    mut classify: Classify,
    mut on_retry: OnRetry,
) -> std::result::Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    Classify: FnMut(&std::result::Result<T, E>) -> RetryDecision,
    OnRetry: FnMut(RetryAttempt),
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let result = operation(attempt).await;
        let decision = if attempt < max_attempts {
            classify(&result)
        } else {
            RetryDecision::DoNotRetry
        };

        match (decision, result) {
            (RetryDecision::Retry { reason, retry_after }, _) => {
                let backoff = policy.backoff_delay(attempt);
                let base_delay = retry_after.unwrap_or(backoff);
                let delay = policy.with_jitter(base_delay);
                on_retry(RetryAttempt {
                    attempt,
                    delay,
                    reason,
                });
                tokio::time::sleep(delay).await;
            }
            (RetryDecision::DoNotRetry, final_result) => return final_result,
        }
    }

    unreachable!("retry loop always returns");
}
