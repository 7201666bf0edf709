//! Retry classification and exponential backoff for OAI-PMH exchanges.
//!
//! A failed attempt is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether another attempt is made and how long
//! to wait before it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use oai_mirror::transport::{RetryDecision, RetryPolicy, FailureType};
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1), 2.0);
//! assert!(matches!(
//!     policy.should_retry(FailureType::Transient, 1),
//!     RetryDecision::Retry { attempt: 2, .. }
//! ));
//! assert!(matches!(
//!     policy.should_retry(FailureType::Permanent, 1),
//!     RetryDecision::DoNotRetry { .. }
//! ));
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::TransportError;

/// Default maximum attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Upper bound for a server-requested `Retry-After` delay.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry: network errors, timeouts, 408 and 5xx.
    Transient,

    /// Will not succeed on retry: other 4xx, TLS problems, bad envelopes,
    /// protocol errors.
    Permanent,

    /// HTTP 429; retried, honoring `Retry-After` when present.
    RateLimited,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The attempt number about to be made (1-indexed).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry budget with exponential backoff and jitter.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
///
/// Defaults: 3 attempts, 1s base, 32s cap, multiplier 2.0, up to 500ms jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Creates a default policy with a custom attempt count.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Sets the upper bound of the random jitter added to each delay.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a transport error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | other HTTP 4xx | Permanent |
/// | Timeout | Transient |
/// | Network (TLS) | Permanent |
/// | Network (other) | Transient |
/// | Decode, Protocol, Request, Client | Permanent |
#[must_use]
pub fn classify_error(error: &TransportError) -> FailureType {
    match error {
        TransportError::HttpStatus { status, .. } => classify_http_status(*status),
        TransportError::Timeout { .. } => FailureType::Transient,
        TransportError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        TransportError::Request(_)
        | TransportError::Decode { .. }
        | TransportError::Protocol(_)
        | TransportError::DeadlineExceeded { .. }
        | TransportError::Cancelled { .. }
        | TransportError::Client(_) => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("certificate")
        || message.contains("tls")
        || message.contains("ssl")
        || message.contains("handshake")
}

/// Parses a `Retry-After` header value, either delay seconds or an
/// HTTP-date. Values above one hour are capped; dates in the past yield
/// zero.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<u64>() {
        let duration = Duration::from_secs(seconds);
        if duration > MAX_RETRY_AFTER {
            warn!(seconds, "Retry-After exceeds maximum, capping at 1 hour");
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}
