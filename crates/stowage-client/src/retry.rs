//! Response classification and retry policy.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;

use crate::config::ClientConfig;
use crate::error::ServiceError;

/// Error codes that mean the signature or credentials were rejected.
pub const FATAL_CODES: &[&str] = &[
    "SignatureDoesNotMatch",
    "InvalidAccessKeyId",
    "InvalidClientTokenId",
    "IncompleteSignature",
    "AuthFailure",
    "MissingAuthenticationToken",
];

/// Outcome class of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 2xx.
    Success,
    /// 5xx or throttling; worth retrying.
    RetryableServerFault,
    /// Connection reset, timeout or pool exhaustion; worth retrying.
    RetryableTransportFault,
    /// 4xx other than throttling; surfaced immediately.
    NonRetryableClientFault,
    /// Signature or credential rejection; retrying cannot help.
    Fatal,
}

impl Classification {
    /// Whether another attempt may be made.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RetryableServerFault | Self::RetryableTransportFault)
    }
}

/// Decides whether a service error is a throttling signal.
pub trait ThrottlePredicate: Send + Sync + fmt::Debug {
    /// Whether `(status, code)` means the caller is being rate limited.
    fn is_throttle(&self, status: StatusCode, code: &str) -> bool;
}

/// HTTP 429 or one of a configured set of error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeListThrottle {
    codes: Vec<String>,
}

impl CodeListThrottle {
    /// Treat the given codes as throttling.
    #[must_use]
    pub fn new(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl ThrottlePredicate for CodeListThrottle {
    fn is_throttle(&self, status: StatusCode, code: &str) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || self.codes.iter().any(|c| c == code)
    }
}

/// Retry budget and backoff of a client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Throttling detection.
    pub throttle: Arc<dyn ThrottlePredicate>,
}

impl RetryPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            throttle: Arc::new(CodeListThrottle::new(config.throttling_codes.iter().cloned())),
        }
    }

    /// Delay before the retry that follows attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Classify a service error response.
    #[must_use]
    pub fn classify(&self, error: &ServiceError) -> Classification {
        if error.status.is_success() {
            Classification::Success
        } else if FATAL_CODES.contains(&error.code.as_str()) {
            Classification::Fatal
        } else if self.is_throttle(error) || error.status.is_server_error() {
            Classification::RetryableServerFault
        } else {
            Classification::NonRetryableClientFault
        }
    }

    /// Whether the error is a throttling signal.
    #[must_use]
    pub fn is_throttle(&self, error: &ServiceError) -> bool {
        self.throttle.is_throttle(error.status, &error.code)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Retry bookkeeping of one logical call.
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts started so far.
    pub attempt_count: u32,
    /// Classification of the last failed attempt.
    pub last_error_kind: Option<Classification>,
    max_attempts: u32,
    started: Instant,
}

impl RetryState {
    /// Fresh state for a call allowed `max_retries` retries.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempt_count: 0,
            last_error_kind: None,
            max_attempts: max_retries.saturating_add(1),
            started: Instant::now(),
        }
    }

    /// Record the start of an attempt and return its number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, kind: Classification) {
        self.last_error_kind = Some(kind);
    }

    /// Whether another attempt is within budget.
    #[must_use]
    pub fn has_budget(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Time since the call started.
    #[must_use]
    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
