//! Retry policy engine: classify-agnostic retry-or-shutdown decisions.
//!
//! [`decide`] is a pure function from `(retry_count, policy)` to a
//! [`RecoveryAction`]. It performs no I/O and no logging — the coordinator
//! owning the monitor interprets the action (and logs the resulting delay).
//!
//! All operational failures feed into the engine identically: no error kind
//! short-circuits the policy, and `max_retries = 0` makes every failure
//! fatal for its monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay growth strategy between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Every retry waits the base timeout.
    Fixed,
    /// Retry N (1-indexed) waits `base * N`.
    Linear,
    /// Retry N (1-indexed) waits `base * 2^(N-1)`.
    Exponential,
}

impl BackoffStrategy {
    /// Parse the document's string form. Unknown values are an error,
    /// never a fallback.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!(
                "unknown backoff strategy '{}', expected one of fixed, linear, exponential",
                other
            )),
        }
    }
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Linear => f.write_str("linear"),
            Self::Exponential => f.write_str("exponential"),
        }
    }
}

/// How a monitor's operational failures are retried or abandoned.
///
/// Produced by the config validator; all fields come from the document
/// (no defaults at this layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failures tolerated before shutdown. `None` means unlimited retries;
    /// `Some(0)` means shut down on the first failure.
    pub max_retries: Option<u32>,
    /// Delay growth strategy.
    pub backoff: BackoffStrategy,
    /// Base delay in milliseconds, strictly positive.
    pub retry_timeout: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: Option<u32>, backoff: BackoffStrategy, retry_timeout: u64) -> Self {
        Self {
            max_retries,
            backoff,
            retry_timeout,
        }
    }
}

/// The coordinator's reply to an operational failure, forwarded to the
/// protocol worker as a `recover` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-arm the probe after the given delay.
    Retry { delay: Duration },
    /// Cancel outstanding work and terminate.
    Shutdown,
}

/// Decide how to recover from the failure that just occurred.
///
/// `retry_count` is the number of *prior* failures — the failure being
/// decided is attempt `retry_count + 1`. Shutdown fires once
/// `retry_count >= max_retries`; a policy with `max_retries: None`
/// never shuts down.
///
/// # Example
///
/// ```
/// use argos::policy::{decide, BackoffStrategy, RecoveryAction, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(Some(3), BackoffStrategy::Exponential, 500);
/// assert_eq!(
///     decide(2, &policy),
///     RecoveryAction::Retry { delay: Duration::from_millis(2000) }
/// );
/// assert_eq!(decide(3, &policy), RecoveryAction::Shutdown);
/// ```
pub fn decide(retry_count: u32, policy: &RetryPolicy) -> RecoveryAction {
    if let Some(max) = policy.max_retries {
        if retry_count >= max {
            return RecoveryAction::Shutdown;
        }
    }

    let base = policy.retry_timeout;
    let delay_ms = match policy.backoff {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(u64::from(retry_count) + 1),
        BackoffStrategy::Exponential => {
            // 2^retry_count saturates instead of overflowing on long runs.
            let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
            base.saturating_mul(factor)
        }
    };

    RecoveryAction::Retry {
        delay: Duration::from_millis(delay_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: Option<u32>, backoff: BackoffStrategy, base: u64) -> RetryPolicy {
        RetryPolicy::new(max, backoff, base)
    }

    fn retry_ms(action: RecoveryAction) -> u64 {
        match action {
            RecoveryAction::Retry { delay } => delay.as_millis() as u64,
            RecoveryAction::Shutdown => panic!("expected retry, got shutdown"),
        }
    }

    #[test]
    fn test_fixed_delay_constant() {
        let p = policy(Some(10), BackoffStrategy::Fixed, 1000);
        for count in 0..5 {
            assert_eq!(retry_ms(decide(count, &p)), 1000);
        }
    }

    #[test]
    fn test_linear_delay_grows() {
        let p = policy(Some(10), BackoffStrategy::Linear, 200);
        assert_eq!(retry_ms(decide(0, &p)), 200);
        assert_eq!(retry_ms(decide(1, &p)), 400);
        assert_eq!(retry_ms(decide(2, &p)), 600);
    }

    #[test]
    fn test_exponential_sequence() {
        // base 500: successive failures see 500, 1000, 2000, 4000.
        let p = policy(Some(10), BackoffStrategy::Exponential, 500);
        assert_eq!(retry_ms(decide(0, &p)), 500);
        assert_eq!(retry_ms(decide(1, &p)), 1000);
        assert_eq!(retry_ms(decide(2, &p)), 2000);
        assert_eq!(retry_ms(decide(3, &p)), 4000);
    }

    #[test]
    fn test_zero_max_retries_shuts_down_immediately() {
        let p = policy(Some(0), BackoffStrategy::Linear, 1000);
        assert_eq!(decide(0, &p), RecoveryAction::Shutdown);
    }

    #[test]
    fn test_shutdown_at_exactly_max() {
        let p = policy(Some(3), BackoffStrategy::Fixed, 1000);
        assert!(matches!(decide(2, &p), RecoveryAction::Retry { .. }));
        assert_eq!(decide(3, &p), RecoveryAction::Shutdown);
        assert_eq!(decide(4, &p), RecoveryAction::Shutdown);
    }

    #[test]
    fn test_unlimited_retries_never_shut_down() {
        let p = policy(None, BackoffStrategy::Fixed, 10);
        assert!(matches!(decide(0, &p), RecoveryAction::Retry { .. }));
        assert!(matches!(decide(1_000_000, &p), RecoveryAction::Retry { .. }));
    }

    #[test]
    fn test_exponential_saturates() {
        let p = policy(None, BackoffStrategy::Exponential, 1000);
        // 2^70 would overflow; the delay saturates instead.
        assert_eq!(retry_ms(decide(70, &p)), u64::MAX);
    }

    #[test]
    fn test_decide_is_pure() {
        let p = policy(Some(5), BackoffStrategy::Exponential, 250);
        let first = decide(2, &p);
        let second = decide(2, &p);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(BackoffStrategy::parse("fixed"), Ok(BackoffStrategy::Fixed));
        assert_eq!(BackoffStrategy::parse("linear"), Ok(BackoffStrategy::Linear));
        assert_eq!(
            BackoffStrategy::parse("exponential"),
            Ok(BackoffStrategy::Exponential)
        );
        assert!(BackoffStrategy::parse("quadratic").is_err());
        assert!(BackoffStrategy::parse("Fixed").is_err());
    }

    #[test]
    fn test_strategy_display_round_trips() {
        for s in [
            BackoffStrategy::Fixed,
            BackoffStrategy::Linear,
            BackoffStrategy::Exponential,
        ] {
            assert_eq!(BackoffStrategy::parse(&s.to_string()), Ok(s));
        }
    }
}
