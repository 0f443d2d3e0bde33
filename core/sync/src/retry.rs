//! Retry scheduling with exponential backoff.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SyncConfig;
use crate::state::QueueItem;

/// Whether a pending item may be dispatched now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Dispatch in this cycle.
    Eligible,
    /// Backoff has not elapsed; `wait` remains.
    TooSoon { wait: Duration },
    /// Retry ceiling reached; never dispatch again.
    Exhausted,
}

/// Backoff and ceiling rules for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after the first failure, in minutes.
    pub base_minutes: u64,
    /// Multiplier applied per failed attempt.
    pub exponent_base: u32,
}

impl RetryPolicy {
    pub fn new(base_minutes: u64, exponent_base: u32) -> Self {
        Self {
            base_minutes,
            exponent_base,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.retry_backoff_base_minutes, config.retry_exponent_base)
    }

    /// Minimum wait after `retry_count` failures: `base * exponent_base^retry_count` minutes.
    ///
    /// Saturates instead of overflowing for large counts.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = u64::from(self.exponent_base)
            .checked_pow(retry_count)
            .unwrap_or(u64::MAX);
        let minutes = self.base_minutes.saturating_mul(factor);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// Decide eligibility from raw bookkeeping.
    pub fn decide_at(
        &self,
        retry_count: u32,
        max_retries: u32,
        last_attempt: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if retry_count >= max_retries {
            return RetryDecision::Exhausted;
        }

        let Some(last_attempt) = last_attempt else {
            return RetryDecision::Eligible;
        };

        // A clock that moved backwards counts as no time elapsed.
        let elapsed = (now - last_attempt).to_std().unwrap_or(Duration::ZERO);
        let required = self.backoff_for(retry_count);
        if elapsed < required {
            RetryDecision::TooSoon {
                wait: required - elapsed,
            }
        } else {
            RetryDecision::Eligible
        }
    }

    /// Decide eligibility of a queue item at `now`.
    pub fn decide(&self, item: &QueueItem, now: DateTime<Utc>) -> RetryDecision {
        self.decide_at(
            item.retry_count(),
            item.max_retries(),
            item.last_attempt(),
            now,
        )
    }

    /// Shorthand for `decide(..) == Eligible`.
    pub fn should_retry(&self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        self.decide(item, now) == RetryDecision::Eligible
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
