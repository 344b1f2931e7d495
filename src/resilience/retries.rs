//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a delivery attempt succeeded
//! - Reschedule failed deliveries: one attempt fewer, later `Date`
//!
//! # Design Decisions
//! - Transport errors always count as failures
//! - A response fails only when its status is in X-Later-Retry-On
//! - The new `Date` is measured from the later of now and the previous
//!   `Date`, so a retry never moves a request backwards in time

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ReplayConfig;
use crate::relay::{Outcome, RequestMeta};
use crate::resilience::backoff::{retry_delay, with_jitter};

/// Whether an attempt outcome ends delivery successfully.
pub fn is_success(meta: &RequestMeta, outcome: &Outcome) -> bool {
    match outcome {
        Ok(response) => !meta.retry_on.contains(&response.status_code),
        Err(_) => false,
    }
}

/// Delay schedule applied to failed deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub floor: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self {
            floor: Duration::from_secs(config.retry_floor_secs),
            multiplier: config.retry_multiplier,
            max: Duration::from_secs(config.retry_max_secs),
        }
    }

    /// Metadata for the next attempt after a failure at `now`.
    pub fn schedule(&self, meta: &RequestMeta, now: DateTime<Utc>) -> RequestMeta {
        let delay = retry_delay(meta.retry_after, self.floor, self.multiplier, self.max);
        let wait = chrono::Duration::milliseconds(with_jitter(delay).as_millis() as i64);
        let base = meta.not_before.map_or(now, |at| at.max(now));

        let mut next = meta.clone();
        next.attempts = Some(meta.remaining_attempts().saturating_sub(1));
        next.retry_after = Some(delay);
        next.not_before = Some(base + wait);
        next
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReplayConfig::default())
    }
}
