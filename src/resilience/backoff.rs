//! Idle backoff and retry delay growth.

use std::time::Duration;
use rand::Rng;

/// Delay between refill cycles that found nothing to send.
///
/// Delays follow the Fibonacci sequence starting at (0, 1), scaled by
/// `unit` and capped at `max`: 0, 1, 1, 2, 3, 5, 8, ...
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    unit: Duration,
    max: Duration,
    window: (u64, u64),
}

impl IdleBackoff {
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            unit,
            max,
            window: (0, 1),
        }
    }

    /// Delay to apply now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let (prev, cur) = self.window;
        let delay = self.scaled(prev);

        // stop sliding once the cap is reached so the window never overflows
        if delay < self.max {
            self.window = (cur, prev.saturating_add(cur));
        }

        delay
    }

    /// Delay the next idle cycle would get, without advancing.
    pub fn peek(&self) -> Duration {
        self.scaled(self.window.0)
    }

    pub fn reset(&mut self) {
        self.window = (0, 1);
    }

    fn scaled(&self, steps: u64) -> Duration {
        let ms = (self.unit.as_millis() as u64).saturating_mul(steps);
        Duration::from_millis(ms).min(self.max)
    }
}

/// Next retry delay before jitter: the floor on the first retry, then
/// the previous delay times `multiplier`, bounded by `[floor, max]`.
pub fn retry_delay(previous: Option<Duration>, floor: Duration, multiplier: f64, max: Duration) -> Duration {
    let next = match previous {
        None => floor,
        Some(prev) => Duration::from_secs_f64((prev.as_secs_f64() * multiplier).min(max.as_secs_f64())),
    };
    next.max(floor).min(max)
}

/// Add up to 10% random jitter to a delay.
pub fn with_jitter(delay: Duration) -> Duration {
    let jitter_range = delay.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    delay + Duration::from_millis(jitter)
}
