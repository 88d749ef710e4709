//! Backoff schedule for generation polling

use crate::config::PollPolicy;
use std::time::Duration;

/// Endless sequence of growing delays, capped at the policy's max interval
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: &PollPolicy) -> Self {
        Self {
            next: policy.initial_interval.min(policy.max_interval),
            multiplier: policy.multiplier.max(1.0),
            max: policy.max_interval,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.next = grown.min(self.max);
        Some(current)
    }
}
