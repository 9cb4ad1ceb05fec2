//! Exponential backoff with full jitter.
//!
//! Each step draws uniformly from `(0, min(cap, base * 2^attempt)]`, so a
//! fleet of reconnecting clients never thunders in lockstep.

use rand::Rng;
use std::time::Duration;

#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            attempt: 0,
        }
    }

    /// The next delay; advances the attempt counter.
    pub fn next(&mut self) -> Duration {
        let ceiling = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        let millis = ceiling.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(1..=millis))
    }

    /// Return to the base delay after a period of stable operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
