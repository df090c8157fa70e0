//! Scroll pacing and retry backoff, expressed as data so the harvester can
//! be driven by a fake clock in tests.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PacingPolicy {
    /// Wait after navigation before the first extraction.
    pub settle_after_load: Duration,
    /// Scroll increments issued per cycle.
    pub scroll_steps: u32,
    /// Pixels per scroll increment.
    pub step_distance_px: u32,
    /// Pause after each increment.
    pub step_pause: Duration,
    /// Extract on every Nth increment while scrolling.
    pub extract_every: u32,
    /// Larger scroll issued at the end of a cycle to trigger loading.
    pub final_nudge_px: u32,
    /// Wait after the final nudge before the closing extraction.
    pub load_wait: Duration,
    /// Upper bound of the random delay added to every pause.
    pub jitter: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            settle_after_load: Duration::from_secs(5),
            scroll_steps: 15,
            step_distance_px: 200,
            step_pause: Duration::from_millis(200),
            extract_every: 4,
            final_nudge_px: 500,
            load_wait: Duration::from_secs(4),
            jitter: Duration::ZERO,
        }
    }
}

impl PacingPolicy {
    /// `base` plus a uniformly random share of the jitter bound.
    pub fn jittered(&self, base: Duration) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=max_ms);
        base + Duration::from_millis(extra)
    }

    /// Whether an intermediate extraction runs after increment `step`.
    pub fn extracts_at(&self, step: u32) -> bool {
        self.extract_every > 0 && step % self.extract_every == 0
    }

    /// Distance covered by one full scroll cycle.
    pub fn cycle_distance_px(&self) -> u32 {
        self.scroll_steps * self.step_distance_px + self.final_nudge_px
    }
}

/// Bounded retries with linear backoff (`attempt * base_delay`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub fn has_more(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }
}
