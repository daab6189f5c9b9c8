//! Monotonic session clock.
//!
//! All game-rule timing (fuses, cooldowns, lifetimes, resend timeouts) is a
//! plain `now >= deadline` comparison on milliseconds since the session
//! epoch. The simulation and transport take `now` as an argument and never
//! read a clock themselves.

use std::time::Instant;

/// Milliseconds on the session's monotonic clock.
pub type Millis = u64;

/// Wall-clock source anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Start a clock at zero.
    pub fn start() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Milliseconds elapsed since `start`.
    pub fn now(&self) -> Millis {
        self.epoch.elapsed().as_millis() as Millis
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

/// `true` once `now` has reached `deadline`.
#[inline]
pub fn reached(now: Millis, deadline: Millis) -> bool {
    now >= deadline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = MonotonicClock::start();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_reached() {
        assert!(reached(100, 100));
        assert!(reached(101, 100));
        assert!(!reached(99, 100));
    }
}
