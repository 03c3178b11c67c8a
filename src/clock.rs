//! Per-side countdown clocks.
//!
//! The clock has no scheduler of its own: the session runtime owns the tick
//! source and forwards one [`ClockPair::tick`] per interval while the session
//! is active.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Side;

/// Default time control: ten minutes per side, in whole seconds.
pub const DEFAULT_TIME_SECONDS: u32 = 600;

/// Result of advancing the clock by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Time remains; the game continues.
    Running,
    /// The ticked side's time reached zero. Terminal: the session must finish
    /// with the opposite side as winner.
    FlagFall,
}

/// Remaining time for both sides. Both values are non-negative; exactly one
/// decreases per tick, selected by the active side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockPair {
    white_remaining: u32,
    black_remaining: u32,
}

impl ClockPair {
    /// Both sides start with the given number of seconds.
    pub fn new(initial: u32) -> Self {
        Self {
            white_remaining: initial,
            black_remaining: initial,
        }
    }

    /// Remaining seconds for the given side.
    pub fn remaining(&self, side: Side) -> u32 {
        match side {
            Side::White => self.white_remaining,
            Side::Black => self.black_remaining,
        }
    }

    /// White's remaining seconds.
    pub fn white_remaining(&self) -> u32 {
        self.white_remaining
    }

    /// Black's remaining seconds.
    pub fn black_remaining(&self) -> u32 {
        self.black_remaining
    }

    /// Decrements the given side by one second and reports flag-fall when it
    /// reaches zero. Ticking a side already at zero is a no-op that still
    /// reports [`TickResult::FlagFall`]; the session should already have
    /// finished by then.
    pub fn tick(&mut self, side: Side) -> TickResult {
        let remaining = match side {
            Side::White => &mut self.white_remaining,
            Side::Black => &mut self.black_remaining,
        };
        if *remaining == 0 {
            warn!(%side, "Tick on an exhausted clock");
            return TickResult::FlagFall;
        }
        *remaining -= 1;
        if *remaining == 0 {
            debug!(%side, "Flag fell");
            TickResult::FlagFall
        } else {
            TickResult::Running
        }
    }
}

impl Default for ClockPair {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_decrements_only_the_given_side() {
        let mut clocks = ClockPair::new(10);
        assert_eq!(clocks.tick(Side::White), TickResult::Running);
        assert_eq!(clocks.remaining(Side::White), 9);
        assert_eq!(clocks.remaining(Side::Black), 10);
    }

    #[test]
    fn reaching_zero_is_flag_fall() {
        let mut clocks = ClockPair::new(1);
        assert_eq!(clocks.tick(Side::Black), TickResult::FlagFall);
        assert_eq!(clocks.remaining(Side::Black), 0);
    }

    #[test]
    fn exhausted_clock_never_goes_negative() {
        let mut clocks = ClockPair::new(1);
        clocks.tick(Side::White);
        assert_eq!(clocks.tick(Side::White), TickResult::FlagFall);
        assert_eq!(clocks.remaining(Side::White), 0);
    }
}
