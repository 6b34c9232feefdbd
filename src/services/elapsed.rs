//! Wall-clock-anchored elapsed time
//!
//! Elapsed time is derived from the journey's start timestamp on every
//! tick, never from a tick counter, so a stalled or jittery timer cannot
//! drift the value. The tick cadence is owned by the caller.

/// Elapsed-seconds clock for a single journey
#[derive(Debug, Default)]
pub struct ElapsedClock {
    anchor_ms: Option<u64>,
    seconds: u64,
}

impl ElapsedClock {
    pub fn new() -> Self {
        Self { anchor_ms: None, seconds: 0 }
    }

    /// Anchor the clock at `now_ms` and restart from zero.
    pub fn start(&mut self, now_ms: u64) {
        self.anchor_ms = Some(now_ms);
        self.seconds = 0;
    }

    /// Recompute elapsed whole seconds from the anchor.
    ///
    /// After `stop()` this keeps returning the frozen value.
    pub fn tick(&mut self, now_ms: u64) -> u64 {
        if let Some(anchor_ms) = self.anchor_ms {
            self.seconds = now_ms.saturating_sub(anchor_ms) / 1000;
        }
        self.seconds
    }

    /// Freeze the last computed value; further ticks are no-ops.
    pub fn stop(&mut self) {
        self.anchor_ms = None;
    }

    /// Back to zero, unanchored.
    pub fn reset(&mut self) {
        self.anchor_ms = None;
        self.seconds = 0;
    }

    /// Last computed elapsed seconds.
    #[inline]
    pub fn seconds(&self) -> u64 {
        self.seconds
    }
}
