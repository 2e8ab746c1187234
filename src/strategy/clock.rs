//! Tick sources for the embedded stepper
//!
//! The embedded stepper has no timer of its own: the host calls `pump` once
//! per frame and the tick source says what time that frame represents.

use std::time::{Duration, Instant};

/// Default simulated frame length (60 Hz)
pub const DEFAULT_FRAME: Duration = Duration::from_nanos(16_666_667);

/// Host-provided notion of time, relative to when the source was created
pub trait TickSource: Send {
    /// Advance to the next host tick and return its timestamp
    fn tick(&mut self) -> Duration;

    /// Timestamp of the most recent tick
    fn now(&self) -> Duration;
}

/// Wall-clock time; each tick reads the real elapsed time
#[derive(Debug, Clone)]
pub struct WallClock {
    origin: Instant,
    last: Duration,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: Duration::ZERO,
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for WallClock {
    fn tick(&mut self) -> Duration {
        self.last = self.origin.elapsed();
        self.last
    }

    fn now(&self) -> Duration {
        self.last
    }
}

/// Simulated time; every tick advances by a fixed frame length
#[derive(Debug, Clone)]
pub struct FixedStepClock {
    frame: Duration,
    elapsed: Duration,
}

impl FixedStepClock {
    pub fn new(frame: Duration) -> Self {
        Self {
            frame,
            elapsed: Duration::ZERO,
        }
    }

    /// 60 Hz simulated frames
    pub fn sixty_hz() -> Self {
        Self::new(DEFAULT_FRAME)
    }

    pub fn frame(&self) -> Duration {
        self.frame
    }
}

impl Default for FixedStepClock {
    fn default() -> Self {
        Self::sixty_hz()
    }
}

impl TickSource for FixedStepClock {
    fn tick(&mut self) -> Duration {
        self.elapsed += self.frame;
        self.elapsed
    }

    fn now(&self) -> Duration {
        self.elapsed
    }
}
