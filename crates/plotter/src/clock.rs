use std::time::{Duration, Instant};

/// A monotonic time source that the control loops sleep on.
///
/// Every wait in the plotter goes through this trait, so the simulator can
/// run whole drawings in virtual time.
pub trait Clock {
    /// Time elapsed since some fixed starting point.
    fn now(&self) -> Duration;

    fn sleep(&mut self, duration: Duration);
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
