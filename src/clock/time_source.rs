use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::media::TimeUnit;

/// Free-running monotonic time source shared by one pipeline instance.
#[derive(Debug)]
pub struct MediaClock {
    origin: Instant,
    offset: AtomicI64,
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock {
    /// Starts counting from zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: AtomicI64::new(0),
        }
    }

    pub fn now(&self) -> TimeUnit {
        self.elapsed() + self.offset.load(Ordering::Acquire)
    }

    pub fn set_current_time(&self, time: TimeUnit) {
        self.offset.store(time - self.elapsed(), Ordering::Release);
    }

    fn elapsed(&self) -> TimeUnit {
        // 100ns ticks
        (self.origin.elapsed().as_nanos() / 100) as TimeUnit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_is_monotonic() {
        let clock = MediaClock::new();
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
    }

    #[test]
    fn test_set_current_time_rebases() {
        let clock = MediaClock::new();
        clock.set_current_time(50_000_000);
        let now = clock.now();
        assert!(now >= 50_000_000);
        assert!(now < 60_000_000);
    }
}
