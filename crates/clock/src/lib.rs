use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Number of picoseconds in one second.
const PICOS_PER_SEC: u64 = 1_000_000_000_000;

/// Clock is a monotonic tick source shared by all workers of the process.
///
/// Ticks are an opaque monotonic unit; callers convert to and from wall
/// durations through the per-Clock rates (`ticks_per_sec`, `ticks_per_ms`,
/// `picosec_per_tick`). All flow-entry timestamps are absolute ticks read
/// from a single Clock, so comparisons between them are meaningful only
/// within one process lifetime.
pub struct Clock {
    start: Instant,
    ticks_per_sec: u64,
    // Largest tick value handed out so far. Readings are clamped to be
    // non-decreasing even if the underlying source misbehaves.
    floor: AtomicU64,
    warned: AtomicBool,
}

impl Clock {
    /// Build a Clock with an explicit tick rate. The rate must divide one
    /// second's worth of picoseconds evenly enough to be useful; rates below
    /// 1KHz are rejected.
    pub fn new(ticks_per_sec: u64) -> Self {
        assert!(
            ticks_per_sec >= 1_000,
            "clock rate {ticks_per_sec} is below 1KHz"
        );
        Self {
            start: Instant::now(),
            ticks_per_sec,
            floor: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Build the process Clock at nanosecond resolution.
    pub fn system() -> Self {
        Self::new(1_000_000_000)
    }

    /// Current monotonic tick. Never decreases for the lifetime of the Clock:
    /// a reading below a previously returned value is clamped to that value
    /// and logged once.
    pub fn now(&self) -> u64 {
        let nanos = self.start.elapsed().as_nanos();
        let raw = (nanos * self.ticks_per_sec as u128 / 1_000_000_000) as u64;

        let prior = self.floor.fetch_max(raw, Ordering::Relaxed);
        if raw < prior {
            if !self.warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(raw, prior, "clock read went backwards; clamping");
            }
            return prior;
        }
        raw
    }

    pub fn ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    pub fn ticks_per_ms(&self) -> u64 {
        self.ticks_per_sec / 1_000
    }

    /// Duration of one tick in picoseconds.
    pub fn picosec_per_tick(&self) -> u64 {
        PICOS_PER_SEC / self.ticks_per_sec
    }

    /// Convert whole seconds into ticks.
    pub fn ticks_from_secs(&self, secs: u64) -> u64 {
        secs * self.ticks_per_sec
    }

    /// Convert whole milliseconds into ticks.
    pub fn ticks_from_millis(&self, millis: u64) -> u64 {
        millis * self.ticks_per_ms()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("ticks_per_sec", &self.ticks_per_sec)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rates() {
        let clock = Clock::new(2_000_000_000);
        assert_eq!(clock.picosec_per_tick(), 500);
        assert_eq!(clock.ticks_per_ms(), 2_000_000);
        assert_eq!(clock.ticks_from_secs(3), 6_000_000_000);
        assert_eq!(clock.ticks_from_millis(100), 200_000_000);

        let clock = Clock::system();
        assert_eq!(clock.picosec_per_tick(), 1_000);
    }

    #[test]
    fn test_monotone_readings() {
        let clock = Clock::system();
        let mut last = 0;
        for _ in 0..10_000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_monotone_across_threads() {
        let clock = std::sync::Arc::new(Clock::system());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..10_000 {
                        let now = clock.now();
                        assert!(now >= last);
                        last = now;
                    }
                    last
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
