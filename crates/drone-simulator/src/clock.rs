//! Shared simulated clock.

use chrono::{Duration, NaiveTime};
use std::sync::{PoisonError, RwLock};

/// Time of day shared by the dispatcher and every drone.
///
/// Any number of readers proceed concurrently; an advance holds the write
/// lock only for the update itself. The clock never moves backwards and
/// stops at the last instant of the day instead of wrapping to midnight.
#[derive(Debug)]
pub struct SimClock {
    time: RwLock<NaiveTime>,
}

impl SimClock {
    pub fn new(start: NaiveTime) -> Self {
        Self {
            time: RwLock::new(start),
        }
    }

    /// Snapshot of the current simulated time.
    pub fn now(&self) -> NaiveTime {
        *self.time.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance by `delta` and return the new time. Negative deltas are ignored.
    pub fn advance(&self, delta: Duration) -> NaiveTime {
        let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
        if delta <= Duration::zero() {
            return *time;
        }

        let (next, wrapped_secs) = time.overflowing_add_signed(delta);
        *time = if wrapped_secs == 0 {
            next
        } else {
            NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(*time)
        };
        *time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_advance_moves_forward() {
        let clock = SimClock::new(at(7, 47, 54));
        assert_eq!(clock.advance(Duration::seconds(6)), at(7, 48, 0));
        assert_eq!(clock.now(), at(7, 48, 0));
    }

    #[test]
    fn test_non_decreasing() {
        let clock = SimClock::new(at(8, 0, 0));
        let mut previous = clock.now();
        for delta in [0, 1, 5, -3, 0, 60, -100, 2] {
            clock.advance(Duration::seconds(delta));
            let now = clock.now();
            assert!(now >= previous, "{now} < {previous}");
            previous = now;
        }
        assert_eq!(previous, at(8, 1, 8));
    }

    #[test]
    fn test_does_not_wrap_past_midnight() {
        let clock = SimClock::new(at(23, 59, 50));
        let end = clock.advance(Duration::seconds(30));
        assert!(end > at(23, 59, 59));
        assert_eq!(clock.advance(Duration::seconds(1)), end);
    }

    #[test]
    fn test_concurrent_readers_see_monotonic_time() {
        let clock = Arc::new(SimClock::new(at(8, 0, 0)));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    let mut previous = clock.now();
                    for _ in 0..10_000 {
                        let now = clock.now();
                        assert!(now >= previous);
                        previous = now;
                    }
                })
            })
            .collect();

        for _ in 0..1_000 {
            clock.advance(Duration::seconds(1));
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(clock.now(), at(8, 16, 40));
    }
}
