use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<i64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
        .and_then(|d| {
            i64::try_from(d.as_millis())
                .map_err(|_| CoreError::InvalidData("system clock out of range".into()))
        })
}

/// Wall-clock millisecond source that never repeats or goes backwards, so
/// timestamps taken in sequence order the same way the events did.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp: physical time, or one past the previous tick if the
    /// physical clock has not moved forward.
    pub fn tick(&self) -> Result<i64, CoreError> {
        let now = physical_now()?;
        let mut prev = self.last_ms.load(Ordering::Relaxed);
        loop {
            let next = if now > prev { now } else { prev + 1 };
            match self
                .last_ms
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn tick_monotonicity() {
        let clock = MonotonicClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..1000 {
            let next = clock.tick().unwrap();
            assert!(next > prev, "expected {next} > {prev}");
            prev = next;
        }
    }

    #[test]
    fn tick_follows_future_last_value() {
        let clock = MonotonicClock::new();
        let future_ms = physical_now().unwrap() + 100_000;
        clock.last_ms.store(future_ms, Ordering::Relaxed);

        assert_eq!(clock.tick().unwrap(), future_ms + 1);
        assert_eq!(clock.tick().unwrap(), future_ms + 2);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..250).map(|_| clock.tick().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
