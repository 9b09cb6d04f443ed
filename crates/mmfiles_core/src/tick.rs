//! Tick generation.

use crate::types::{Tick, TICK_MASK};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic source of marker ticks.
///
/// Every engine owns one clock. Scans of existing files feed the largest
/// tick they see back into the clock with [`TickClock::observe`], so ticks
/// handed out after a restart never collide with ticks already on disk.
#[derive(Debug, Default)]
pub struct TickClock {
    current: AtomicU64,
}

impl TickClock {
    /// Creates a clock whose next tick is `start + 1`.
    #[must_use]
    pub fn new(start: Tick) -> Self {
        Self {
            current: AtomicU64::new(start & TICK_MASK),
        }
    }

    /// Returns a fresh tick, strictly greater than every tick seen so far.
    pub fn next(&self) -> Tick {
        (self.current.fetch_add(1, Ordering::AcqRel) + 1) & TICK_MASK
    }

    /// Returns the largest tick handed out or observed.
    #[must_use]
    pub fn current(&self) -> Tick {
        self.current.load(Ordering::Acquire)
    }

    /// Raises the clock to at least `tick`.
    pub fn observe(&self, tick: Tick) {
        self.current.fetch_max(tick & TICK_MASK, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn next_is_monotonic() {
        let clock = TickClock::new(10);
        assert_eq!(clock.next(), 11);
        assert_eq!(clock.next(), 12);
        assert_eq!(clock.current(), 12);
    }

    #[test]
    fn observe_never_lowers() {
        let clock = TickClock::new(100);
        clock.observe(50);
        assert_eq!(clock.current(), 100);
        clock.observe(500);
        assert_eq!(clock.next(), 501);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        let clock = Arc::new(TickClock::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..1000).map(|_| clock.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Tick> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
