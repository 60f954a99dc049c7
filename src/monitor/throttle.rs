//! Minimum-gap filter for repeated input.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lets an event through only if `min_gap` has passed since the last one
/// that got through. A zero gap lets everything through.
#[derive(Debug)]
pub struct Debounce {
    min_gap_ms: u64,
    origin: Instant,
    // Milliseconds since `origin` + 1 of the last accepted event; 0 = none yet
    last_ms: AtomicU64,
}

impl Debounce {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap_ms: min_gap.as_millis() as u64,
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Checks an event happening now.
    #[inline]
    pub fn allow(&self) -> bool {
        if self.min_gap_ms == 0 {
            return true;
        }
        self.allow_at(self.origin.elapsed().as_millis() as u64)
    }

    fn allow_at(&self, elapsed_ms: u64) -> bool {
        let stamp = elapsed_ms.saturating_add(1);
        let mut last = self.last_ms.load(Ordering::Relaxed);
        loop {
            if last != 0 && stamp.saturating_sub(last) < self.min_gap_ms {
                return false;
            }
            match self
                .last_ms
                .compare_exchange_weak(last, stamp, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_gap_allows_all() {
        let d = Debounce::new(Duration::ZERO);
        assert!((0..100).all(|_| d.allow()));
    }

    #[test]
    fn test_gap_enforced() {
        let d = Debounce::new(Duration::from_millis(50));
        assert!(d.allow_at(0));
        assert!(!d.allow_at(10));
        assert!(!d.allow_at(49));
        assert!(d.allow_at(50));
        assert!(!d.allow_at(60));
        assert!(d.allow_at(200));
    }
}
