//! Cursor distance tracking.

use parking_lot::Mutex;

/// Turns absolute cursor positions into travelled distance.
///
/// Jumps longer than `max_jump_px` on either axis (display switches,
/// warps, remote desktop reconnects) restart tracking from the new point
/// instead of counting as movement.
#[derive(Debug)]
pub struct MotionTracker {
    max_jump_px: f64,
    last: Mutex<Option<(f64, f64)>>,
}

impl MotionTracker {
    pub fn new(max_jump_px: f64) -> Self {
        Self {
            max_jump_px,
            last: Mutex::new(None),
        }
    }

    /// Records the cursor at `(x, y)` and returns the distance travelled
    /// since the previous position, if any was travelled.
    pub fn step(&self, x: f64, y: f64) -> Option<f64> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }

        let mut last = self.last.lock();
        let prev = last.replace((x, y))?;

        let dx = x - prev.0;
        let dy = y - prev.1;
        if dx.abs() > self.max_jump_px || dy.abs() > self.max_jump_px {
            return None;
        }

        let dist = dx.hypot(dy);
        (dist.is_finite() && dist > 0.0).then_some(dist)
    }

    /// Forgets the last position.
    pub fn reset(&self) {
        *self.last.lock() = None;
    }
}
