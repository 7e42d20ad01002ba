//! Frame clock driving per-frame animation.

use std::time::{Duration, Instant};

/// Monotonic clock measuring total run time and per-frame deltas.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
        }
    }

    /// Seconds since the timer was created. Drives uniform animation.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Marks the end of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        delta
    }

    /// Number of `tick` calls so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Average frames per second over the timer's lifetime.
    pub fn average_fps(&self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = Timer::new();
        assert_eq!(timer.frame_count(), 0);
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let timer = Timer::new();
        let a = timer.elapsed_secs();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed_secs() >= a);
    }
}
