//! Clock and timing utilities for the render loop.
//!
//! Two notions of time meet in a render:
//! - wall-clock time since the encoder started, used for the safety ceiling
//! - presentation time of source frames, used for ordering and progress

use std::time::{Duration, Instant};

/// A render clock that measures wall-clock time from a fixed epoch
/// (the moment encoding started).
#[derive(Debug, Clone)]
pub struct RenderClock {
    /// The instant encoding started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RenderClock {
    /// Create a new render clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the epoch.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Whether more than `ceiling` has elapsed since the epoch.
    pub fn exceeded(&self, ceiling: Duration) -> bool {
        self.epoch.elapsed() >= ceiling
    }
}

/// Maps frame indices to presentation timestamps at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// Create a frame clock. A zero rate is treated as 1 fps.
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Duration of one frame in seconds.
    pub fn frame_secs(&self) -> f64 {
        1.0 / self.fps as f64
    }

    /// Presentation time of frame `index` in seconds.
    pub fn pts_secs(&self, index: u64) -> f64 {
        index as f64 / self.fps as f64
    }

    /// Number of whole frames needed to cover `duration_secs`.
    pub fn frames_in(&self, duration_secs: f64) -> u64 {
        if duration_secs <= 0.0 {
            return 0;
        }
        (duration_secs * self.fps as f64).round() as u64
    }
}

/// Fraction of `total_secs` covered by `elapsed_secs`, as a whole percentage.
///
/// Clamped to `[0, 99]`; only a finished job reports 100.
pub fn progress_percent(elapsed_secs: f64, total_secs: f64) -> u8 {
    if total_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 0;
    }
    ((elapsed_secs / total_secs) * 100.0).floor().clamp(0.0, 99.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RenderClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.exceeded(Duration::from_secs(20)));
        assert!(clock.exceeded(Duration::ZERO));
    }

    #[test]
    fn test_frame_clock_ninety_frames_at_thirty_fps() {
        let clock = FrameClock::new(30);
        assert_eq!(clock.frames_in(3.0), 90);
        assert!((clock.pts_secs(45) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_frame_clock_zero_fps_clamps() {
        let clock = FrameClock::new(0);
        assert_eq!(clock.fps(), 1);
        assert_eq!(clock.frames_in(-1.0), 0);
    }

    #[test]
    fn test_progress_percent_caps_below_completion() {
        assert_eq!(progress_percent(0.0, 5.0), 0);
        assert_eq!(progress_percent(2.5, 5.0), 50);
        assert_eq!(progress_percent(9.0, 5.0), 99);
        assert_eq!(progress_percent(1.0, 0.0), 0);
    }
}
