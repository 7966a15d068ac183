//! Frame timing.

use std::time::{Duration, Instant};

/// Frame rate summary produced once per reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Frames completed during the interval.
    pub frames: u32,
    /// Average frames per second over the interval.
    pub fps: f32,
    /// Average frame time in milliseconds.
    pub frame_time_ms: f32,
}

/// Tracks per-frame delta time and periodically reports frame rate.
#[derive(Debug)]
pub struct FrameTimer {
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    report_interval: Duration,
    total_frames: u64,
}

impl FrameTimer {
    /// Create a timer reporting once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    /// Create a timer with a custom reporting interval.
    pub fn with_interval(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_tick: now,
            window_start: now,
            window_frames: 0,
            report_interval,
            total_frames: 0,
        }
    }

    /// Mark the end of a frame.
    ///
    /// Returns the delta since the previous tick and, when the reporting
    /// interval has elapsed, the stats for that interval.
    pub fn tick(&mut self) -> (Duration, Option<FrameStats>) {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> (Duration, Option<FrameStats>) {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.window_frames += 1;
        self.total_frames += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window < self.report_interval {
            return (delta, None);
        }

        let secs = window.as_secs_f32();
        let stats = FrameStats {
            frames: self.window_frames,
            fps: self.window_frames as f32 / secs,
            frame_time_ms: secs * 1000.0 / self.window_frames as f32,
        };
        self.window_start = now;
        self.window_frames = 0;
        (delta, Some(stats))
    }

    /// Total number of ticks since creation.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let mut timer = FrameTimer::with_interval(Duration::from_secs(10));
        let start = timer.last_tick;
        let (delta, stats) = timer.tick_at(start + Duration::from_millis(16));
        assert_eq!(delta, Duration::from_millis(16));
        assert!(stats.is_none());
        assert_eq!(timer.total_frames(), 1);
    }

    #[test]
    fn test_report_after_interval() {
        let mut timer = FrameTimer::with_interval(Duration::from_secs(1));
        let start = timer.last_tick;
        for i in 1..=3 {
            let (_, stats) = timer.tick_at(start + Duration::from_millis(250 * i));
            assert!(stats.is_none());
        }
        let (_, stats) = timer.tick_at(start + Duration::from_secs(1));
        let stats = stats.expect("interval elapsed");
        assert_eq!(stats.frames, 4);
        assert!((stats.fps - 4.0).abs() < 1e-3);
        assert!((stats.frame_time_ms - 250.0).abs() < 1e-2);

        // The window restarts after a report.
        let (_, stats) = timer.tick_at(start + Duration::from_millis(1100));
        assert!(stats.is_none());
    }
}
