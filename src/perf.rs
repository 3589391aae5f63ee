//! Frame timing.

use std::collections::VecDeque;

/// Moving average over the most recent frame durations.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl RollingWindow {
    pub const DEFAULT_CAPACITY: usize = 64;

    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a frame duration in seconds and return the new average.
    pub fn update(&mut self, duration_secs: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_secs);
        self.average()
    }

    /// Mean of the retained samples; 0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames per second, undefined while the average is not positive.
    pub fn fps(&self) -> Option<f64> {
        let avg = self.average();
        (avg > 0.0).then(|| 1.0 / avg)
    }

    pub fn format_fps_line(&self) -> String {
        format_fps_line(self.fps())
    }
}

pub fn format_fps_line(fps: Option<f64>) -> String {
    match fps {
        Some(fps) => format!("fps: {fps:.2}"),
        None => "fps: --".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_averages_to_zero() {
        let window = RollingWindow::default();
        assert_eq!(window.average(), 0.0);
        assert_eq!(window.fps(), None);
        assert_eq!(window.format_fps_line(), "fps: --");
    }

    #[test]
    fn oldest_sample_is_evicted_at_capacity() {
        let mut window = RollingWindow::new(2);
        window.update(1.0);
        window.update(2.0);
        assert_eq!(window.update(4.0), 3.0);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn fps_line_has_two_decimals() {
        let mut window = RollingWindow::default();
        window.update(1.0 / 60.0);
        assert_eq!(window.format_fps_line(), "fps: 60.00");
    }

    #[test]
    fn non_finite_sample_stops_counting_once_evicted() {
        let mut window = RollingWindow::new(3);
        window.update(f64::INFINITY);
        assert_eq!(window.fps(), Some(0.0));
        window.update(f64::NAN);
        assert_eq!(window.fps(), None);
        for _ in 0..3 {
            window.update(0.5);
        }
        assert_eq!(window.average(), 0.5);
        assert_eq!(window.fps(), Some(2.0));
    }

    #[test]
    fn zero_durations_leave_fps_undefined() {
        let mut window = RollingWindow::new(4);
        window.update(0.0);
        assert_eq!(window.fps(), None);
    }
}
