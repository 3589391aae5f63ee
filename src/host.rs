//! Display hosts drive a per-frame callback until they are told to close.

use std::time::Instant;

use crate::driver::RenderLoopDriver;
use crate::error::CompositingResult;
use crate::renderer::backend::GpuBackend;

/// Callbacks a display host invokes.
pub trait FrameHandler {
    fn on_init(&mut self) -> CompositingResult<()>;

    /// `elapsed_secs` since `on_init`; `frame_duration_secs` since the previous frame.
    fn on_frame(&mut self, elapsed_secs: f64, frame_duration_secs: f64) -> CompositingResult<()>;

    /// Runs exactly once per `run`, including after errors.
    fn on_shutdown(&mut self);
}

pub trait DisplayHost {
    fn run(&mut self, handler: &mut dyn FrameHandler) -> CompositingResult<HostSummary>;
}

impl<B: GpuBackend> FrameHandler for RenderLoopDriver<B> {
    fn on_init(&mut self) -> CompositingResult<()> {
        self.initialize()
    }

    fn on_frame(&mut self, _elapsed_secs: f64, frame_duration_secs: f64) -> CompositingResult<()> {
        self.frame(frame_duration_secs)
    }

    fn on_shutdown(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameClock {
    /// Every frame takes exactly this many seconds. Deterministic.
    Fixed(f64),
    /// Measured wall-clock time.
    Wall,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HostSummary {
    pub frames: u64,
    pub elapsed_secs: f64,
}

/// Windowless host: runs a fixed number of frames, then closes.
#[derive(Clone, Debug)]
pub struct HeadlessHost {
    frames: u64,
    clock: FrameClock,
}

impl HeadlessHost {
    pub fn new(frames: u64, clock: FrameClock) -> Self {
        Self { frames, clock }
    }

    fn drive(
        &self,
        handler: &mut dyn FrameHandler,
        summary: &mut HostSummary,
    ) -> CompositingResult<()> {
        handler.on_init()?;
        let start = Instant::now();
        let mut last = start;
        for _ in 0..self.frames {
            let frame_duration = match self.clock {
                FrameClock::Fixed(dt) => dt,
                FrameClock::Wall => {
                    let now = Instant::now();
                    let dt = now.duration_since(last).as_secs_f64();
                    last = now;
                    dt
                }
            };
            summary.elapsed_secs = match self.clock {
                FrameClock::Fixed(_) => summary.elapsed_secs + frame_duration,
                FrameClock::Wall => start.elapsed().as_secs_f64(),
            };
            handler.on_frame(summary.elapsed_secs, frame_duration)?;
            summary.frames += 1;
        }
        Ok(())
    }
}

impl DisplayHost for HeadlessHost {
    fn run(&mut self, handler: &mut dyn FrameHandler) -> CompositingResult<HostSummary> {
        let mut summary = HostSummary::default();
        let result = self.drive(handler, &mut summary);
        handler.on_shutdown();
        match &result {
            Ok(()) => tracing::debug!(frames = summary.frames, "host closed"),
            Err(e) => tracing::error!(frames = summary.frames, "host aborted: {e}"),
        }
        result.map(|()| summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositingError;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_at: Option<usize>,
    }

    impl FrameHandler for Recorder {
        fn on_init(&mut self) -> CompositingResult<()> {
            self.calls.push("init".into());
            Ok(())
        }

        fn on_frame(&mut self, elapsed: f64, dt: f64) -> CompositingResult<()> {
            let n = self.calls.len();
            self.calls.push(format!("frame {elapsed:.2} {dt:.2}"));
            if self.fail_at == Some(n) {
                return Err(CompositingError::backend("lost device"));
            }
            Ok(())
        }

        fn on_shutdown(&mut self) {
            self.calls.push("shutdown".into());
        }
    }

    #[test]
    fn fixed_clock_drives_frames_in_order() {
        let mut host = HeadlessHost::new(2, FrameClock::Fixed(0.25));
        let mut rec = Recorder::default();
        let summary = host.run(&mut rec).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.elapsed_secs, 0.5);
        assert_eq!(
            rec.calls,
            vec!["init", "frame 0.25 0.25", "frame 0.50 0.25", "shutdown"]
        );
    }

    #[test]
    fn shutdown_runs_after_frame_error() {
        let mut host = HeadlessHost::new(5, FrameClock::Fixed(0.1));
        let mut rec = Recorder {
            fail_at: Some(2),
            ..Default::default()
        };
        assert!(host.run(&mut rec).is_err());
        assert_eq!(rec.calls.len(), 4);
        assert_eq!(rec.calls.last().map(String::as_str), Some("shutdown"));
    }
}
