use crate::buffer::FrameSource;
use crate::error::{PipelineError, PushError, Result};
use crate::frame::Frame;
use crate::pipeline::Pipeline;
use std::thread;
use std::time::Duration;

/// Exponential backoff for callers throttling admission.
///
/// The pipeline never blocks admission itself; this is the caller-side
/// policy that honors [`Pipeline::overload`] and full entry queues.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    base: Duration,
    max: Duration,
    step: u32,
}

impl AdmissionController {
    /// Default: 1µs doubling up to 1ms
    pub fn new() -> Self {
        Self::with_backoff(Duration::from_micros(1), Duration::from_millis(1))
    }

    pub fn with_backoff(base: Duration, max: Duration) -> Self {
        Self { base, max, step: 0 }
    }

    /// Returns true if the pipeline can take more frames. Otherwise sleeps
    /// for the current backoff and returns false.
    pub fn check<F: Frame>(&mut self, pipeline: &Pipeline<F>) -> bool {
        if pipeline.overload() {
            self.backoff();
            false
        } else {
            true
        }
    }

    /// Sleep for the current backoff interval and grow it
    pub fn backoff(&mut self) {
        let delay = self.base.saturating_mul(1u32 << self.step.min(10)).min(self.max);
        thread::sleep(delay);
        self.step = (self.step + 1).min(10);
    }

    /// Drop back to the shortest interval after progress
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`drive`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveReport {
    /// Frames admitted into the pipeline
    pub admitted: u64,
    /// Frames rejected as empty and disposed by the driver
    pub rejected: u64,
    /// Backoffs taken because of overload or a full entry queue
    pub throttled: u64,
}

/// Feed every frame of `source` into `pipeline`, then wait for the pipeline
/// to drain.
pub fn drive<F, S>(source: &mut S, pipeline: &Pipeline<F>) -> Result<DriveReport>
where
    F: Frame,
    S: FrameSource<F> + ?Sized,
{
    if !pipeline.is_constructed() {
        return Err(PipelineError::NotConstructed);
    }

    let mut controller = AdmissionController::new();
    let mut report = DriveReport::default();

    loop {
        if !source.frame_available() {
            if !source.active() {
                break;
            }
            if !source.pull_source() && !source.frame_available() {
                controller.backoff();
            }
            continue;
        }

        if !controller.check(pipeline) {
            report.throttled += 1;
            continue;
        }

        let Some(mut frame) = source.pop_frame() else {
            continue;
        };
        loop {
            match pipeline.push_frame(frame) {
                Ok(()) => {
                    report.admitted += 1;
                    controller.reset();
                    break;
                }
                Err(PushError::Full(rejected)) => {
                    report.throttled += 1;
                    controller.backoff();
                    frame = rejected;
                }
                Err(PushError::Empty(rejected)) => {
                    report.rejected += 1;
                    F::dispose(rejected);
                    break;
                }
                Err(PushError::Closed(rejected)) => {
                    F::dispose(rejected);
                    return Err(PipelineError::NotConstructed);
                }
            }
        }
    }

    pipeline.wait_finish();
    tracing::debug!(?report, "source drained");
    Ok(report)
}
