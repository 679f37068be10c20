use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ci2::{AcquiredFrame, FrameStatus, Stream, feature};

use crate::{
    pixel_stats::compute_frame_metrics,
    publish::{RegisterPublisher, RegisterTransport},
};

/// Counts of what happened to each acquisition attempt.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub frames_published: u64,
    pub bad_status_frames: u64,
    pub acquire_errors: u64,
    pub decode_errors: u64,
    pub publish_failures: u64,
    /// Host frame number of the most recent frame with a success status.
    pub last_host_frame: Option<usize>,
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Published,
    BadStatus(FrameStatus),
    AcquireFailed,
    DecodeFailed,
    PublishFailed,
}

/// Acquire, decode, compute and publish, one frame at a time.
pub struct AcquisitionLoop<S, T> {
    stream: Arc<S>,
    publisher: RegisterPublisher<T>,
    timeout: Duration,
    summary: AcquisitionSummary,
}

impl<S, T> AcquisitionLoop<S, T>
where
    S: Stream,
    T: RegisterTransport,
{
    pub fn new(stream: Arc<S>, publisher: RegisterPublisher<T>, timeout: Duration) -> Self {
        Self {
            stream,
            publisher,
            timeout,
            summary: AcquisitionSummary::default(),
        }
    }

    pub fn summary(&self) -> &AcquisitionSummary {
        &self.summary
    }

    /// Run until `flag` is stopped. No error ends the loop.
    pub fn run(mut self, flag: &thread_control::Flag) -> AcquisitionSummary {
        while flag.is_alive() {
            self.step();
        }
        info!(
            source = "acquisition",
            "acquisition thread exiting: {:?}", self.summary
        );
        self.summary
    }

    /// Make one acquisition attempt.
    pub fn step(&mut self) -> FrameOutcome {
        let outcome = self.process_frame();
        let s = &mut self.summary;
        match outcome {
            FrameOutcome::Published => s.frames_published += 1,
            FrameOutcome::BadStatus(_) => s.bad_status_frames += 1,
            FrameOutcome::AcquireFailed => s.acquire_errors += 1,
            FrameOutcome::DecodeFailed => s.decode_errors += 1,
            FrameOutcome::PublishFailed => s.publish_failures += 1,
        }
        outcome
    }

    fn process_frame(&mut self) -> FrameOutcome {
        let frame = match self.stream.acquire(self.timeout) {
            Ok(frame) => frame,
            Err(ci2::Error::Timeout) => {
                warn!(source = "acquisition", "no frame within {:?}", self.timeout);
                return FrameOutcome::AcquireFailed;
            }
            Err(e) => {
                warn!(source = "acquisition", code = ?e.code(), "acquire failed: {e}");
                return FrameOutcome::AcquireFailed;
            }
        };

        let status = frame.status();
        if !status.is_success() {
            warn!(source = "acquisition", "frame status {status}");
            return FrameOutcome::BadStatus(status);
        }

        let frame_id = frame.chunk_int(feature::CHUNK_FRAME_ID).ok();
        let host = frame.host_timing();
        let (host_fno, host_time) = (host.fno, host.datetime);
        self.summary.last_host_frame = Some(host_fno);
        let (width, height) = (frame.width(), frame.height());
        let rgb = match frame.to_rgb24() {
            Ok(rgb) => rgb,
            Err(e) => {
                warn!(
                    source = "acquisition",
                    "cannot convert {:?} to RGB8: {e}",
                    frame.pixel_format()
                );
                return FrameOutcome::DecodeFailed;
            }
        };
        drop(frame);

        let n_bytes = width as usize * height as usize * 3;
        if n_bytes == 0 || rgb.len() < n_bytes {
            warn!(
                source = "acquisition",
                "{width}x{height} frame decoded to {} bytes",
                rgb.len()
            );
            return FrameOutcome::DecodeFailed;
        }

        let metrics = compute_frame_metrics(&rgb, width, height);
        debug!(
            source = "acquisition",
            "Average RGB {:?}, Minimum RGB {:?}, peak % {:.1?}",
            metrics.means(),
            metrics.minimums(),
            metrics.peak_percents()
        );

        let outcome = match self.publisher.publish(&metrics) {
            Ok(()) => FrameOutcome::Published,
            Err(e) => {
                warn!(source = "acquisition", "{e}");
                FrameOutcome::PublishFailed
            }
        };
        let host_time = host_time.format("%H:%M:%S%.3f");
        match frame_id {
            Some(id) => info!(
                source = "acquisition",
                "acquired {width}x{height}, frame id {id} (host frame {host_fno} at {host_time})"
            ),
            None => info!(
                source = "acquisition",
                "acquired {width}x{height} (host frame {host_fno} at {host_time})"
            ),
        }
        outcome
    }
}
