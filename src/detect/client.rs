//! Rate-limited, non-overlapping detection requests.
//!
//! Every tick of the detection cadence calls `DetectionClient::tick`. A tick
//! either dispatches exactly one `DetectionJob` or is skipped. The job owns
//! the in-flight claim, so the flag is released however the job ends,
//! including a job that is dropped without running.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::capture::{CaptureError, CaptureSession};
use crate::detect::backend::FaceDetector;
use crate::detect::result::{sanitize_confidence, DetectionResult, DetectorResponse};
use crate::frame::{DetectionSample, FrameSampler};
use crate::overlay::{BoxF, Scale};
use crate::session::{InFlightGuard, SessionStats, SharedState};

/// Default minimum spacing between request starts.
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    InFlight,
    RateLimited,
    NotReady,
    Encoding,
}

pub enum TickOutcome {
    Dispatched(DetectionJob),
    Skipped(SkipReason),
    DeviceLost(CaptureError),
}

impl TickOutcome {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            TickOutcome::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// A face was found; the slot holds it.
    Detected,
    /// The detector saw no face; the slot was cleared.
    NoFace,
    /// Transport failure; the slot was left untouched.
    TransientFault,
    /// The session stopped while the call was outstanding.
    Discarded,
}

pub struct DetectionClient {
    detector: Arc<dyn FaceDetector>,
    sampler: FrameSampler,
    shared: Arc<SharedState>,
    min_request_interval: Duration,
    last_request_at: Option<Instant>,
}

impl DetectionClient {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        sampler: FrameSampler,
        shared: Arc<SharedState>,
        min_request_interval: Duration,
    ) -> Self {
        Self {
            detector,
            sampler,
            shared,
            min_request_interval,
            last_request_at: None,
        }
    }

    pub fn last_request_at(&self) -> Option<Instant> {
        self.last_request_at
    }

    /// One detection-cadence tick.
    pub fn tick(&mut self, capture: &CaptureSession, now: Instant) -> TickOutcome {
        if self.shared.is_in_flight() {
            return TickOutcome::Skipped(SkipReason::InFlight);
        }
        if !self.shared.is_active() {
            return TickOutcome::Skipped(SkipReason::Inactive);
        }
        if let Some(last) = self.last_request_at {
            if now.saturating_duration_since(last) < self.min_request_interval {
                return TickOutcome::Skipped(SkipReason::RateLimited);
            }
        }
        let Some(guard) = self.shared.claim_in_flight() else {
            return TickOutcome::Skipped(SkipReason::InFlight);
        };

        let frame = match capture.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::Skipped(SkipReason::NotReady),
            Err(err) => return TickOutcome::DeviceLost(err),
        };
        let sample = match self.sampler.sample(&frame) {
            Ok(sample) => sample,
            Err(err) => {
                log::debug!("detect: skipping cycle: {}", err);
                SessionStats::bump(&self.shared.stats().encode_skips);
                return TickOutcome::Skipped(SkipReason::Encoding);
            }
        };

        self.last_request_at = Some(now);
        SessionStats::bump(&self.shared.stats().requests);
        TickOutcome::Dispatched(DetectionJob {
            guard,
            sample,
            detector: Arc::clone(&self.detector),
        })
    }
}

/// One outstanding detection call. Holds InFlightFlag until dropped.
pub struct DetectionJob {
    guard: InFlightGuard,
    sample: DetectionSample,
    detector: Arc<dyn FaceDetector>,
}

impl DetectionJob {
    pub fn sample(&self) -> &DetectionSample {
        &self.sample
    }

    /// Issue the request and publish its outcome. Blocks for the call.
    pub fn run(self) -> DetectionOutcome {
        let response = self.detector.detect(&self.sample);
        apply_response(self.guard.state(), &self.sample, response)
    }
}

/// Publish a completed call into the shared slot.
pub(crate) fn apply_response(
    state: &SharedState,
    sample: &DetectionSample,
    response: Result<DetectorResponse>,
) -> DetectionOutcome {
    if !state.is_active() {
        return DetectionOutcome::Discarded;
    }
    let stats = state.stats();
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            log::debug!("detect: transient failure: {:#}", err);
            SessionStats::bump(&stats.transient_faults);
            return DetectionOutcome::TransientFault;
        }
    };

    let Some(face) = response.primary_face() else {
        if !state.publish(None) {
            return DetectionOutcome::Discarded;
        }
        SessionStats::bump(&stats.empty_responses);
        return DetectionOutcome::NoFace;
    };

    let native = BoxF::from(face.bbox).scaled(detector_to_native(sample));
    let result = DetectionResult {
        bbox: native,
        label: face.name.clone().filter(|name| !name.trim().is_empty()),
        confidence: sanitize_confidence(face.confidence),
        captured_at: sample.taken_at,
    };
    log::trace!("detect: face at native {:?}", result.bbox);
    if !state.publish(Some(result)) {
        return DetectionOutcome::Discarded;
    }
    SessionStats::bump(&stats.detections);
    DetectionOutcome::Detected
}

/// `nativeWidth / sampleWidth`, `nativeHeight / sampleHeight`.
fn detector_to_native(sample: &DetectionSample) -> Scale {
    Scale::new(
        sample.source_width as f64 / sample.width.max(1) as f64,
        sample.source_height as f64 / sample.height.max(1) as f64,
    )
}
