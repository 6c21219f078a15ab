use anyhow::Result;

use crate::detect::result::DetectorResponse;
use crate::frame::DetectionSample;

/// Remote (or local) face detector.
///
/// The detector is stateless per call and answers in the uploaded sample's
/// pixel coordinates; all rescaling is the caller's job.
///
/// `detect` may block for an unbounded time. Callers never hold a lock
/// across it and never call it twice concurrently for one session.
pub trait FaceDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Submit one sample. An `Err` is a transport failure, not "no face".
    fn detect(&self, sample: &DetectionSample) -> Result<DetectorResponse>;
}
