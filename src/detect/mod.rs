mod backend;
mod backends;
mod client;
mod result;

pub use backend::FaceDetector;
pub use backends::{detector_from_url, HttpDetector, StubDetector};
pub use client::{
    DetectionClient, DetectionJob, DetectionOutcome, SkipReason, TickOutcome,
    DEFAULT_MIN_REQUEST_INTERVAL,
};
pub use result::{
    DetectionResult, DetectionSlot, DetectorBox, DetectorResponse, FaceData, STATUS_SUCCESS,
};
