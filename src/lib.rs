//! Live face-detection overlay.
//!
//! This crate implements the visual-feedback core of a face-recognition
//! attendance tool: it samples a local video feed, submits downsized samples
//! to a remote detector at a bounded rate, and renders a smoothed,
//! correctly-scaled highlight box and identity label over the live video.
//!
//! # Architecture
//!
//! Three resolution spaces vary independently and are never confused:
//!
//! 1. **Detector space**: pixels of the small sample uploaded to the detector.
//! 2. **Native space**: pixels of the frame the camera actually captured.
//! 3. **Display space**: pixels of the on-screen video element.
//!
//! Two independently clocked loops share a single latest-value slot:
//!
//! - The detection cadence (`detect::DetectionClient`) writes the most recently
//!   completed `DetectionResult`, strictly one request in flight at a time.
//! - The render cadence (`overlay::RenderLoop`) reads that slot every refresh,
//!   smooths it and maps it into display space.
//!
//! # Module Structure
//!
//! - `frame`: Captured frames, detection samples, the frame sampler
//! - `capture`: Video devices, capture controller and session
//! - `detect`: Detector backends, wire types, the rate-limited detection client
//! - `overlay`: Geometry, smoothing, drawing surfaces, the render loop
//! - `session`: Shared flags, periodic tickers, the lifecycle coordinator
//! - `config`: Layered configuration (file, defaults, environment)

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod session;
pub mod ui;

pub use capture::{
    CaptureController, CaptureError, CaptureRequest, CaptureSession, DeviceOpener, Facing,
    SizeCell, UrlDeviceOpener, VideoDevice,
};
pub use config::PreviewConfig;
pub use detect::{
    DetectionClient, DetectionJob, DetectionOutcome, DetectionResult, DetectionSlot,
    DetectorBox, DetectorResponse, FaceData, FaceDetector, HttpDetector, StubDetector,
    TickOutcome,
};
pub use frame::{DetectionSample, FrameSampler, SampleError, Snapshot, VideoFrame};
pub use overlay::{
    Annotation, BoxF, BoxSmoother, DisplayList, DrawOp, ImageSurface, OverlayRenderer,
    OverlayStyle, RenderLoop, RenderSkip, RenderTick, Scale, SharedSurface, Surface,
};
pub use session::{
    CaptureSink, PreviewSession, SessionEvent, SessionState, SessionStats, SharedState,
    StatsSnapshot,
};
