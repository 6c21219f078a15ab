//! Video capture.
//!
//! This module owns the video input device for the lifetime of a session:
//! - `VideoDevice`: a live device stream producing native-resolution frames
//! - `DeviceOpener`: acquires a device for a `CaptureRequest`
//! - `CaptureController`: acquire/release plus the ActiveFlag ordering
//! - `CaptureSession`: the shared handle the sampler, render loop and capture
//!   sink read through; only the controller releases it
//!
//! Device URLs select a backend:
//! - `stub://...` synthetic camera (tests and demos)
//! - `http(s)://...` MJPEG or single-JPEG network camera
//! - `/dev/videoN` or `v4l2:///dev/videoN` local V4L2 device (feature: capture-v4l2)

pub mod http;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use crate::frame::VideoFrame;
use crate::session::SharedState;

pub use http::HttpCamera;
pub use synthetic::SyntheticCamera;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Camera;

/// User-actionable capture failures. Everything else is handled inside the loops.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera stream lost: {0}")]
    DeviceLost(String),
}

/// Orientation hint passed to the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Front-facing camera.
    #[default]
    User,
    Environment,
}

/// What the controller asks the device for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub url: String,
    /// Requested nominal resolution. Devices may deliver something else.
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            url: "stub://front_camera".to_string(),
            width: 640,
            height: 480,
            facing: Facing::User,
        }
    }
}

/// A live video stream.
pub trait VideoDevice: Send {
    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;

    /// Current native resolution.
    fn native_size(&self) -> (u32, u32);

    /// True once the device is delivering frames.
    fn is_ready(&self) -> bool;

    /// Read the current frame. `Ok(None)` means no frame is ready yet.
    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError>;

    /// Halt all device tracks. Must be idempotent.
    fn stop(&mut self);
}

/// Acquires a device for a request.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn VideoDevice>, CaptureError>;
}

/// Opens devices by URL scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct UrlDeviceOpener;

impl DeviceOpener for UrlDeviceOpener {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn VideoDevice>, CaptureError> {
        let url = request.url.as_str();
        if url.starts_with("stub://") {
            return Ok(Box::new(SyntheticCamera::open(request)?));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Box::new(HttpCamera::open(request)?));
        }
        if url.starts_with("/dev/") || url.starts_with("v4l2://") {
            #[cfg(feature = "capture-v4l2")]
            {
                return Ok(Box::new(V4l2Camera::open(request)?));
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "{} requires the capture-v4l2 feature",
                    url
                )));
            }
        }
        Err(CaptureError::DeviceUnavailable(format!(
            "unsupported camera url '{}'",
            url
        )))
    }
}

// ----------------------------------------------------------------------------
// SizeCell: lock-free width/height pair
// ----------------------------------------------------------------------------

/// A `(width, height)` pair that can be re-read and updated from any thread.
///
/// Used for the display size (the host updates it on layout reflow) and for
/// the native size (updated from every frame read).
#[derive(Clone)]
pub struct SizeCell(Arc<AtomicU64>);

impl SizeCell {
    pub fn new(width: u32, height: u32) -> Self {
        Self(Arc::new(AtomicU64::new(pack(width, height))))
    }

    pub fn get(&self) -> (u32, u32) {
        unpack(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, width: u32, height: u32) {
        self.0.store(pack(width, height), Ordering::Release);
    }
}

impl fmt::Debug for SizeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.get();
        write!(f, "SizeCell({}x{})", w, h)
    }
}

fn pack(width: u32, height: u32) -> u64 {
    ((width as u64) << 32) | height as u64
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

// ----------------------------------------------------------------------------
// CaptureSession
// ----------------------------------------------------------------------------

/// The device stream plus its native and display sizes.
///
/// Cloning shares the same stream. The sampler and the capture sink only read
/// frames through it; `release` is reserved for the controller.
#[derive(Clone)]
pub struct CaptureSession {
    device: Arc<Mutex<Option<Box<dyn VideoDevice>>>>,
    native: SizeCell,
    display: SizeCell,
    label: Arc<str>,
}

impl CaptureSession {
    fn new(device: Box<dyn VideoDevice>, display: SizeCell) -> Self {
        let (w, h) = device.native_size();
        let label: Arc<str> = Arc::from(device.describe());
        Self {
            device: Arc::new(Mutex::new(Some(device))),
            native: SizeCell::new(w, h),
            display,
            label,
        }
    }

    pub fn describe(&self) -> &str {
        &self.label
    }

    /// Native resolution of the most recently read frame.
    pub fn native_size(&self) -> (u32, u32) {
        self.native.get()
    }

    /// Current on-screen size. Re-read on every render tick.
    pub fn display_size(&self) -> (u32, u32) {
        self.display.get()
    }

    pub fn display(&self) -> &SizeCell {
        &self.display
    }

    pub fn is_ready(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|device| device.is_ready())
            .unwrap_or(false)
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    /// Read the live frame. A released session reads as "not ready".
    pub fn read_frame(&self) -> Result<Option<VideoFrame>, CaptureError> {
        let mut guard = self.lock();
        let Some(device) = guard.as_mut() else {
            return Ok(None);
        };
        if !device.is_ready() {
            return Ok(None);
        }
        let frame = device.read_frame()?;
        if let Some(frame) = &frame {
            let (w, h) = frame.size();
            self.native.set(w, h);
        }
        Ok(frame)
    }

    /// Stop the device stream. Returns false if it was already released.
    pub(crate) fn release(&self) -> bool {
        let device = self.lock().take();
        match device {
            Some(mut device) => {
                device.stop();
                log::info!("capture: released {}", self.label);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn VideoDevice>>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.label)
            .field("native", &self.native)
            .field("display", &self.display)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// CaptureController
// ----------------------------------------------------------------------------

/// Acquires and releases the video input device.
pub struct CaptureController {
    opener: Arc<dyn DeviceOpener>,
    request: CaptureRequest,
}

impl CaptureController {
    pub fn new(request: CaptureRequest) -> Self {
        Self::with_opener(request, Arc::new(UrlDeviceOpener))
    }

    pub fn with_opener(request: CaptureRequest, opener: Arc<dyn DeviceOpener>) -> Self {
        Self { opener, request }
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// Acquire the device and mark the session active.
    ///
    /// ActiveFlag is set before any downstream loop is wired up, so a
    /// readiness check that runs after a fast `stop` observes it cleared.
    pub fn start(
        &self,
        shared: &SharedState,
        display: SizeCell,
    ) -> Result<CaptureSession, CaptureError> {
        log::info!(
            "capture: requesting {} at {}x{} facing={:?}",
            self.request.url,
            self.request.width,
            self.request.height,
            self.request.facing
        );
        let device = self.opener.open(&self.request)?;
        let session = CaptureSession::new(device, display);
        shared.activate();
        let (w, h) = session.native_size();
        log::info!("capture: {} streaming at {}x{}", session.describe(), w, h);
        Ok(session)
    }

    /// Halt the device, clear ActiveFlag and drop any current detection.
    pub fn stop(&self, session: &CaptureSession, shared: &SharedState) {
        shared.deactivate();
        session.release();
        shared.clear_detection();
    }
}
