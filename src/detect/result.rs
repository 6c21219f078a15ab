use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::overlay::BoxF;

/// Status string of a successful detector response.
pub const STATUS_SUCCESS: &str = "success";

/// Detector response body.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DetectorResponse {
    pub status: String,
    #[serde(default)]
    pub faces: Vec<FaceData>,
}

impl DetectorResponse {
    pub fn success(faces: Vec<FaceData>) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            faces,
        }
    }

    pub fn empty() -> Self {
        Self::success(Vec::new())
    }

    /// The first face of a successful response.
    ///
    /// Any other status, or a success with no faces, means "no face visible".
    pub fn primary_face(&self) -> Option<&FaceData> {
        if self.status != STATUS_SUCCESS {
            return None;
        }
        self.faces.first()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FaceData {
    /// In the uploaded image's pixel coordinates.
    pub bbox: DetectorBox,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Vec<f64>>>,
}

impl FaceData {
    pub fn new(bbox: DetectorBox) -> Self {
        Self {
            bbox,
            name: None,
            confidence: None,
            landmarks: None,
        }
    }

    pub fn with_identity(mut self, name: &str, confidence: f64) -> Self {
        self.name = Some(name.to_string());
        self.confidence = Some(confidence);
        self
    }
}

/// Detector-space rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct DetectorBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl From<DetectorBox> for BoxF {
    fn from(b: DetectorBox) -> Self {
        BoxF::new(b.x, b.y, b.w, b.h)
    }
}

/// Most recently completed detection, in native-space pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub bbox: BoxF,
    pub label: Option<String>,
    /// Clamped to 0..1; `None` when the detector gave nothing usable.
    pub confidence: Option<f64>,
    pub captured_at: Instant,
}

impl DetectionResult {
    pub fn new(bbox: BoxF, captured_at: Instant) -> Self {
        Self {
            bbox,
            label: None,
            confidence: None,
            captured_at,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

/// Normalize a detector confidence. Non-finite values are dropped.
pub(crate) fn sanitize_confidence(confidence: Option<f64>) -> Option<f64> {
    confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

/// Single-writer latest-value slot.
///
/// The detection client overwrites it, never merges; the render loop reads
/// it every tick. Only the latest value matters, so there is no queue.
#[derive(Debug, Default)]
pub struct DetectionSlot {
    inner: Mutex<Option<DetectionResult>>,
}

impl DetectionSlot {
    pub fn store(&self, result: DetectionResult) {
        *self.lock() = Some(result);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    /// Write `value` only if `still_current` holds while the slot is locked.
    ///
    /// Lets a late writer race a concurrent clear without resurrecting a
    /// result the clear was meant to remove.
    pub(crate) fn publish_if(
        &self,
        still_current: impl FnOnce() -> bool,
        value: Option<DetectionResult>,
    ) -> bool {
        let mut guard = self.lock();
        if !still_current() {
            return false;
        }
        *guard = value;
        true
    }

    pub fn latest(&self) -> Option<DetectionResult> {
        self.lock().clone()
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<DetectionResult>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
