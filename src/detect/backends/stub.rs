use anyhow::{Context, Result};

use crate::detect::backend::FaceDetector;
use crate::detect::result::{DetectorBox, DetectorResponse, FaceData};
use crate::frame::DetectionSample;

const BRIGHT_LUMA: u8 = 200;
const MIN_BRIGHT_PIXELS: usize = 4;

/// Local stand-in for the detector service.
///
/// Reports the bounding box of bright pixels in the sample, which is where
/// the synthetic camera paints its face. Useful for demos and tests only.
pub struct StubDetector {
    identity: Option<String>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self { identity: None }
    }

    /// Label every detection with `name`.
    pub fn with_identity(name: impl Into<String>) -> Self {
        Self {
            identity: Some(name.into()),
        }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, sample: &DetectionSample) -> Result<DetectorResponse> {
        let luma = image::load_from_memory(&sample.jpeg)
            .context("decode sample")?
            .into_luma8();

        let mut count = 0usize;
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, pixel) in luma.enumerate_pixels() {
            if pixel.0[0] >= BRIGHT_LUMA {
                count += 1;
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }
        }
        if count < MIN_BRIGHT_PIXELS {
            return Ok(DetectorResponse::empty());
        }

        let w = (x1 - x0 + 1) as f64;
        let h = (y1 - y0 + 1) as f64;
        let fill = count as f64 / (w * h);
        let mut face = FaceData::new(DetectorBox {
            x: x0 as f64,
            y: y0 as f64,
            w,
            h,
        });
        if let Some(name) = &self.identity {
            face = face.with_identity(name, fill.min(1.0));
        }
        Ok(DetectorResponse::success(vec![face]))
    }
}
