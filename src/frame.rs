//! Captured frames and the frame sampler.
//!
//! - `VideoFrame`: a native-resolution RGB frame read from the capture device.
//! - `DetectionSample`: a downsized, JPEG-encoded still submitted to the detector.
//! - `Snapshot`: a full-resolution JPEG handed to the capture sink.
//!
//! Samples are created by the `FrameSampler` and consumed immediately by the
//! detection client. Nothing in this module persists frames.

use std::io::Cursor;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageError, RgbImage};

/// Fixed detector-space sample width.
pub const DEFAULT_SAMPLE_WIDTH: u32 = 120;
/// Fixed detector-space sample height.
pub const DEFAULT_SAMPLE_HEIGHT: u32 = 90;
/// JPEG quality for detection samples. Kept low to bound upload size.
pub const DEFAULT_SAMPLE_QUALITY: u8 = 50;
/// JPEG quality for full-resolution capture-sink snapshots.
pub const DEFAULT_SNAPSHOT_QUALITY: u8 = 95;

// ----------------------------------------------------------------------------
// VideoFrame
// ----------------------------------------------------------------------------

/// A single native-resolution frame from the capture device.
pub struct VideoFrame {
    image: RgbImage,
    captured_at: Instant,
}

impl VideoFrame {
    /// Wrap packed RGB8 pixels. Fails if the buffer length does not match.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer rejected for {}x{}", width, height))?;
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

// ----------------------------------------------------------------------------
// DetectionSample
// ----------------------------------------------------------------------------

/// A downsized still image plus the instant its source frame was taken.
#[derive(Clone, Debug)]
pub struct DetectionSample {
    pub jpeg: Vec<u8>,
    /// Detector-space width.
    pub width: u32,
    /// Detector-space height.
    pub height: u32,
    /// Native size of the frame this sample was taken from.
    pub source_width: u32,
    pub source_height: u32,
    pub taken_at: Instant,
}

/// Full-resolution JPEG delivered to the capture sink.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub taken_at: Instant,
}

impl Snapshot {
    /// Encode a full-resolution snapshot of `frame`.
    pub fn encode(frame: &VideoFrame, quality: u8) -> Result<Self> {
        let jpeg = encode_jpeg(frame.image(), quality).context("encode snapshot")?;
        if jpeg.is_empty() {
            return Err(anyhow!("snapshot encoder produced no bytes"));
        }
        Ok(Self {
            jpeg,
            width: frame.width(),
            height: frame.height(),
            taken_at: frame.captured_at(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("sample encoding failed: {0}")]
    Encode(#[from] ImageError),
    #[error("sample encoder produced no bytes")]
    Empty,
    #[error("source frame has zero area")]
    EmptyFrame,
}

// ----------------------------------------------------------------------------
// FrameSampler
// ----------------------------------------------------------------------------

/// Draws a frame into a fixed small target resolution and encodes it.
#[derive(Clone, Debug)]
pub struct FrameSampler {
    width: u32,
    height: u32,
    quality: u8,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(
            DEFAULT_SAMPLE_WIDTH,
            DEFAULT_SAMPLE_HEIGHT,
            DEFAULT_SAMPLE_QUALITY,
        )
    }
}

impl FrameSampler {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Downsize and encode `frame`.
    ///
    /// The target size ignores the source aspect ratio; the detection client
    /// rescales each axis independently on the way back.
    pub fn sample(&self, frame: &VideoFrame) -> Result<DetectionSample, SampleError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(SampleError::EmptyFrame);
        }
        let small = imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle);
        let jpeg = encode_jpeg(&small, self.quality)?;
        if jpeg.is_empty() {
            return Err(SampleError::Empty);
        }
        Ok(DetectionSample {
            jpeg,
            width: self.width,
            height: self.height,
            source_width: frame.width(),
            source_height: frame.height(),
            taken_at: frame.captured_at(),
        })
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out.into_inner())
}
