//! Synthetic camera (`stub://`).
//!
//! Renders a dark scene with a bright square "face" drifting around the
//! frame, so the full pipeline can run without hardware. Special hosts
//! simulate acquisition failures:
//! - `stub://denied`: the user refused camera permission
//! - `stub://unavailable`: no camera present
//! - `stub://empty`: a camera that never shows a face

use image::{Rgb, RgbImage};

use super::{CaptureError, CaptureRequest, VideoDevice};
use crate::frame::VideoFrame;

const BACKGROUND: u8 = 24;
const FACE: u8 = 235;

pub struct SyntheticCamera {
    url: String,
    width: u32,
    height: u32,
    frame_count: u64,
    show_face: bool,
    stopped: bool,
}

impl SyntheticCamera {
    pub fn open(request: &CaptureRequest) -> Result<Self, CaptureError> {
        let host = request.url.trim_start_matches("stub://");
        match host {
            "denied" => {
                return Err(CaptureError::PermissionDenied(
                    "synthetic camera refused access".to_string(),
                ))
            }
            "unavailable" => {
                return Err(CaptureError::DeviceUnavailable(
                    "synthetic camera not present".to_string(),
                ))
            }
            _ => {}
        }
        if request.width == 0 || request.height == 0 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "synthetic camera cannot deliver {}x{}",
                request.width, request.height
            )));
        }
        log::info!(
            "SyntheticCamera: opened {} ({}x{}, facing {:?})",
            request.url,
            request.width,
            request.height,
            request.facing
        );
        Ok(Self {
            url: request.url.clone(),
            width: request.width,
            height: request.height,
            frame_count: 0,
            show_face: host != "empty",
            stopped: false,
        })
    }

    /// Native-space rectangle of the synthetic face for frame `n`.
    pub fn face_rect(&self, n: u64) -> (u32, u32, u32, u32) {
        let side = (self.height / 3).max(1);
        let span_x = self.width.saturating_sub(side).max(1);
        let span_y = self.height.saturating_sub(side).max(1);
        // Triangle wave so the face sweeps back and forth.
        let phase = (n % 240) as u32;
        let t = if phase < 120 { phase } else { 240 - phase };
        let x = span_x * t / 120;
        let y = span_y / 2 + (span_y / 4) * t / 120;
        (x.min(span_x), y.min(span_y), side, side)
    }

    fn render(&self) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([BACKGROUND; 3]));
        if self.show_face {
            let (fx, fy, side, _) = self.face_rect(self.frame_count);
            for y in fy..(fy + side).min(self.height) {
                for x in fx..(fx + side).min(self.width) {
                    image.put_pixel(x, y, Rgb([FACE; 3]));
                }
            }
        }
        image
    }
}

impl VideoDevice for SyntheticCamera {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.url)
    }

    fn native_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_ready(&self) -> bool {
        !self.stopped
    }

    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError> {
        if self.stopped {
            return Ok(None);
        }
        self.frame_count += 1;
        Ok(Some(VideoFrame::from_image(self.render())))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
