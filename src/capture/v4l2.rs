//! Local V4L2 camera (`/dev/videoN`).
//!
//! Requests packed RGB24 at the nominal resolution; drivers that negotiate a
//! different size are accepted and the negotiated size becomes native.

use std::io;

use ouroboros::self_referencing;

use super::{CaptureError, CaptureRequest, VideoDevice};
use crate::frame::VideoFrame;

pub struct V4l2Camera {
    path: String,
    state: Option<V4l2StreamState>,
    width: u32,
    height: u32,
    frames_read: u64,
}

#[self_referencing]
struct V4l2StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn open(request: &CaptureRequest) -> Result<Self, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = request.url.trim_start_matches("v4l2://").to_string();
        let mut device = v4l::Device::with_path(&path).map_err(|err| classify(&path, err))?;

        let mut format = device
            .format()
            .map_err(|err| CaptureError::DeviceUnavailable(format!("{}: {}", path, err)))?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .map_err(|err| CaptureError::DeviceUnavailable(format!("{}: {}", path, err)))?
            }
        };

        let state = V4l2StreamStateTryBuilder {
            device,
            stream_builder: |device| v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4),
        }
        .try_build()
        .map_err(|err| classify(&path, err))?;

        log::info!(
            "V4l2Camera: streaming {} ({}x{}, facing hint {:?} ignored)",
            path,
            format.width,
            format.height,
            request.facing
        );
        Ok(Self {
            path,
            state: Some(state),
            width: format.width,
            height: format.height,
            frames_read: 0,
        })
    }
}

impl VideoDevice for V4l2Camera {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn native_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let pixels = state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| CaptureError::DeviceLost(format!("{}: {}", self.path, err)))?;

        match VideoFrame::from_rgb(pixels, self.width, self.height) {
            Ok(frame) => {
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Err(err) => {
                log::debug!("V4l2Camera: dropping short buffer: {:#}", err);
                Ok(None)
            }
        }
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: closed {} after {} frames",
                self.path,
                self.frames_read
            );
        }
    }
}

fn classify(path: &str, err: io::Error) -> CaptureError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("{}: {}", path, err))
        }
        _ => CaptureError::DeviceUnavailable(format!("{}: {}", path, err)),
    }
}
