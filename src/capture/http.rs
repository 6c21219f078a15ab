//! Network camera over HTTP.
//!
//! Supports `multipart/x-mixed-replace` MJPEG streams and plain JPEG snapshot
//! endpoints. The first frame is read during `open` so the native resolution
//! is known before the session starts.

use std::io::Read;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use super::{CaptureError, CaptureRequest, VideoDevice};
use crate::frame::VideoFrame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpCamera {
    url: String,
    stream: Option<HttpStream>,
    pending: Option<VideoFrame>,
    native: (u32, u32),
    frames_read: u64,
    last_frame_at: Option<Instant>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

impl HttpCamera {
    pub fn open(request: &CaptureRequest) -> Result<Self, CaptureError> {
        let response = ureq::get(&request.url)
            .query("width", &request.width.to_string())
            .query("height", &request.height.to_string())
            .call()
            .map_err(|err| classify_connect_error(&request.url, err))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();

        let (stream, first) = if content_type.contains("multipart") {
            let mut stream = MjpegStream::new(response.into_reader());
            let jpeg = stream
                .read_next_jpeg()
                .map_err(|err| CaptureError::DeviceUnavailable(format!("{:#}", err)))?;
            (HttpStream::Mjpeg(stream), jpeg)
        } else {
            let jpeg = read_body(response.into_reader())
                .map_err(|err| CaptureError::DeviceUnavailable(format!("{:#}", err)))?;
            (HttpStream::Snapshot, jpeg)
        };

        let frame =
            decode_jpeg(&first).map_err(|err| CaptureError::DeviceUnavailable(format!("{:#}", err)))?;
        let native = frame.size();
        log::info!(
            "HttpCamera: connected to {} ({}x{}, {})",
            request.url,
            native.0,
            native.1,
            match stream {
                HttpStream::Mjpeg(_) => "mjpeg",
                HttpStream::Snapshot => "snapshot",
            }
        );
        Ok(Self {
            url: request.url.clone(),
            stream: Some(stream),
            pending: Some(frame),
            native,
            frames_read: 0,
            last_frame_at: None,
        })
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(stream)) => stream.read_next_jpeg(),
            Some(HttpStream::Snapshot) => fetch_snapshot(&self.url),
            None => Err(anyhow!("http camera stopped")),
        }
    }
}

impl VideoDevice for HttpCamera {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn native_size(&self) -> (u32, u32) {
        self.native
    }

    fn is_ready(&self) -> bool {
        self.stream.is_some()
    }

    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError> {
        if self.stream.is_none() {
            return Ok(None);
        }
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => {
                let jpeg = self
                    .next_jpeg()
                    .map_err(|err| CaptureError::DeviceLost(format!("{:#}", err)))?;
                match decode_jpeg(&jpeg) {
                    Ok(frame) => frame,
                    Err(err) => {
                        // A corrupt frame is not a lost stream.
                        log::debug!("HttpCamera: dropping undecodable frame: {:#}", err);
                        return Ok(None);
                    }
                }
            }
        };
        self.native = frame.size();
        self.frames_read += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::info!(
                "HttpCamera: closed {} after {} frames",
                self.url,
                self.frames_read
            );
        }
        self.pending = None;
    }
}

fn classify_connect_error(url: &str, err: ureq::Error) -> CaptureError {
    match err {
        ureq::Error::Status(code @ (401 | 403), _) => {
            CaptureError::PermissionDenied(format!("{} answered {}", url, code))
        }
        other => CaptureError::DeviceUnavailable(format!("{}: {}", url, other)),
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_body(response.into_reader())
}

fn read_body(reader: impl Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg body")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg body"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<VideoFrame> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(VideoFrame::from_image(image.into_rgb8()))
}

/// Locate the first complete SOI..EOI JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
