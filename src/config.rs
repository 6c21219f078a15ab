use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::capture::{CaptureRequest, Facing};
use crate::detect::DEFAULT_MIN_REQUEST_INTERVAL;
use crate::frame::{
    DEFAULT_SAMPLE_HEIGHT, DEFAULT_SAMPLE_QUALITY, DEFAULT_SAMPLE_WIDTH, DEFAULT_SNAPSHOT_QUALITY,
};
use crate::overlay::DEFAULT_SMOOTHING_ALPHA;

const DEFAULT_CAMERA_URL: &str = "stub://front_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR_URL: &str = "stub://";
/// Detection cadence tick. Requests are further spaced by the rate limiter.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Auto-expiry of a shown detection. Off by default.
pub const DEFAULT_STALE_AFTER: Option<Duration> = None;
pub const DEFAULT_WARMUP: Duration = Duration::from_millis(500);
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_RENDER_HZ: u32 = 60;

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    sample: Option<SampleConfigFile>,
    timing: Option<TimingConfigFile>,
    smoothing_alpha: Option<f64>,
    snapshot_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    facing: Option<Facing>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    url: Option<String>,
    bearer_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SampleConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    poll_ms: Option<u64>,
    min_request_ms: Option<u64>,
    warmup_ms: Option<u64>,
    capture_ms: Option<u64>,
    stale_ms: Option<u64>,
    render_hz: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub camera: CaptureRequest,
    pub detector: DetectorSettings,
    pub sample: SampleSettings,
    pub timing: TimingSettings,
    pub smoothing_alpha: f64,
    pub snapshot_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub://[name]` or an http(s) endpoint.
    pub url: String,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SampleSettings {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub poll_interval: Duration,
    pub min_request_interval: Duration,
    pub warmup: Duration,
    pub capture_interval: Duration,
    pub stale_after: Option<Duration>,
    pub render_hz: u32,
}

impl TimingSettings {
    pub fn render_interval(&self) -> Duration {
        Duration::from_secs(1) / self.render_hz.max(1)
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self::from_file(PreviewConfigFile::default())
    }
}

impl PreviewConfig {
    /// File named by `FACECAM_CONFIG` (JSON), then defaults, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACECAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PreviewConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let sample = file.sample.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        Self {
            camera: CaptureRequest {
                url: camera
                    .url
                    .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                facing: camera.facing.unwrap_or_default(),
            },
            detector: DetectorSettings {
                url: detector
                    .url
                    .unwrap_or_else(|| DEFAULT_DETECTOR_URL.to_string()),
                bearer_token: detector.bearer_token,
            },
            sample: SampleSettings {
                width: sample.width.unwrap_or(DEFAULT_SAMPLE_WIDTH),
                height: sample.height.unwrap_or(DEFAULT_SAMPLE_HEIGHT),
                quality: sample.quality.unwrap_or(DEFAULT_SAMPLE_QUALITY),
            },
            timing: TimingSettings {
                poll_interval: timing
                    .poll_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                min_request_interval: timing
                    .min_request_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_MIN_REQUEST_INTERVAL),
                warmup: timing
                    .warmup_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WARMUP),
                capture_interval: timing
                    .capture_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CAPTURE_INTERVAL),
                stale_after: timing
                    .stale_ms
                    .map(Duration::from_millis)
                    .or(DEFAULT_STALE_AFTER),
                render_hz: timing.render_hz.unwrap_or(DEFAULT_RENDER_HZ),
            },
            smoothing_alpha: file.smoothing_alpha.unwrap_or(DEFAULT_SMOOTHING_ALPHA),
            snapshot_quality: file.snapshot_quality.unwrap_or(DEFAULT_SNAPSHOT_QUALITY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("FACECAM_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(url) = std::env::var("FACECAM_DETECTOR_URL") {
            if !url.trim().is_empty() {
                self.detector.url = url;
            }
        }
        if let Ok(token) = std::env::var("FACECAM_DETECTOR_TOKEN") {
            if !token.trim().is_empty() {
                self.detector.bearer_token = Some(token);
            }
        }
        if let Ok(alpha) = std::env::var("FACECAM_SMOOTHING_ALPHA") {
            self.smoothing_alpha = alpha
                .trim()
                .parse()
                .map_err(|_| anyhow!("FACECAM_SMOOTHING_ALPHA must be a number in (0, 1]"))?;
        }
        if let Some(poll) = env_millis("FACECAM_POLL_MS")? {
            self.timing.poll_interval = poll;
        }
        if let Some(min_request) = env_millis("FACECAM_MIN_REQUEST_MS")? {
            self.timing.min_request_interval = min_request;
        }
        if let Some(capture) = env_millis("FACECAM_CAPTURE_MS")? {
            self.timing.capture_interval = capture;
        }
        if let Ok(stale) = std::env::var("FACECAM_STALE_MS") {
            // "0" or "off" disables expiry.
            let stale = stale.trim();
            self.timing.stale_after = match stale {
                "" | "0" | "off" => None,
                ms => Some(Duration::from_millis(ms.parse().map_err(|_| {
                    anyhow!("FACECAM_STALE_MS must be an integer number of milliseconds or 'off'")
                })?)),
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(anyhow!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.sample.width == 0 || self.sample.height == 0 {
            return Err(anyhow!("sample resolution must be non-zero"));
        }
        if !(1..=100).contains(&self.sample.quality) || !(1..=100).contains(&self.snapshot_quality)
        {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if self.timing.poll_interval.is_zero()
            || self.timing.capture_interval.is_zero()
            || self.timing.render_hz == 0
        {
            return Err(anyhow!("poll, capture and render intervals must be non-zero"));
        }
        if self.detector.url.trim().is_empty() {
            return Err(anyhow!("detector url must not be empty"));
        }
        Ok(())
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<PreviewConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
