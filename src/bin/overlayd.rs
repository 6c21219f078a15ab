//! overlayd - headless face overlay preview
//!
//! Runs one preview session:
//! 1. Opens the camera (synthetic, HTTP or V4L2)
//! 2. Polls the detector at a bounded rate, one request in flight
//! 3. Renders the smoothed face box into an off-screen overlay
//! 4. Optionally writes overlay PNGs and full-resolution capture JPEGs
//! 5. Stops cleanly on Ctrl-C, after `--seconds`, or when the camera goes away

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use facecam_overlay::{
    detect::detector_from_url,
    ui::{Ui, UiMode},
    FaceDetector, ImageSurface, PreviewConfig, PreviewSession, SessionEvent, SharedSurface,
    Snapshot,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_WAIT: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera URL (stub://..., http(s)://..., /dev/videoN). Overrides config.
    #[arg(long, env = "FACECAM_CAMERA_URL")]
    camera: Option<String>,
    /// Detector URL (stub://[name] or http(s)://...). Overrides config.
    #[arg(long, env = "FACECAM_DETECTOR_URL")]
    detector: Option<String>,
    /// On-screen overlay size, WIDTHxHEIGHT.
    #[arg(long, default_value = "640x480")]
    display: String,
    /// Stop after this many seconds (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    seconds: u64,
    /// Write the overlay as PNG here every stats interval.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Write capture-sink snapshots as JPEG here.
    #[arg(long)]
    capture_dir: Option<PathBuf>,
    /// Output mode: auto, plain, pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::new(UiMode::parse(Some(&args.ui)), std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("Loading configuration");
        PreviewConfig::load()?
    };
    if let Some(camera) = args.camera {
        cfg.camera.url = camera;
    }
    if let Some(detector) = args.detector {
        cfg.detector.url = detector;
    }
    let (width, height) = parse_size(&args.display)?;

    let detector = detector_from_url(&cfg.detector.url, cfg.detector.bearer_token.as_deref())?;
    log::info!("detector: {} ({})", detector.name(), cfg.detector.url);

    let overlay = Arc::new(Mutex::new(ImageSurface::new(width, height)));
    let surface: SharedSurface = overlay.clone();
    let mut session = PreviewSession::new(cfg, detector, surface)?;

    if let Some(dir) = &args.capture_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("create capture dir {}", dir.display()))?;
        let dir = dir.clone();
        let mut count = 0u64;
        session.set_capture_sink(Box::new(move |snapshot: Snapshot| {
            count += 1;
            let path = dir.join(format!("capture_{:06}.jpg", count));
            match fs::write(&path, &snapshot.jpeg) {
                Ok(()) => log::info!(
                    "capture: wrote {} ({}x{})",
                    path.display(),
                    snapshot.width,
                    snapshot.height
                ),
                Err(err) => log::warn!("capture: write {} failed: {}", path.display(), err),
            }
        }));
    }
    if let Some(dir) = &args.snapshot_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("create snapshot dir {}", dir.display()))?;
    }

    {
        let _stage = ui.stage("Starting camera");
        session.start()?;
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let mut badge = ui.badge();
    let mut last_stats = Instant::now();
    let mut overlay_count = 0u64;
    let mut lost = None;

    loop {
        if rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match session.next_event(EVENT_WAIT) {
            Some(SessionEvent::DeviceLost(reason)) => {
                lost = Some(reason);
                break;
            }
            Some(event) => log::debug!("session event: {:?}", event),
            None => {}
        }
        badge.update(session.face_detected(), &session.stats());

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            log::info!("stats: {}", serde_json::to_string(&session.stats())?);
            if let Some(dir) = &args.snapshot_dir {
                overlay_count += 1;
                write_overlay(&overlay, dir, overlay_count)?;
            }
        }
    }

    badge.finish();
    session.stop();
    log::info!("final stats: {}", serde_json::to_string(&session.stats())?);
    match lost {
        Some(reason) => Err(anyhow!("camera lost: {}", reason)),
        None => Ok(()),
    }
}

fn write_overlay(overlay: &Mutex<ImageSurface>, dir: &Path, n: u64) -> Result<()> {
    let path = dir.join(format!("overlay_{:06}.png", n));
    let surface = overlay
        .lock()
        .map_err(|_| anyhow!("overlay surface poisoned"))?;
    surface.save_png(&path)?;
    log::debug!("overlay: wrote {}", path.display());
    Ok(())
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("display size must look like 640x480, got '{}'", value))?;
    let w: u32 = w.trim().parse().context("display width")?;
    let h: u32 = h.trim().parse().context("display height")?;
    if w == 0 || h == 0 {
        return Err(anyhow!("display size must be non-zero"));
    }
    Ok((w, h))
}
