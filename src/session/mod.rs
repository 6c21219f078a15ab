//! Session lifecycle.
//!
//! `PreviewSession` wires capture, detection and rendering together:
//!
//! ```text
//! Idle -> Starting -> Active -> Stopping -> Idle
//! ```
//!
//! While Active, three cadences run on their own threads:
//! - render: one `RenderLoop` tick per display refresh
//! - detection: `DetectionClient` ticks after a warm-up delay; each dispatched
//!   request runs on a short-lived worker
//! - capture sink: full-resolution snapshots for the registered consumer
//!
//! Teardown is one ordered routine owned by `Running`, so it also runs when
//! start-up fails halfway or the session is dropped.

mod state;
mod ticker;

pub use state::{InFlightGuard, SessionStats, SharedState, StatsSnapshot};
pub use ticker::Ticker;

use std::ops::ControlFlow;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::capture::{
    CaptureController, CaptureError, CaptureSession, DeviceOpener, SizeCell, UrlDeviceOpener,
};
use crate::config::PreviewConfig;
use crate::detect::{DetectionClient, DetectionJob, FaceDetector, TickOutcome};
use crate::frame::{FrameSampler, Snapshot};
use crate::overlay::{BoxSmoother, OverlayRenderer, RenderLoop, SharedSurface, Surface};

/// Consumer of periodic full-resolution snapshots.
pub type CaptureSink = Box<dyn FnMut(Snapshot) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Notices for the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Started { native: (u32, u32) },
    /// The device went away mid-session. Terminal: the session stops.
    DeviceLost(String),
    Stopped,
}

type SinkSlot = Arc<Mutex<Option<CaptureSink>>>;

pub struct PreviewSession {
    config: PreviewConfig,
    controller: Arc<CaptureController>,
    detector: Arc<dyn FaceDetector>,
    smoother: BoxSmoother,
    surface: SharedSurface,
    display: SizeCell,
    sink: SinkSlot,
    state: SessionState,
    running: Option<Running>,
    last_stats: StatsSnapshot,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl PreviewSession {
    pub fn new(
        config: PreviewConfig,
        detector: Arc<dyn FaceDetector>,
        surface: SharedSurface,
    ) -> Result<Self> {
        Self::with_opener(config, detector, surface, Arc::new(UrlDeviceOpener))
    }

    pub fn with_opener(
        config: PreviewConfig,
        detector: Arc<dyn FaceDetector>,
        surface: SharedSurface,
        opener: Arc<dyn DeviceOpener>,
    ) -> Result<Self> {
        let smoother = BoxSmoother::new(config.smoothing_alpha)?;
        let (w, h) = lock_surface(&surface).size();
        let display = if w > 0 && h > 0 {
            SizeCell::new(w, h)
        } else {
            SizeCell::new(config.camera.width, config.camera.height)
        };
        let controller = Arc::new(CaptureController::with_opener(
            config.camera.clone(),
            opener,
        ));
        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            config,
            controller,
            detector,
            smoother,
            surface,
            display,
            sink: Arc::new(Mutex::new(None)),
            state: SessionState::Idle,
            running: None,
            last_stats: StatsSnapshot::default(),
            events_tx,
            events_rx,
        })
    }

    /// A session whose device was lost reports Idle even before its threads
    /// are joined.
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Active && !self.is_live() {
            return SessionState::Idle;
        }
        self.state
    }

    /// Running and still producing: ActiveFlag set.
    fn is_live(&self) -> bool {
        self.running.as_ref().is_some_and(|r| r.shared.is_active())
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    /// Shared flags of the running session, if any.
    pub fn shared(&self) -> Option<&Arc<SharedState>> {
        self.running.as_ref().map(|r| &r.shared)
    }

    pub fn capture_session(&self) -> Option<&CaptureSession> {
        self.running.as_ref().map(|r| &r.capture)
    }

    /// Acquire the camera and start all cadences. A no-op while Active.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_live() {
            log::debug!("session: start ignored, already active");
            return Ok(());
        }
        if self.running.is_some() {
            // The device went away under a cadence; finish that teardown first.
            self.stop();
        }
        self.state = SessionState::Starting;

        let shared = Arc::new(SharedState::new());
        let capture = match self.controller.start(&shared, self.display.clone()) {
            Ok(capture) => capture,
            Err(err) => {
                self.state = SessionState::Idle;
                match &err {
                    CaptureError::PermissionDenied(_) => log::error!("session: {}", err),
                    _ => log::warn!("session: {}", err),
                }
                return Err(err);
            }
        };

        let mut running = Running {
            controller: Arc::clone(&self.controller),
            shared,
            capture,
            detection: None,
            sink: None,
            render: None,
        };
        if let Err(err) = self.spawn_cadences(&mut running) {
            // Dropping `running` releases the device.
            self.state = SessionState::Idle;
            return Err(CaptureError::DeviceUnavailable(format!(
                "preview could not start: {:#}",
                err
            )));
        }

        let native = running.capture.native_size();
        self.running = Some(running);
        self.state = SessionState::Active;
        log::info!("session: active ({}x{})", native.0, native.1);
        let _ = self.events_tx.send(SessionEvent::Started { native });
        Ok(())
    }

    fn spawn_cadences(&self, running: &mut Running) -> Result<()> {
        let timing = &self.config.timing;

        let renderer = OverlayRenderer::new(self.smoother.clone(), timing.stale_after);
        let mut render = RenderLoop::new(
            renderer,
            Arc::clone(&running.shared),
            running.capture.clone(),
            Arc::clone(&self.surface),
        );
        running.render = Some(Ticker::spawn(
            "facecam-render",
            Duration::ZERO,
            timing.render_interval(),
            move |now| {
                if render.tick(now).is_terminated() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        )?);

        let sampler = FrameSampler::new(
            self.config.sample.width,
            self.config.sample.height,
            self.config.sample.quality,
        );
        let mut client = DetectionClient::new(
            Arc::clone(&self.detector),
            sampler,
            Arc::clone(&running.shared),
            timing.min_request_interval,
        );
        let lost = DeviceLossHandler::new(running, self.events_tx.clone());
        let capture = running.capture.clone();
        running.detection = Some(Ticker::spawn(
            "facecam-detect",
            timing.warmup,
            timing.poll_interval,
            move |now| match client.tick(&capture, now) {
                TickOutcome::Dispatched(job) => {
                    spawn_detection_worker(job);
                    ControlFlow::Continue(())
                }
                TickOutcome::Skipped(reason) => {
                    log::trace!("detect: tick skipped ({:?})", reason);
                    ControlFlow::Continue(())
                }
                TickOutcome::DeviceLost(err) => {
                    lost.handle(&err);
                    ControlFlow::Break(())
                }
            },
        )?);

        let lost = DeviceLossHandler::new(running, self.events_tx.clone());
        let capture = running.capture.clone();
        let shared = Arc::clone(&running.shared);
        let sink = Arc::clone(&self.sink);
        let quality = self.config.snapshot_quality;
        running.sink = Some(Ticker::spawn(
            "facecam-capture",
            timing.capture_interval,
            timing.capture_interval,
            move |_| {
                if !shared.is_active() {
                    return ControlFlow::Break(());
                }
                match deliver_snapshot(&capture, &shared, &sink, quality) {
                    Ok(_) => ControlFlow::Continue(()),
                    Err(err) => {
                        lost.handle(&err);
                        ControlFlow::Break(())
                    }
                }
            },
        )?);
        Ok(())
    }

    /// Ordered teardown. Safe to call in any state.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            self.state = SessionState::Idle;
            return;
        };
        self.state = SessionState::Stopping;
        log::info!("session: stopping");

        running.teardown();
        self.last_stats = running.shared.stats().snapshot();
        drop(running);
        lock_surface(&self.surface).clear();

        self.state = SessionState::Idle;
        log::info!("session: idle");
        let _ = self.events_tx.send(SessionEvent::Stopped);
    }

    /// Register the consumer of periodic snapshots, replacing any previous one.
    pub fn set_capture_sink(&self, sink: CaptureSink) {
        *lock_sink(&self.sink) = Some(sink);
    }

    pub fn clear_capture_sink(&self) {
        *lock_sink(&self.sink) = None;
    }

    /// Deliver one snapshot to the sink now. `Ok(false)` if nothing was delivered.
    pub fn capture_now(&mut self) -> Result<bool, CaptureError> {
        let Some(running) = self.running.as_ref().filter(|r| r.shared.is_active()) else {
            return Ok(false);
        };
        let quality = self.config.snapshot_quality;
        match deliver_snapshot(&running.capture, &running.shared, &self.sink, quality) {
            Ok(delivered) => Ok(delivered),
            Err(err) => {
                DeviceLossHandler::new(running, self.events_tx.clone()).handle(&err);
                self.stop();
                Err(err)
            }
        }
    }

    /// True while a detection is current. Drives host status badges.
    ///
    /// Uses the same expiry as the renderer, so the badge never claims a face
    /// the overlay has stopped drawing.
    pub fn face_detected(&self) -> bool {
        let Some(running) = self.running.as_ref().filter(|r| r.shared.is_active()) else {
            return false;
        };
        match (running.shared.latest_detection(), self.config.timing.stale_after) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(detection), Some(limit)) => detection.age(Instant::now()) <= limit,
        }
    }

    /// Update the on-screen size; picked up by the next render tick.
    pub fn set_display_size(&self, width: u32, height: u32) {
        self.display.set(width, height);
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.display.get()
    }

    /// Counters of the running session, or of the last one after a stop.
    pub fn stats(&self) -> StatsSnapshot {
        self.running
            .as_ref()
            .map(|r| r.shared.stats().snapshot())
            .unwrap_or(self.last_stats)
    }

    /// Wait up to `timeout` for the next notice.
    ///
    /// A `DeviceLost` notice completes the teardown before it is returned,
    /// unless the session was already restarted.
    pub fn next_event(&mut self, timeout: Duration) -> Option<SessionEvent> {
        let event = match self.events_rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };
        if matches!(event, SessionEvent::DeviceLost(_)) && !self.is_live() {
            self.stop();
        }
        Some(event)
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything acquired by one `start`.
struct Running {
    controller: Arc<CaptureController>,
    shared: Arc<SharedState>,
    capture: CaptureSession,
    detection: Option<Ticker>,
    sink: Option<Ticker>,
    render: Option<Ticker>,
}

impl Running {
    /// 1. clear ActiveFlag, 2-4. cancel detection, sink and render cadences,
    /// 5. release the device, 6. clear the detection slot.
    fn teardown(&mut self) {
        self.shared.deactivate();
        for ticker in [self.detection.take(), self.sink.take(), self.render.take()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = ticker.cancel() {
                log::warn!("session: {:#}", err);
            }
        }
        self.controller.stop(&self.capture, &self.shared);
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Treats a lost device like a stop from inside a cadence, then notifies the host.
struct DeviceLossHandler {
    controller: Arc<CaptureController>,
    shared: Arc<SharedState>,
    capture: CaptureSession,
    events: Sender<SessionEvent>,
}

impl DeviceLossHandler {
    fn new(running: &Running, events: Sender<SessionEvent>) -> Self {
        Self {
            controller: Arc::clone(&running.controller),
            shared: Arc::clone(&running.shared),
            capture: running.capture.clone(),
            events,
        }
    }

    fn handle(&self, err: &CaptureError) {
        // Only the first observer reports.
        if !self.shared.deactivate() {
            return;
        }
        log::warn!("session: {}", err);
        self.controller.stop(&self.capture, &self.shared);
        let _ = self.events.send(SessionEvent::DeviceLost(err.to_string()));
    }
}

fn spawn_detection_worker(job: DetectionJob) {
    let spawned = std::thread::Builder::new()
        .name("facecam-detect-call".to_string())
        .spawn(move || {
            let outcome = job.run();
            log::trace!("detect: {:?}", outcome);
        });
    // On failure the job is dropped and the in-flight claim released.
    if let Err(err) = spawned {
        log::warn!("detect: could not spawn request worker: {}", err);
    }
}

fn deliver_snapshot(
    capture: &CaptureSession,
    shared: &SharedState,
    sink: &Mutex<Option<CaptureSink>>,
    quality: u8,
) -> Result<bool, CaptureError> {
    let mut sink = lock_sink(sink);
    let Some(sink) = sink.as_mut() else {
        return Ok(false);
    };
    let Some(frame) = capture.read_frame()? else {
        return Ok(false);
    };
    match Snapshot::encode(&frame, quality) {
        Ok(snapshot) => {
            sink(snapshot);
            SessionStats::bump(&shared.stats().captures);
            Ok(true)
        }
        Err(err) => {
            log::debug!("capture: snapshot encode failed: {:#}", err);
            Ok(false)
        }
    }
}

fn lock_sink(sink: &Mutex<Option<CaptureSink>>) -> MutexGuard<'_, Option<CaptureSink>> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_surface(surface: &SharedSurface) -> MutexGuard<'_, dyn Surface + 'static> {
    surface.lock().unwrap_or_else(PoisonError::into_inner)
}
