use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use facecam_overlay::detect::SkipReason;
use facecam_overlay::{
    BoxSmoother, CaptureController, CaptureRequest, CaptureSession, DetectionClient,
    DetectionOutcome, DetectionSample, DetectorBox, DetectorResponse, DisplayList, FaceData,
    FaceDetector, FrameSampler, ImageSurface, OverlayRenderer, RenderLoop, RenderSkip, RenderTick,
    SharedState, SharedSurface, SizeCell, TickOutcome,
};

/// Replays canned responses; `None` entries fail like a dropped connection.
struct ScriptedDetector {
    script: Mutex<VecDeque<Option<DetectorResponse>>>,
}

impl ScriptedDetector {
    fn new(script: Vec<Option<DetectorResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }
}

impl FaceDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, _sample: &DetectionSample) -> Result<DetectorResponse> {
        match self.script.lock().expect("script").pop_front() {
            Some(Some(response)) => Ok(response),
            Some(None) => Err(anyhow!("connection reset")),
            None => Ok(DetectorResponse::empty()),
        }
    }
}

fn face(x: f64, y: f64, w: f64, h: f64) -> DetectorResponse {
    DetectorResponse::success(vec![FaceData::new(DetectorBox { x, y, w, h })])
}

struct Rig {
    controller: CaptureController,
    shared: Arc<SharedState>,
    capture: CaptureSession,
    client: DetectionClient,
    render: RenderLoop,
    list: Arc<Mutex<DisplayList>>,
}

fn rig(detector: Arc<dyn FaceDetector>, min_interval: Duration) -> Rig {
    let shared = Arc::new(SharedState::new());
    let controller = CaptureController::new(CaptureRequest::default());
    let capture = controller
        .start(&shared, SizeCell::new(320, 240))
        .expect("synthetic camera");
    let client = DetectionClient::new(
        detector,
        FrameSampler::default(),
        Arc::clone(&shared),
        min_interval,
    );
    let list = Arc::new(Mutex::new(DisplayList::new(320, 240)));
    let surface: SharedSurface = list.clone();
    let render = RenderLoop::new(
        OverlayRenderer::new(BoxSmoother::default(), None),
        Arc::clone(&shared),
        capture.clone(),
        surface,
    );
    Rig {
        controller,
        shared,
        capture,
        client,
        render,
        list,
    }
}

fn dispatch(rig: &mut Rig, now: Instant) -> DetectionOutcome {
    match rig.client.tick(&rig.capture, now) {
        TickOutcome::Dispatched(job) => job.run(),
        TickOutcome::Skipped(reason) => panic!("tick skipped: {:?}", reason),
        TickOutcome::DeviceLost(err) => panic!("device lost: {}", err),
    }
}

#[test]
fn second_tick_while_in_flight_is_skipped() {
    let mut rig = rig(ScriptedDetector::new(vec![]), Duration::ZERO);
    let t0 = Instant::now();

    let job = match rig.client.tick(&rig.capture, t0) {
        TickOutcome::Dispatched(job) => job,
        _ => panic!("first tick should dispatch"),
    };
    assert_eq!(job.sample().width, 120);
    assert_eq!(job.sample().source_width, 640);
    assert!(rig.shared.is_in_flight());

    let second = rig.client.tick(&rig.capture, t0 + Duration::from_millis(10));
    assert_eq!(second.skip_reason(), Some(SkipReason::InFlight));

    drop(job);
    assert!(!rig.shared.is_in_flight());
    let third = rig.client.tick(&rig.capture, t0 + Duration::from_millis(20));
    assert!(matches!(third, TickOutcome::Dispatched(_)));
}

#[test]
fn request_starts_are_rate_limited() {
    let mut rig = rig(ScriptedDetector::new(vec![]), Duration::from_millis(500));
    let t0 = Instant::now();

    assert_eq!(dispatch(&mut rig, t0), DetectionOutcome::NoFace);
    let early = rig.client.tick(&rig.capture, t0 + Duration::from_millis(100));
    assert_eq!(early.skip_reason(), Some(SkipReason::RateLimited));
    assert_eq!(
        dispatch(&mut rig, t0 + Duration::from_millis(500)),
        DetectionOutcome::NoFace
    );
    assert_eq!(rig.shared.stats().snapshot().requests, 2);
}

#[test]
fn zero_faces_clear_the_box_on_next_render_tick() {
    let detector = ScriptedDetector::new(vec![
        Some(face(30.0, 20.0, 40.0, 30.0)),
        None,
        Some(DetectorResponse::empty()),
    ]);
    let mut rig = rig(detector, Duration::ZERO);
    let t0 = Instant::now();

    assert_eq!(dispatch(&mut rig, t0), DetectionOutcome::Detected);
    match rig.render.tick(t0) {
        RenderTick::Drawn(annotation) => {
            // 30,20,40,30 in 120x90 -> native 640x480 -> display 320x240.
            let r = annotation.rect;
            assert!((r.x - 80.0).abs() < 0.01);
            assert!((r.y - 53.333).abs() < 0.01);
            assert!((r.w - 106.667).abs() < 0.01);
            assert!((r.h - 80.0).abs() < 0.01);
        }
        other => panic!("expected a drawn box, got {:?}", other),
    }

    // A transport failure is "no information", the box stays.
    assert_eq!(dispatch(&mut rig, t0), DetectionOutcome::TransientFault);
    assert!(matches!(rig.render.tick(t0), RenderTick::Drawn(_)));

    assert_eq!(dispatch(&mut rig, t0), DetectionOutcome::NoFace);
    assert_eq!(
        rig.render.tick(t0),
        RenderTick::Idle(RenderSkip::NoDetection)
    );
    assert_eq!(rig.list.lock().expect("list").rects().count(), 0);
}

#[test]
fn malformed_box_never_reaches_the_surface() {
    let detector = ScriptedDetector::new(vec![Some(face(10.0, 10.0, -10.0, 20.0))]);
    let mut rig = rig(detector, Duration::ZERO);
    let now = Instant::now();

    assert_eq!(dispatch(&mut rig, now), DetectionOutcome::Detected);
    assert!(matches!(
        rig.render.tick(now),
        RenderTick::Idle(RenderSkip::Rejected(_))
    ));
    assert!(rig.list.lock().expect("list").ops().is_empty());
    assert_eq!(rig.shared.stats().snapshot().rejected_boxes, 1);
}

#[test]
fn smoothing_lags_toward_new_position() {
    let detector = ScriptedDetector::new(vec![
        Some(face(0.0, 0.0, 30.0, 30.0)),
        Some(face(60.0, 0.0, 30.0, 30.0)),
    ]);
    let mut rig = rig(detector, Duration::ZERO);
    let now = Instant::now();

    dispatch(&mut rig, now);
    rig.render.tick(now);
    dispatch(&mut rig, now);
    let RenderTick::Drawn(annotation) = rig.render.tick(now) else {
        panic!("expected a drawn box");
    };
    // native x: 0 -> 320, smoothed 0.3 of the way, then halved for display.
    assert!((annotation.rect.x - 48.0).abs() < 0.01);
    let smoothed = rig.render.renderer().smoother().current().expect("smoothed");
    assert!((smoothed.w - 160.0).abs() < 1e-6);
}

#[test]
fn stop_makes_both_cadences_quiesce() {
    let detector = ScriptedDetector::new(vec![Some(face(1.0, 1.0, 5.0, 5.0))]);
    let mut rig = rig(detector, Duration::ZERO);
    let now = Instant::now();
    dispatch(&mut rig, now);
    assert!(rig.shared.latest_detection().is_some());

    rig.controller.stop(&rig.capture, &rig.shared);
    assert!(rig.shared.latest_detection().is_none());
    assert!(rig.render.tick(now).is_terminated());
    assert_eq!(
        rig.client.tick(&rig.capture, now).skip_reason(),
        Some(SkipReason::Inactive)
    );
}

#[test]
fn extreme_box_is_rejected_on_a_raster_surface() {
    let detector = ScriptedDetector::new(vec![
        Some(face(1.0, 1.0, 1e13, 1e13)),
        Some(face(100.0, 60.0, 40.0, 40.0)),
    ]);
    let mut rig = rig(detector, Duration::ZERO);
    let overlay = Arc::new(Mutex::new(ImageSurface::new(320, 240)));
    let surface: SharedSurface = overlay.clone();
    let mut render = RenderLoop::new(
        OverlayRenderer::new(BoxSmoother::default(), None),
        Arc::clone(&rig.shared),
        rig.capture.clone(),
        surface,
    );
    let now = Instant::now();

    assert_eq!(dispatch(&mut rig, now), DetectionOutcome::Detected);
    assert!(matches!(
        render.tick(now),
        RenderTick::Idle(RenderSkip::Rejected(_))
    ));
    assert!(render.renderer().smoother().current().is_none());
    assert!(overlay
        .lock()
        .expect("overlay")
        .image()
        .pixels()
        .all(|p| p.0[3] == 0));

    // Partly past the right edge: drawn, clipped to the canvas.
    assert_eq!(dispatch(&mut rig, now), DetectionOutcome::Detected);
    let RenderTick::Drawn(annotation) = render.tick(now) else {
        panic!("expected a drawn box");
    };
    assert!(annotation.rect.right() > 320.0);
    let surface = overlay.lock().expect("overlay");
    let left = annotation.rect.x.round() as u32;
    let visible_y = ((annotation.rect.y + 240.0) / 2.0) as u32;
    assert_eq!(surface.image().get_pixel(left, visible_y).0[3], 255);
}
