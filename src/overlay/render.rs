//! Per-refresh overlay rendering.
//!
//! `OverlayRenderer` turns the latest detection into a display-space
//! `Annotation` (smoothing, mapping, validation) and draws it. `RenderLoop`
//! is one refresh tick of the render cadence: it owns the smoothing state and
//! is the sole reader of ActiveFlag for deciding whether to keep going.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use image::Rgba;

use super::geometry::{BoxF, Scale};
use super::smoother::BoxSmoother;
use super::surface::{SharedSurface, Surface};
use crate::capture::CaptureSession;
use crate::detect::DetectionResult;
use crate::session::{SessionStats, SharedState};

/// Label shown while the detector has not named the face.
pub const PLACEHOLDER_LABEL: &str = "DETECTING...";

const MIN_FONT_PX: f64 = 14.0;
const MAX_FONT_PX: f64 = 18.0;
/// Corner accent length at 1:1 display scale.
const CORNER_BASE_PX: f64 = 20.0;
/// How far past the native frame a detector box may reach, as a multiple of
/// the frame size, before it is treated as malformed.
pub const MAX_FRAME_OVERSHOOT: f64 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayStyle {
    pub color: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub line_width: f64,
    pub label_padding: f64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: Rgba([0xFF, 0x6B, 0x9D, 0xFF]),
            text_color: Rgba([0xFF, 0xFF, 0xFF, 0xFF]),
            line_width: 3.0,
            label_padding: 8.0,
        }
    }
}

/// Everything drawn for one face, in display-space pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub rect: BoxF,
    pub label: String,
    pub font_px: f64,
    pub corner_len: f64,
}

/// Why nothing was drawn this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderSkip {
    /// The slot is empty.
    NoDetection,
    /// The detection is older than the configured expiry.
    Expired,
    /// Native or display size is still zero.
    NoGeometry,
    /// Malformed box: negative coordinate, non-positive size, non-finite, or
    /// reaching far past the native frame.
    Rejected(BoxF),
}

pub fn label_text(detection: &DetectionResult) -> String {
    match (&detection.label, detection.confidence) {
        (Some(name), Some(confidence)) => {
            format!("{} {}%", name, (confidence * 100.0).round() as u32)
        }
        (Some(name), None) => name.clone(),
        (None, _) => PLACEHOLDER_LABEL.to_string(),
    }
}

pub fn font_size(rect: &BoxF) -> f64 {
    (rect.w / 15.0).clamp(MIN_FONT_PX, MAX_FONT_PX)
}

/// Accent length: proportional to the smaller box side, capped by display scale.
pub fn corner_length(rect: &BoxF, display_scale: Scale) -> f64 {
    (CORNER_BASE_PX * display_scale.min_axis()).min(rect.min_side() / 5.0)
}

pub struct OverlayRenderer {
    smoother: BoxSmoother,
    stale_after: Option<Duration>,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(smoother: BoxSmoother, stale_after: Option<Duration>) -> Self {
        Self {
            smoother,
            stale_after,
            style: OverlayStyle::default(),
        }
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    pub fn smoother(&self) -> &BoxSmoother {
        &self.smoother
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
    }

    /// Smooth the current detection and map it into display space.
    ///
    /// An empty slot leaves the smoothed state as it was. A degenerate raw
    /// box is rejected before it can pull the smoothed state.
    pub fn annotate(
        &mut self,
        detection: Option<&DetectionResult>,
        native: (u32, u32),
        display: (u32, u32),
        now: Instant,
    ) -> Result<Annotation, RenderSkip> {
        let detection = detection.ok_or(RenderSkip::NoDetection)?;
        if let Some(limit) = self.stale_after {
            if detection.age(now) > limit {
                return Err(RenderSkip::Expired);
            }
        }
        if !detection.bbox.is_drawable() {
            return Err(RenderSkip::Rejected(detection.bbox));
        }
        if display.0 == 0 || display.1 == 0 {
            return Err(RenderSkip::NoGeometry);
        }
        let scale = Scale::between(native, display).ok_or(RenderSkip::NoGeometry)?;
        if !detection.bbox.fits_frame(native, MAX_FRAME_OVERSHOOT) {
            return Err(RenderSkip::Rejected(detection.bbox));
        }

        let smoothed = self.smoother.update(detection.bbox);
        let rect = smoothed.scaled(scale);
        if !rect.is_drawable() {
            return Err(RenderSkip::Rejected(rect));
        }

        Ok(Annotation {
            rect,
            label: label_text(detection),
            font_px: font_size(&rect),
            corner_len: corner_length(&rect, scale),
        })
    }

    /// Bounding rectangle, corner accents, then the label above the box.
    pub fn draw(&self, annotation: &Annotation, surface: &mut dyn Surface) {
        let style = &self.style;
        let r = annotation.rect;
        surface.stroke_rect(r, style.color, style.line_width);

        let len = annotation.corner_len;
        let accent = style.line_width + 2.0;
        let corners = [
            [(r.x, r.y + len), (r.x, r.y), (r.x + len, r.y)],
            [(r.right() - len, r.y), (r.right(), r.y), (r.right(), r.y + len)],
            [
                (r.right(), r.bottom() - len),
                (r.right(), r.bottom()),
                (r.right() - len, r.bottom()),
            ],
            [(r.x + len, r.bottom()), (r.x, r.bottom()), (r.x, r.bottom() - len)],
        ];
        for corner in &corners {
            surface.stroke_path(corner, style.color, accent);
        }

        let pad = style.label_padding;
        let text_w = surface.measure_text(&annotation.label, annotation.font_px);
        let bg_h = annotation.font_px + pad;
        let bg = BoxF::new(r.x, (r.y - bg_h).max(0.0), text_w + 2.0 * pad, bg_h);
        surface.fill_rect(bg, style.color);
        surface.fill_text(
            &annotation.label,
            bg.x + pad,
            bg.y + pad / 2.0,
            annotation.font_px,
            style.text_color,
        );
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderTick {
    /// ActiveFlag is clear; do not reschedule.
    Terminated,
    Drawn(Annotation),
    Idle(RenderSkip),
}

impl RenderTick {
    pub fn is_terminated(&self) -> bool {
        matches!(self, RenderTick::Terminated)
    }
}

pub struct RenderLoop {
    renderer: OverlayRenderer,
    shared: Arc<SharedState>,
    capture: CaptureSession,
    surface: SharedSurface,
}

impl RenderLoop {
    pub fn new(
        renderer: OverlayRenderer,
        shared: Arc<SharedState>,
        capture: CaptureSession,
        surface: SharedSurface,
    ) -> Self {
        Self {
            renderer,
            shared,
            capture,
            surface,
        }
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    /// One display refresh.
    pub fn tick(&mut self, now: Instant) -> RenderTick {
        if !self.shared.is_active() {
            return RenderTick::Terminated;
        }

        let display = self.capture.display_size();
        let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if surface.size() != display {
            log::debug!("render: display resized to {}x{}", display.0, display.1);
            surface.resize(display.0, display.1);
        }
        surface.clear();

        let detection = self.shared.latest_detection();
        let native = self.capture.native_size();
        match self.renderer.annotate(detection.as_ref(), native, display, now) {
            Ok(annotation) => {
                self.renderer.draw(&annotation, &mut *surface);
                log::trace!("render: {:?} '{}'", annotation.rect, annotation.label);
                SessionStats::bump(&self.shared.stats().renders);
                RenderTick::Drawn(annotation)
            }
            Err(skip) => {
                if let RenderSkip::Rejected(rect) = skip {
                    log::trace!("render: rejected degenerate box {:?}", rect);
                    SessionStats::bump(&self.shared.stats().rejected_boxes);
                }
                RenderTick::Idle(skip)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureController, CaptureRequest, SizeCell};
    use crate::overlay::surface::{DisplayList, ImageSurface};
    use std::sync::Mutex;

    fn detection(bbox: BoxF) -> DetectionResult {
        DetectionResult::new(bbox, Instant::now())
    }

    fn renderer() -> OverlayRenderer {
        OverlayRenderer::new(BoxSmoother::default(), None)
    }

    #[test]
    fn label_variants() {
        let mut d = detection(BoxF::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(label_text(&d), "DETECTING...");

        d.label = Some("Abebe".to_string());
        assert_eq!(label_text(&d), "Abebe");

        d.confidence = Some(0.876);
        assert_eq!(label_text(&d), "Abebe 88%");
    }

    #[test]
    fn font_is_clamped() {
        assert_eq!(font_size(&BoxF::new(0.0, 0.0, 60.0, 60.0)), 14.0);
        assert_eq!(font_size(&BoxF::new(0.0, 0.0, 240.0, 60.0)), 16.0);
        assert_eq!(font_size(&BoxF::new(0.0, 0.0, 900.0, 60.0)), 18.0);
    }

    #[test]
    fn corner_tracks_smaller_side() {
        let half = Scale::new(0.5, 0.5);
        assert_eq!(corner_length(&BoxF::new(0.0, 0.0, 200.0, 25.0), half), 5.0);
        assert_eq!(corner_length(&BoxF::new(0.0, 0.0, 200.0, 200.0), half), 10.0);
    }

    #[test]
    fn maps_native_box_into_display_space() {
        let mut r = renderer();
        let d = detection(BoxF::new(160.0, 120.0, 200.0, 160.0));
        let a = r
            .annotate(Some(&d), (640, 480), (320, 240), Instant::now())
            .expect("drawable");
        assert_eq!(a.rect, BoxF::new(80.0, 60.0, 100.0, 80.0));
        assert_eq!(a.label, PLACEHOLDER_LABEL);
    }

    #[test]
    fn empty_slot_keeps_smoothed_state() {
        let mut r = renderer();
        let d = detection(BoxF::new(10.0, 10.0, 50.0, 50.0));
        r.annotate(Some(&d), (640, 480), (640, 480), Instant::now())
            .expect("drawable");

        let skip = r.annotate(None, (640, 480), (640, 480), Instant::now());
        assert_eq!(skip, Err(RenderSkip::NoDetection));
        assert_eq!(r.smoother().current(), Some(d.bbox));
    }

    #[test]
    fn degenerate_box_is_rejected_without_touching_state() {
        let mut r = renderer();
        let good = detection(BoxF::new(10.0, 10.0, 100.0, 100.0));
        r.annotate(Some(&good), (640, 480), (640, 480), Instant::now())
            .expect("drawable");

        let bad = detection(BoxF::new(10.0, 10.0, -10.0, 100.0));
        let skip = r.annotate(Some(&bad), (640, 480), (640, 480), Instant::now());
        assert!(matches!(skip, Err(RenderSkip::Rejected(_))));
        assert_eq!(r.smoother().current(), Some(good.bbox));
    }

    #[test]
    fn oversized_box_is_rejected_but_edge_box_is_drawn() {
        let mut r = renderer();
        let huge = detection(BoxF::new(1.0, 1.0, 1e13, 1e13));
        let skip = r.annotate(Some(&huge), (640, 480), (320, 240), Instant::now());
        assert!(matches!(skip, Err(RenderSkip::Rejected(_))));
        assert!(r.smoother().current().is_none());

        let edge = detection(BoxF::new(600.0, 400.0, 100.0, 100.0));
        let a = r
            .annotate(Some(&edge), (640, 480), (320, 240), Instant::now())
            .expect("partly off-frame box is still drawn");
        assert_eq!(a.rect, BoxF::new(300.0, 200.0, 50.0, 50.0));
    }

    #[test]
    fn stale_detection_expires_when_configured() {
        let mut r = OverlayRenderer::new(BoxSmoother::default(), Some(Duration::from_millis(100)));
        let taken = Instant::now();
        let d = DetectionResult::new(BoxF::new(1.0, 1.0, 10.0, 10.0), taken);

        assert!(r
            .annotate(Some(&d), (64, 48), (64, 48), taken + Duration::from_millis(50))
            .is_ok());
        assert_eq!(
            r.annotate(Some(&d), (64, 48), (64, 48), taken + Duration::from_millis(150)),
            Err(RenderSkip::Expired)
        );
    }

    #[test]
    fn draw_emits_rect_corners_and_label() {
        let r = renderer();
        let mut list = DisplayList::new(320, 240);
        let annotation = Annotation {
            rect: BoxF::new(50.0, 60.0, 100.0, 80.0),
            label: "Abebe 88%".to_string(),
            font_px: 14.0,
            corner_len: 10.0,
        };
        r.draw(&annotation, &mut list);

        assert_eq!(list.rects().collect::<Vec<_>>(), vec![annotation.rect]);
        assert_eq!(list.texts().collect::<Vec<_>>(), vec!["Abebe 88%"]);
        let paths = list
            .ops()
            .iter()
            .filter(|op| matches!(op, crate::overlay::DrawOp::StrokePath { .. }))
            .count();
        assert_eq!(paths, 4);
    }

    #[test]
    fn raster_draw_of_a_box_past_the_display_stays_bounded() {
        let r = renderer();
        let mut surface = ImageSurface::new(64, 48);
        let annotation = Annotation {
            rect: BoxF::new(4.0, 30.0, 1e12, 1e12),
            label: "Abebe".to_string(),
            font_px: 14.0,
            corner_len: 10.0,
        };
        r.draw(&annotation, &mut surface);

        assert_eq!(surface.image().get_pixel(4, 40).0[3], 255);
        assert_eq!(surface.image().get_pixel(40, 40).0[3], 0);
    }

    #[test]
    fn loop_resizes_draws_and_terminates() {
        let shared = Arc::new(SharedState::new());
        let controller = CaptureController::new(CaptureRequest::default());
        let display = SizeCell::new(320, 240);
        let capture = controller
            .start(&shared, display.clone())
            .expect("synthetic camera");
        let list = Arc::new(Mutex::new(DisplayList::new(0, 0)));
        let surface: SharedSurface = list.clone();
        let mut render = RenderLoop::new(renderer(), Arc::clone(&shared), capture.clone(), surface);

        assert_eq!(
            render.tick(Instant::now()),
            RenderTick::Idle(RenderSkip::NoDetection)
        );
        assert_eq!(list.lock().expect("lock").size(), (320, 240));

        shared.publish(Some(detection(BoxF::new(160.0, 120.0, 200.0, 160.0))));
        assert!(matches!(render.tick(Instant::now()), RenderTick::Drawn(_)));
        assert_eq!(list.lock().expect("lock").rects().count(), 1);

        display.set(640, 480);
        render.tick(Instant::now());
        assert_eq!(list.lock().expect("lock").resizes(), 2);

        controller.stop(&capture, &shared);
        assert!(render.tick(Instant::now()).is_terminated());
    }
}
