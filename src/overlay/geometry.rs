use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in some pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxF {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Independent per-axis scale factors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Scale mapping `from` pixels onto `to` pixels. `None` if `from` has no area.
    pub fn between(from: (u32, u32), to: (u32, u32)) -> Option<Self> {
        if from.0 == 0 || from.1 == 0 {
            return None;
        }
        Some(Self {
            x: to.0 as f64 / from.0 as f64,
            y: to.1 as f64 / from.1 as f64,
        })
    }

    pub fn min_axis(&self) -> f64 {
        self.x.min(self.y)
    }
}

impl BoxF {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// x and w scale by `scale.x`; y and h by `scale.y`.
    pub fn scaled(self, scale: Scale) -> Self {
        Self {
            x: self.x * scale.x,
            y: self.y * scale.y,
            w: self.w * scale.x,
            h: self.h * scale.y,
        }
    }

    /// Non-negative origin, positive size, all finite.
    pub fn is_drawable(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.w > 0.0
            && self.h > 0.0
    }

    /// Right and bottom edges lie within `limit` times the frame size.
    pub fn fits_frame(&self, frame: (u32, u32), limit: f64) -> bool {
        self.right() <= frame.0 as f64 * limit && self.bottom() <= frame.1 as f64 * limit
    }

    /// Overlap with `other`, `None` when they do not overlap.
    pub fn intersect(&self, other: &BoxF) -> Option<BoxF> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| BoxF::new(x, y, right - x, bottom - y))
    }

    pub fn min_side(&self) -> f64 {
        self.w.min(self.h)
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: BoxF, expected: BoxF) {
        for (a, e) in [
            (actual.x, expected.x),
            (actual.y, expected.y),
            (actual.w, expected.w),
            (actual.h, expected.h),
        ] {
            assert!((a - e).abs() < 0.05, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn compounds_detector_native_display_scaling() {
        let raw = BoxF::new(30.0, 20.0, 40.0, 30.0);
        let to_native = Scale::between((120, 90), (640, 480)).expect("scale");
        let to_display = Scale::between((640, 480), (320, 240)).expect("scale");

        let native = raw.scaled(to_native);
        assert_close(native, BoxF::new(160.0, 106.7, 213.3, 160.0));

        let display = native.scaled(to_display);
        assert_close(display, BoxF::new(80.0, 53.3, 106.7, 80.0));
    }

    #[test]
    fn axes_scale_independently() {
        let b = BoxF::new(10.0, 10.0, 10.0, 10.0).scaled(Scale::new(2.0, 0.5));
        assert_eq!(b, BoxF::new(20.0, 5.0, 20.0, 5.0));
    }

    #[test]
    fn zero_area_source_has_no_scale() {
        assert!(Scale::between((0, 480), (320, 240)).is_none());
        assert!(Scale::between((640, 0), (320, 240)).is_none());
    }

    #[test]
    fn degenerate_boxes_are_not_drawable() {
        assert!(BoxF::new(0.0, 0.0, 1.0, 1.0).is_drawable());
        assert!(!BoxF::new(-1.0, 0.0, 1.0, 1.0).is_drawable());
        assert!(!BoxF::new(0.0, -0.1, 1.0, 1.0).is_drawable());
        assert!(!BoxF::new(0.0, 0.0, -5.0, 1.0).is_drawable());
        assert!(!BoxF::new(0.0, 0.0, 1.0, 0.0).is_drawable());
        assert!(!BoxF::new(f64::NAN, 0.0, 1.0, 1.0).is_drawable());
    }

    #[test]
    fn frame_fit_allows_bounded_overshoot() {
        let frame = (640, 480);
        assert!(BoxF::new(600.0, 400.0, 100.0, 100.0).fits_frame(frame, 2.0));
        assert!(!BoxF::new(1.0, 1.0, 1e13, 1e13).fits_frame(frame, 2.0));
        assert!(!BoxF::new(0.0, 0.0, 10.0, 961.0).fits_frame(frame, 2.0));
    }

    #[test]
    fn intersection_clips_to_bounds() {
        let bounds = BoxF::new(0.0, 0.0, 64.0, 64.0);
        assert_eq!(
            BoxF::new(-10.0, 5.0, 1e13, 10.0).intersect(&bounds),
            Some(BoxF::new(0.0, 5.0, 64.0, 10.0))
        );
        assert!(BoxF::new(100.0, 0.0, 5.0, 5.0).intersect(&bounds).is_none());
    }
}
