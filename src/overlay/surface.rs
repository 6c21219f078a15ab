//! Drawing surfaces for the overlay.
//!
//! - `DisplayList`: records draw operations (hosts that paint themselves, tests)
//! - `ImageSurface`: rasterizes into an RGBA image (snapshots, headless hosts),
//!   labels in the bundled DejaVu Sans Mono

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use super::geometry::BoxF;

/// A surface shared between the render thread and the host.
pub type SharedSurface = Arc<Mutex<dyn Surface>>;

/// Average glyph advance relative to font size, for surfaces without fonts.
const GLYPH_ADVANCE: f64 = 0.6;
/// Largest label size `ImageSurface` rasterizes.
const MAX_TEXT_PX: f64 = 256.0;

pub trait Surface: Send {
    fn size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    /// Erase everything drawn so far.
    fn clear(&mut self);

    fn stroke_rect(&mut self, rect: BoxF, color: Rgba<u8>, line_width: f64);

    fn fill_rect(&mut self, rect: BoxF, color: Rgba<u8>);

    /// Open polyline through `points`.
    fn stroke_path(&mut self, points: &[(f64, f64)], color: Rgba<u8>, line_width: f64);

    /// Draw `text` with its top-left corner at `(x, y)`.
    fn fill_text(&mut self, text: &str, x: f64, y: f64, font_px: f64, color: Rgba<u8>);

    fn measure_text(&self, text: &str, font_px: f64) -> f64 {
        text.chars().count() as f64 * font_px * GLYPH_ADVANCE
    }
}

// ----------------------------------------------------------------------------
// DisplayList
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    StrokeRect {
        rect: BoxF,
        color: Rgba<u8>,
        line_width: f64,
    },
    FillRect {
        rect: BoxF,
        color: Rgba<u8>,
    },
    StrokePath {
        points: Vec<(f64, f64)>,
        color: Rgba<u8>,
        line_width: f64,
    },
    Text {
        text: String,
        x: f64,
        y: f64,
        font_px: f64,
        color: Rgba<u8>,
    },
}

/// Records the operations of the current frame.
#[derive(Debug, Default)]
pub struct DisplayList {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
    clears: u64,
    resizes: u64,
}

impl DisplayList {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Operations drawn since the last clear.
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn clears(&self) -> u64 {
        self.clears
    }

    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    pub fn rects(&self) -> impl Iterator<Item = BoxF> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::StrokeRect { rect, .. } => Some(*rect),
            _ => None,
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl Surface for DisplayList {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.resizes += 1;
        self.ops.clear();
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.clears += 1;
    }

    fn stroke_rect(&mut self, rect: BoxF, color: Rgba<u8>, line_width: f64) {
        self.ops.push(DrawOp::StrokeRect {
            rect,
            color,
            line_width,
        });
    }

    fn fill_rect(&mut self, rect: BoxF, color: Rgba<u8>) {
        self.ops.push(DrawOp::FillRect { rect, color });
    }

    fn stroke_path(&mut self, points: &[(f64, f64)], color: Rgba<u8>, line_width: f64) {
        self.ops.push(DrawOp::StrokePath {
            points: points.to_vec(),
            color,
            line_width,
        });
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, font_px: f64, color: Rgba<u8>) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
            font_px,
            color,
        });
    }
}

// ----------------------------------------------------------------------------
// ImageSurface
// ----------------------------------------------------------------------------

static LABEL_FONT_TTF: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono.ttf");

fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(LABEL_FONT_TTF) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("overlay: label font unusable, labels are not rasterized: {}", err);
            None
        }
    })
    .as_ref()
}

/// Stroke thickness in whole pixels, at least one.
fn thickness(line_width: f64) -> u32 {
    if line_width.is_finite() {
        line_width.round().clamp(1.0, 64.0) as u32
    } else {
        1
    }
}

/// Liang-Barsky clip of the segment `from -> to` against `bounds`.
fn clip_segment(
    from: (f64, f64),
    to: (f64, f64),
    bounds: &BoxF,
) -> Option<((f64, f64), (f64, f64))> {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, from.0 - bounds.x),
        (dx, bounds.right() - from.0),
        (-dy, from.1 - bounds.y),
        (dy, bounds.bottom() - from.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((
        (from.0 + t0 * dx, from.1 + t0 * dy),
        (from.0 + t1 * dx, from.1 + t1 * dy),
    ))
}

/// Transparent RGBA canvas sized to the display, drawn with `imageproc`.
///
/// Every primitive is clipped to the canvas before rasterizing, so drawing
/// cost is bounded by the canvas size whatever the geometry.
#[derive(Debug)]
pub struct ImageSurface {
    canvas: RgbaImage,
}

impl ImageSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.canvas
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write overlay snapshot {}", path.display()))
    }

    /// The canvas grown by `margin` on every side.
    fn bounds(&self, margin: f64) -> BoxF {
        let (w, h) = self.canvas.dimensions();
        BoxF::new(
            -margin,
            -margin,
            w as f64 + 2.0 * margin,
            h as f64 + 2.0 * margin,
        )
    }

    /// Whole-pixel rect for an already clipped box.
    fn pixel_rect(rect: BoxF) -> Option<Rect> {
        let w = rect.w.round();
        let h = rect.h.round();
        if !(w >= 1.0 && h >= 1.0) {
            return None;
        }
        Some(Rect::at(rect.x.round() as i32, rect.y.round() as i32).of_size(w as u32, h as u32))
    }

    fn segment(&mut self, from: (f64, f64), to: (f64, f64), color: Rgba<u8>, width: u32) {
        let half = (width / 2) as f64;
        if from.0 == to.0 || from.1 == to.1 {
            // Axis-aligned: a filled band of the stroke width.
            let band = BoxF::new(
                from.0.min(to.0) - half,
                from.1.min(to.1) - half,
                (to.0 - from.0).abs() + width as f64,
                (to.1 - from.1).abs() + width as f64,
            );
            self.fill_rect(band, color);
            return;
        }
        let Some((a, b)) = clip_segment(from, to, &self.bounds(width as f64)) else {
            return;
        };
        let steep = (b.1 - a.1).abs() > (b.0 - a.0).abs();
        for k in 0..width {
            let off = k as f64 - half;
            let (ox, oy) = if steep { (off, 0.0) } else { (0.0, off) };
            draw_line_segment_mut(
                &mut self.canvas,
                ((a.0 + ox) as f32, (a.1 + oy) as f32),
                ((b.0 + ox) as f32, (b.1 + oy) as f32),
                color,
            );
        }
    }
}

impl Surface for ImageSurface {
    fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.canvas = RgbaImage::new(width, height);
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, rect: BoxF, color: Rgba<u8>, line_width: f64) {
        let width = thickness(line_width);
        let half = (width / 2) as f64;
        let outer = BoxF::new(
            rect.x - half,
            rect.y - half,
            rect.w + 2.0 * half,
            rect.h + 2.0 * half,
        );
        // Edges outside the canvas land in the margin and stay invisible.
        let Some(outer) = outer.intersect(&self.bounds(width as f64)) else {
            return;
        };
        for inset in 0..width {
            let i = inset as f64;
            let ring = BoxF::new(outer.x + i, outer.y + i, outer.w - 2.0 * i, outer.h - 2.0 * i);
            let Some(ring) = Self::pixel_rect(ring) else {
                break;
            };
            draw_hollow_rect_mut(&mut self.canvas, ring, color);
        }
    }

    fn fill_rect(&mut self, rect: BoxF, color: Rgba<u8>) {
        let Some(rect) = rect.intersect(&self.bounds(0.0)).and_then(Self::pixel_rect) else {
            return;
        };
        draw_filled_rect_mut(&mut self.canvas, rect, color);
    }

    fn stroke_path(&mut self, points: &[(f64, f64)], color: Rgba<u8>, line_width: f64) {
        let width = thickness(line_width);
        for pair in points.windows(2) {
            self.segment(pair[0], pair[1], color, width);
        }
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, font_px: f64, color: Rgba<u8>) {
        let Some(font) = label_font() else {
            return;
        };
        if !(x.is_finite() && y.is_finite() && font_px > 0.0 && font_px <= MAX_TEXT_PX) {
            return;
        }
        // Glyph positions are i32; text wholly off the canvas is skipped.
        let bounds = self.bounds(MAX_TEXT_PX);
        if x >= bounds.right() || y >= bounds.bottom() || y < bounds.y {
            return;
        }
        let text_w = self.measure_text(text, font_px);
        if x + text_w < bounds.x {
            return;
        }
        draw_text_mut(
            &mut self.canvas,
            color,
            x.round() as i32,
            y.round() as i32,
            PxScale::from(font_px as f32),
            font,
            text,
        );
    }

    fn measure_text(&self, text: &str, font_px: f64) -> f64 {
        match label_font() {
            Some(font) if font_px > 0.0 && font_px <= MAX_TEXT_PX => {
                text_size(PxScale::from(font_px as f32), font, text).0 as f64
            }
            _ => text.chars().count() as f64 * font_px * GLYPH_ADVANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PINK: Rgba<u8> = Rgba([255, 107, 157, 255]);

    #[test]
    fn display_list_clear_drops_ops() {
        let mut list = DisplayList::new(320, 240);
        list.stroke_rect(BoxF::new(1.0, 1.0, 5.0, 5.0), PINK, 3.0);
        list.fill_text("hi", 0.0, 0.0, 14.0, PINK);
        assert_eq!(list.rects().count(), 1);
        assert_eq!(list.texts().collect::<Vec<_>>(), vec!["hi"]);

        list.clear();
        assert!(list.ops().is_empty());
        assert_eq!(list.clears(), 1);
    }

    #[test]
    fn image_surface_strokes_rect_outline_only() {
        let mut surface = ImageSurface::new(64, 64);
        surface.stroke_rect(BoxF::new(10.0, 10.0, 30.0, 30.0), PINK, 2.0);

        assert_eq!(*surface.image().get_pixel(10, 10), PINK);
        assert_eq!(*surface.image().get_pixel(40, 25), PINK);
        assert_eq!(surface.image().get_pixel(25, 25).0[3], 0);
    }

    #[test]
    fn image_surface_clips_out_of_bounds() {
        let mut surface = ImageSurface::new(16, 16);
        surface.fill_rect(BoxF::new(-10.0, -10.0, 100.0, 100.0), PINK);
        assert_eq!(*surface.image().get_pixel(15, 15), PINK);

        surface.clear();
        assert_eq!(surface.image().get_pixel(15, 15).0[3], 0);
    }

    fn painted(surface: &ImageSurface) -> usize {
        surface.image().pixels().filter(|p| p.0[3] > 0).count()
    }

    #[test]
    fn label_text_is_rasterized() {
        let mut surface = ImageSurface::new(96, 32);
        surface.fill_text("Abebe 88%", 2.0, 4.0, 16.0, PINK);
        assert!(painted(&surface) > 20);

        let short = surface.measure_text("Ab", 16.0);
        let long = surface.measure_text("Abebe 88%", 16.0);
        assert!(short > 0.0 && long > short);
    }

    #[test]
    fn text_past_the_canvas_paints_nothing() {
        let mut surface = ImageSurface::new(32, 32);
        surface.fill_text("Abebe", 1e12, 4.0, 16.0, PINK);
        surface.fill_text("Abebe", f64::NAN, 4.0, 16.0, PINK);
        assert_eq!(painted(&surface), 0);
    }

    #[test]
    fn huge_geometry_is_clipped_to_the_canvas() {
        let mut surface = ImageSurface::new(64, 64);
        surface.stroke_rect(BoxF::new(1.0, 1.0, 1e13, 1e13), PINK, 3.0);
        assert_eq!(*surface.image().get_pixel(1, 30), PINK);
        assert_eq!(surface.image().get_pixel(63, 63).0[3], 0);

        surface.clear();
        surface.stroke_path(&[(-1e13, -2e13), (1e13, 3e13)], PINK, 5.0);
        surface.stroke_path(&[(10.0, 10.0), (10.0, 1e13)], PINK, 5.0);
        assert_eq!(*surface.image().get_pixel(10, 50), PINK);
    }

    #[test]
    fn diagonal_segment_is_drawn() {
        let mut surface = ImageSurface::new(32, 32);
        surface.stroke_path(&[(0.0, 0.0), (31.0, 31.0)], PINK, 1.0);
        assert_eq!(*surface.image().get_pixel(16, 16), PINK);
        assert_eq!(surface.image().get_pixel(30, 2).0[3], 0);
    }

    #[test]
    fn resize_changes_canvas() {
        let mut surface = ImageSurface::new(16, 16);
        surface.resize(320, 240);
        assert_eq!(surface.size(), (320, 240));
    }
}
