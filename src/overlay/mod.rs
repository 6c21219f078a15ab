//! Overlay geometry, smoothing and rendering.

mod geometry;
mod render;
mod smoother;
mod surface;

pub use geometry::{BoxF, Scale};
pub use render::{
    corner_length, font_size, label_text, Annotation, OverlayRenderer, OverlayStyle, RenderLoop,
    RenderSkip, RenderTick, MAX_FRAME_OVERSHOOT, PLACEHOLDER_LABEL,
};
pub use smoother::{BoxSmoother, DEFAULT_SMOOTHING_ALPHA};
pub use surface::{DisplayList, DrawOp, ImageSurface, SharedSurface, Surface};
