use anyhow::{anyhow, Result};

use super::geometry::BoxF;

/// Default smoothing coefficient. Lower is smoother but lags more.
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.3;

/// Exponential smoothing of a native-space box.
///
/// The first observed box initializes the state directly, so a new face does
/// not slide in from the origin.
#[derive(Clone, Debug)]
pub struct BoxSmoother {
    alpha: f64,
    state: Option<BoxF>,
}

impl BoxSmoother {
    /// `alpha` must lie in (0, 1].
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(anyhow!("smoothing alpha must be in (0, 1], got {}", alpha));
        }
        Ok(Self { alpha, state: None })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn current(&self) -> Option<BoxF> {
        self.state
    }

    /// Fold in one raw observation: `smoothed += alpha * (raw - smoothed)`.
    pub fn update(&mut self, raw: BoxF) -> BoxF {
        let next = match self.state {
            None => raw,
            Some(prev) => BoxF {
                x: prev.x + self.alpha * (raw.x - prev.x),
                y: prev.y + self.alpha * (raw.y - prev.y),
                w: prev.w + self.alpha * (raw.w - prev.w),
                h: prev.h + self.alpha * (raw.h - prev.h),
            },
        };
        self.state = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

impl Default for BoxSmoother {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_SMOOTHING_ALPHA,
            state: None,
        }
    }
}
