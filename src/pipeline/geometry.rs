//! Normalized page coordinates → raster pixels, and marker placement.
//!
//! Every backend produces a raster whose origin is the top-left corner of the
//! page, so one transform serves them all. Inputs are clamped to `[0, 1]`
//! here, at the single point where geometry happens, rather than trusting
//! each call site to have done it.

use crate::config::MarkerPolicy;

/// Clamp a normalized value into `[0, 1]`. NaN becomes 0.
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Map a normalized point onto a `width × height` raster.
///
/// Out-of-range input is a data-quality problem, not an error: it is clamped
/// to the nearest edge. `x_norm = 1.0` maps to `px = width`, i.e. the right
/// edge line, not the last pixel column.
pub fn normalized_to_pixel(x_norm: f64, y_norm: f64, width: u32, height: u32) -> (u32, u32) {
    let px = (clamp_unit(x_norm) * f64::from(width)).round() as u32;
    let py = (clamp_unit(y_norm) * f64::from(height)).round() as u32;
    (px, py)
}

/// Top-left corner for a marker anchored bottom-center at `(px, py)`.
///
/// The result is clamped so the whole `marker_w × marker_h` box lies inside
/// the canvas. Near the edges this moves the marker away from its true
/// anchor: a pin at `(0, 0)` is drawn with its left and top edges on the
/// canvas border instead of being three quarters clipped. Keeping the pin
/// visible wins over literal pixel placement there.
///
/// A marker larger than the canvas is pinned to `(0, 0)`; callers size the
/// glyph with [`marker_size`] first, which never lets that happen.
pub fn place_marker(
    px: u32,
    py: u32,
    marker_w: u32,
    marker_h: u32,
    canvas_w: u32,
    canvas_h: u32,
) -> (u32, u32) {
    let max_left = i64::from(canvas_w.saturating_sub(marker_w));
    let max_top = i64::from(canvas_h.saturating_sub(marker_h));

    let left = (i64::from(px) - i64::from(marker_w) / 2).clamp(0, max_left);
    let top = (i64::from(py) - i64::from(marker_h)).clamp(0, max_top);

    (left as u32, top as u32)
}

/// Marker height for a canvas: `max(min_px, round(canvas_h × fraction))`,
/// never taller than the canvas itself.
pub fn marker_height(canvas_h: u32, policy: &MarkerPolicy) -> u32 {
    let scaled = (f64::from(canvas_h) * f64::from(policy.height_fraction)).round() as u32;
    scaled.max(policy.min_height_px).min(canvas_h).max(1)
}

/// Marker `(width, height)` for a glyph of `glyph_w × glyph_h` on a canvas,
/// preserving the glyph's aspect ratio and fitting inside the canvas.
pub fn marker_size(
    glyph_w: u32,
    glyph_h: u32,
    canvas_w: u32,
    canvas_h: u32,
    policy: &MarkerPolicy,
) -> (u32, u32) {
    let mut h = marker_height(canvas_h, policy);
    let aspect = f64::from(glyph_w.max(1)) / f64::from(glyph_h.max(1));
    let mut w = (f64::from(h) * aspect).round().max(1.0) as u32;

    if w > canvas_w {
        // Very wide glyph on a narrow canvas: shrink both to fit the width.
        w = canvas_w.max(1);
        h = ((f64::from(w) / aspect).round() as u32).clamp(1, canvas_h.max(1));
    }
    (w, h)
}

/// Axis-aligned box in raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelBox {
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }
}
