//! Marker compositing: scale the pin glyph and alpha-blend it onto a page.

use crate::config::MarkerPolicy;
use crate::error::PlanmarkError;
use crate::model::NormPoint;
use crate::pipeline::backend::RasterImage;
use crate::pipeline::geometry::{marker_size, normalized_to_pixel, place_marker, PixelBox};
use image::{imageops, Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;

/// The pin image. Immutable and cheap to clone.
#[derive(Debug, Clone)]
pub struct MarkerGlyph {
    image: Arc<RgbaImage>,
}

const PIN_W: u32 = 64;
const PIN_H: u32 = 96;
const PIN_FILL: [u8; 3] = [214, 40, 40];
const PIN_EDGE: [u8; 3] = [110, 12, 12];

impl MarkerGlyph {
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Load a glyph from an image file (PNG with alpha, typically).
    pub fn from_path(path: &Path) -> Result<Self, PlanmarkError> {
        let image = image::open(path).map_err(|e| {
            PlanmarkError::InvalidConfig(format!("marker glyph {}: {e}", path.display()))
        })?;
        Ok(Self::from_image(image.to_rgba8()))
    }

    /// The built-in teardrop pin: red head with a white eye, tip at the
    /// bottom-center pixel. Edges are 4×4 supersampled.
    pub fn default_pin() -> Self {
        let cx = PIN_W as f32 / 2.0;
        let head_r = 30.0f32;
        let head_cy = head_r + 2.0;
        let eye_r = 11.0f32;

        let inside_pin = |x: f32, y: f32| -> bool {
            let (dx, dy) = (x - cx, y - head_cy);
            if dx * dx + dy * dy <= head_r * head_r {
                return true;
            }
            // Cone from the head's lower half down to the tip.
            let top = head_cy + head_r * 0.5;
            let tip = PIN_H as f32;
            if y < top || y > tip {
                return false;
            }
            let half = head_r * 0.87 * (tip - y) / (tip - top);
            dx.abs() <= half
        };
        let inside_eye = |x: f32, y: f32| {
            let (dx, dy) = (x - cx, y - head_cy);
            dx * dx + dy * dy <= eye_r * eye_r
        };
        let inside_core = |x: f32, y: f32| {
            let (dx, dy) = (x - cx, y - head_cy);
            dx * dx + dy * dy <= (head_r - 3.0) * (head_r - 3.0)
                || (y > head_cy && inside_pin(x - 2.0, y) && inside_pin(x + 2.0, y) && inside_pin(x, y + 3.0))
        };

        let mut image = RgbaImage::new(PIN_W, PIN_H);
        const SS: u32 = 4;
        for (px, py, pixel) in image.enumerate_pixels_mut() {
            let (mut cover, mut eye, mut core) = (0u32, 0u32, 0u32);
            for sy in 0..SS {
                for sx in 0..SS {
                    let x = px as f32 + (sx as f32 + 0.5) / SS as f32;
                    let y = py as f32 + (sy as f32 + 0.5) / SS as f32;
                    if inside_pin(x, y) {
                        cover += 1;
                        if inside_eye(x, y) {
                            eye += 1;
                        } else if inside_core(x, y) {
                            core += 1;
                        }
                    }
                }
            }
            if cover == 0 {
                continue;
            }
            let edge = cover - eye - core;
            let mix = |c: usize| -> u8 {
                let sum = u32::from(PIN_EDGE[c]) * edge
                    + u32::from(PIN_FILL[c]) * core
                    + 255 * eye;
                (sum / cover) as u8
            };
            let alpha = (cover * 255 / (SS * SS)) as u8;
            *pixel = Rgba([mix(0), mix(1), mix(2), alpha]);
        }
        Self::from_image(image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl Default for MarkerGlyph {
    fn default() -> Self {
        Self::default_pin()
    }
}

/// A page raster with the marker drawn on it.
#[derive(Debug, Clone)]
pub struct Composite {
    pub raster: RasterImage,
    /// Where the scaled glyph was placed.
    pub marker_box: PixelBox,
}

/// Draw `glyph` onto a copy of `base` at `point`.
///
/// The glyph is scaled to the policy height (aspect kept, Lanczos3), its
/// bottom-center is anchored at the point, and the whole glyph is kept inside
/// the canvas. `base` is not modified.
pub fn composite(
    base: &RasterImage,
    glyph: &MarkerGlyph,
    point: NormPoint,
    policy: &MarkerPolicy,
) -> Composite {
    let (cw, ch) = (base.width(), base.height());
    let (mw, mh) = marker_size(glyph.width(), glyph.height(), cw, ch, policy);
    let scaled = imageops::resize(glyph.image(), mw, mh, imageops::FilterType::Lanczos3);

    let (px, py) = normalized_to_pixel(point.x(), point.y(), cw, ch);
    let (left, top) = place_marker(px, py, mw, mh, cw, ch);

    let mut canvas = base.pixels().clone();
    blend_onto_opaque(&mut canvas, &scaled, left, top);

    Composite {
        raster: RasterImage::from_rgba(canvas, base.method()),
        marker_box: PixelBox {
            left,
            top,
            width: mw,
            height: mh,
        },
    }
}

/// Source-over blend of `top` onto an opaque `canvas` at `(left, top_y)`.
///
/// Integer arithmetic so the canvas alpha stays exactly 255.
fn blend_onto_opaque(canvas: &mut RgbaImage, top: &RgbaImage, left: u32, top_y: u32) {
    for (x, y, fg) in top.enumerate_pixels() {
        let (cx, cy) = (left + x, top_y + y);
        if cx >= canvas.width() || cy >= canvas.height() {
            continue;
        }
        let a = u32::from(fg[3]);
        if a == 0 {
            continue;
        }
        let bg = canvas.get_pixel_mut(cx, cy);
        for c in 0..3 {
            let v = (u32::from(fg[c]) * a + u32::from(bg[c]) * (255 - a) + 127) / 255;
            bg[c] = v as u8;
        }
        bg[3] = 255;
    }
}
