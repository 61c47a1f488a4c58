//! Rendering backends: one PDF page in, one opaque raster out.
//!
//! Three strategies exist because hosts differ. A server with a pdfium
//! library renders in-process; a stock Linux box usually has poppler's
//! `pdftoppm`; a print-shop box often only has Ghostscript. Each variant
//! implements [`RenderBackend`] and knows nothing about the others. Ordering
//! and fallback live in [`crate::pipeline::selector`], installation probing
//! in [`crate::pipeline::availability`].
//!
//! Every variant renders the page's visible area (its effective CropBox, see
//! [`crate::crop::effective_crop_box`]): pdfium does so by default, `pdftoppm`
//! is passed `-cropbox`, Ghostscript `-dUseCropBox`. Whatever the tool
//! produced, a successful attempt returns a fully opaque [`RasterImage`] of
//! the requested width (narrower only when the height cap bites), so the
//! coordinate transform downstream is the same for every backend.

mod ghostscript;
pub(crate) mod native;
mod poppler;
mod subprocess;

pub use ghostscript::GhostscriptBackend;
pub use native::NativeBackend;
pub use poppler::PopplerBackend;

use crate::error::BackendFailure;
use crate::pipeline::janitor::ResourceJanitor;
use async_trait::async_trait;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use std::path::Path;

/// The three rendering strategies, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// pdfium, in-process.
    Native,
    /// poppler's `pdftoppm`, subprocess.
    Poppler,
    /// Ghostscript, subprocess.
    Ghostscript,
}

impl BackendKind {
    /// Fixed try order: cheapest and most reliable first.
    pub const PRIORITY: [BackendKind; 3] =
        [BackendKind::Native, BackendKind::Poppler, BackendKind::Ghostscript];

    /// Name recorded as `method_used` in results and debug output.
    pub fn method_name(self) -> &'static str {
        match self {
            BackendKind::Native => "pdfium",
            BackendKind::Poppler => "pdftoppm",
            BackendKind::Ghostscript => "ghostscript",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// One page to rasterise.
#[derive(Debug, Clone, Copy)]
pub struct RasterRequest<'a> {
    pub pdf_path: &'a Path,
    /// 1-based page number.
    pub page: u32,
    pub target_width_px: u32,
    /// Safety cap on the height for extreme aspect ratios.
    pub max_height_px: u32,
}

/// A freshly rendered page. Exclusively owned by whoever asked for it.
#[derive(Clone)]
pub struct RasterImage {
    pixels: RgbaImage,
    method: &'static str,
}

impl RasterImage {
    /// Wrap a rendered image, flattening any transparency onto white so the
    /// base raster is always opaque.
    pub fn from_dynamic(image: DynamicImage, method: &'static str) -> Self {
        let mut pixels = RgbaImage::from_pixel(image.width(), image.height(), Rgba([255, 255, 255, 255]));
        imageops::overlay(&mut pixels, &image.to_rgba8(), 0, 0);
        Self { pixels, method }
    }

    /// Wrap pixels that are already opaque (compositor output).
    pub(crate) fn from_rgba(pixels: RgbaImage, method: &'static str) -> Self {
        Self { pixels, method }
    }

    /// Decode a PNG produced by an external tool.
    pub fn from_png_file(path: &Path, method: &'static str) -> Result<Self, BackendFailure> {
        let image = image::open(path).map_err(|e| BackendFailure::Decode(e.to_string()))?;
        Ok(Self::from_dynamic(image, method))
    }

    /// Resize to `width` pixels wide, keeping the aspect ratio. When that
    /// would exceed `max_height`, both sides shrink by the same factor so the
    /// height is exactly `max_height` and the width comes out narrower.
    /// No-op when already the right size.
    pub fn normalize_width(self, width: u32, max_height: u32) -> Self {
        let (w, h) = self.pixels.dimensions();
        let max_height = max_height.max(1);
        if w == width && h <= max_height {
            return self;
        }
        let (w, h) = (f64::from(w.max(1)), f64::from(h.max(1)));
        let mut scale = f64::from(width.max(1)) / w;
        if h * scale > f64::from(max_height) {
            scale = f64::from(max_height) / h;
        }
        let target_w = ((w * scale).round() as u32).max(1);
        let target_h = ((h * scale).round() as u32).clamp(1, max_height);
        if (target_w, target_h) == self.pixels.dimensions() {
            return self;
        }
        let pixels = imageops::resize(&self.pixels, target_w, target_h, imageops::FilterType::Triangle);
        Self {
            pixels,
            method: self.method,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }

    /// Encode as PNG, the format both the preview and the report consume.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        Ok(buf)
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("method", &self.method)
            .finish()
    }
}

/// One strategy for turning a PDF page into a raster.
///
/// Implementations must not probe for their own installation and must not
/// panic on a missing tool: a spawn failure is just another
/// [`BackendFailure`]. Every file they write goes through `janitor`.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Name recorded as `method_used`. Defaults to the kind's name.
    fn method_name(&self) -> &'static str {
        self.kind().method_name()
    }

    async fn rasterize_page(
        &self,
        request: &RasterRequest<'_>,
        janitor: &ResourceJanitor,
    ) -> Result<RasterImage, BackendFailure>;
}

/// Size in points of the area a page renders to: its effective CropBox,
/// inherited through the page tree and falling back to the MediaBox.
///
/// Used by the Ghostscript backend to pick a resolution.
pub(crate) fn page_size_points(pdf_path: &Path, page: u32) -> Option<(f64, f64)> {
    let doc = lopdf::Document::load(pdf_path).ok()?;
    let page_id = *doc.get_pages().get(&page)?;
    let [llx, lly, urx, ury] = crate::crop::effective_crop_box(&doc, page_id)?;
    Some(((urx - llx).abs(), (ury - lly).abs()))
}
