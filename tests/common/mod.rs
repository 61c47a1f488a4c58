//! Fixtures shared by the integration tests.
#![allow(dead_code, unused_imports)]

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use lopdf::{Document, Object};
use planmark::pipeline::backend::RasterRequest;
use planmark::pipeline::janitor::ResourceJanitor;
use planmark::{BackendFailure, BackendKind, RasterImage, RenderBackend};
use std::path::Path;

#[path = "../../src/test_support.rs"]
mod fixtures;

pub(crate) use fixtures::{synthetic_pdf, with_crop_box};

/// Route `tracing` output through the test harness; `RUST_LOG` picks the
/// level. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write a synthetic plan under `root` and return its path.
pub fn write_plan(root: &Path, name: &str, pages: u32) -> std::path::PathBuf {
    let path = root.join(name);
    std::fs::write(&path, synthetic_pdf(pages, 612.0, 792.0)).unwrap();
    path
}

/// Deterministic page raster: a gradient that differs per page, 4:3 aspect.
pub fn gradient(page: u32, width: u32) -> RgbaImage {
    let height = width * 3 / 4;
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, (page * 40 % 256) as u8, 255])
    })
}

/// Always succeeds with [`gradient`], reporting itself as `kind`.
pub struct GradientBackend(pub BackendKind);

#[async_trait]
impl RenderBackend for GradientBackend {
    fn kind(&self) -> BackendKind {
        self.0
    }

    async fn rasterize_page(
        &self,
        request: &RasterRequest<'_>,
        _janitor: &ResourceJanitor,
    ) -> Result<RasterImage, BackendFailure> {
        Ok(RasterImage::from_dynamic(
            DynamicImage::ImageRgba8(gradient(request.page, request.target_width_px)),
            self.0.method_name(),
        ))
    }
}

/// Creates two temp files through the janitor, then fails.
pub struct LitteringBackend(pub BackendKind);

#[async_trait]
impl RenderBackend for LitteringBackend {
    fn kind(&self) -> BackendKind {
        self.0
    }

    async fn rasterize_page(
        &self,
        _request: &RasterRequest<'_>,
        janitor: &ResourceJanitor,
    ) -> Result<RasterImage, BackendFailure> {
        for label in ["first", "second"] {
            let path = janitor
                .create(label, "png")
                .map_err(|e| BackendFailure::Io(e.to_string()))?;
            std::fs::write(&path, b"partial").map_err(|e| BackendFailure::Io(e.to_string()))?;
        }
        Err(BackendFailure::ExitStatus {
            code: Some(1),
            stderr: "simulated crash".to_string(),
        })
    }
}

pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Text of every page's content stream, in page order.
pub fn page_text(doc: &Document) -> String {
    doc.get_pages()
        .values()
        .map(|&id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
        .collect()
}

/// Number of image XObjects in the file.
pub fn image_xobjects(doc: &Document) -> usize {
    doc.objects
        .values()
        .filter(|o| match o {
            Object::Stream(s) => s.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Image"[..]),
            _ => false,
        })
        .count()
}
