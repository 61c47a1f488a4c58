//! In-process rasterisation through pdfium.
//!
//! pdfium keeps thread-local state and blocks for the whole render, so every
//! call runs on `spawn_blocking` rather than on a Tokio worker.

use super::{BackendKind, RasterImage, RasterRequest, RenderBackend};
use crate::error::BackendFailure;
use crate::pipeline::janitor::ResourceJanitor;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// pdfium-render backend. Holds only the library location; the library is
/// bound per call so nothing pdfium-owned outlives a request.
pub struct NativeBackend {
    library_path: Option<PathBuf>,
}

impl NativeBackend {
    /// `library_path` may name the shared library itself or the directory
    /// holding it. `None` binds whatever the system loader finds.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }
}

/// Bind the pdfium shared library.
pub(crate) fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, BackendFailure> {
    let bindings = match library_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| BackendFailure::Library(format!("cannot bind pdfium: {e:?}")))?;
    Ok(Pdfium::new(bindings))
}

#[async_trait]
impl RenderBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn rasterize_page(
        &self,
        request: &RasterRequest<'_>,
        _janitor: &ResourceJanitor,
    ) -> Result<RasterImage, BackendFailure> {
        let library = self.library_path.clone();
        let path = request.pdf_path.to_path_buf();
        let page = request.page;
        let width = request.target_width_px;
        let max_height = request.max_height_px;
        let method = self.method_name();

        tokio::task::spawn_blocking(move || {
            render_blocking(library.as_deref(), &path, page, width, max_height, method)
        })
        .await
        .map_err(|e| BackendFailure::Internal(format!("pdfium task panicked: {e}")))?
    }
}

fn render_blocking(
    library: Option<&Path>,
    pdf_path: &Path,
    page: u32,
    width: u32,
    max_height: u32,
    method: &'static str,
) -> Result<RasterImage, BackendFailure> {
    let pdfium = bind_pdfium(library)?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| BackendFailure::Library(format!("cannot open {}: {e:?}", pdf_path.display())))?;

    let pages = document.pages();
    let total = u32::from(pages.len());
    if page == 0 || page > total {
        return Err(BackendFailure::Library(format!(
            "page {page} out of range (document has {total})"
        )));
    }

    let index = u16::try_from(page - 1)
        .map_err(|_| BackendFailure::Library(format!("page {page} beyond pdfium's page index")))?;
    let pdf_page = pages
        .get(index)
        .map_err(|e| BackendFailure::Library(format!("page {page}: {e:?}")))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(clamp_i32(width))
        .set_maximum_height(clamp_i32(max_height));

    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| BackendFailure::Library(format!("render page {page}: {e:?}")))?;

    let image = bitmap.as_image();
    debug!(
        "pdfium rendered page {} → {}x{} px",
        page,
        image.width(),
        image.height()
    );

    Ok(RasterImage::from_dynamic(image, method).normalize_width(width, max_height))
}

fn clamp_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
