//! Ghostscript (`gs`) as a subprocess.
//!
//! `gs` has no "scale to width" switch, only a resolution. The resolution is
//! derived from the width of the page's visible area (`-dUseCropBox` makes gs
//! render that same area) so the output lands close to the target;
//! [`RasterImage::normalize_width`] absorbs the rounding.

use super::subprocess::{run_bounded, verify_output};
use super::{page_size_points, BackendKind, RasterImage, RasterRequest, RenderBackend};
use crate::error::BackendFailure;
use crate::pipeline::janitor::ResourceJanitor;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const MIN_DPI: u32 = 10;
const MAX_DPI: u32 = 1200;

pub struct GhostscriptBackend {
    program: String,
    timeout: Duration,
    fallback_dpi: u32,
}

impl GhostscriptBackend {
    pub fn new(program: impl Into<String>, timeout: Duration, fallback_dpi: u32) -> Self {
        Self {
            program: program.into(),
            timeout,
            fallback_dpi,
        }
    }

    fn args(request: &RasterRequest<'_>, dpi: u32, output: &Path) -> Vec<String> {
        vec![
            "-q".into(),
            "-dSAFER".into(),
            "-dBATCH".into(),
            "-dNOPAUSE".into(),
            "-sDEVICE=png16m".into(),
            "-dUseCropBox".into(),
            format!("-r{dpi}"),
            format!("-dFirstPage={}", request.page),
            format!("-dLastPage={}", request.page),
            "-dTextAlphaBits=4".into(),
            "-dGraphicsAlphaBits=4".into(),
            format!("-sOutputFile={}", output.display()),
            request.pdf_path.to_string_lossy().into_owned(),
        ]
    }
}

/// Resolution that renders a `page_width_pt` wide page at `target_px`.
pub(crate) fn dpi_for_width(page_width_pt: Option<f64>, target_px: u32, fallback: u32) -> u32 {
    match page_width_pt {
        Some(w) if w.is_finite() && w > 0.0 => {
            let dpi = (f64::from(target_px) * 72.0 / w).ceil();
            (dpi as u32).clamp(MIN_DPI, MAX_DPI)
        }
        _ => fallback.clamp(MIN_DPI, MAX_DPI),
    }
}

#[async_trait]
impl RenderBackend for GhostscriptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ghostscript
    }

    async fn rasterize_page(
        &self,
        request: &RasterRequest<'_>,
        janitor: &ResourceJanitor,
    ) -> Result<RasterImage, BackendFailure> {
        let pdf = request.pdf_path.to_path_buf();
        let page = request.page;
        let size = tokio::task::spawn_blocking(move || page_size_points(&pdf, page))
            .await
            .map_err(|e| BackendFailure::Internal(format!("page size task panicked: {e}")))?;
        let dpi = dpi_for_width(size.map(|(w, _)| w), request.target_width_px, self.fallback_dpi);

        let output = janitor
            .create("gs", "png")
            .map_err(|e| BackendFailure::Io(e.to_string()))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(request, dpi, &output));
        debug!("ghostscript page {} at {} dpi", request.page, dpi);

        run_bounded(cmd, &self.program, self.timeout).await?;
        verify_output(&output)?;

        Ok(RasterImage::from_png_file(&output, self.method_name())?
            .normalize_width(request.target_width_px, request.max_height_px))
    }
}
