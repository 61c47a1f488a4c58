//! poppler `pdftoppm` as a subprocess.

use super::subprocess::{run_bounded, verify_output};
use super::{BackendKind, RasterImage, RasterRequest, RenderBackend};
use crate::error::BackendFailure;
use crate::pipeline::janitor::ResourceJanitor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct PopplerBackend {
    program: String,
    timeout: Duration,
}

impl PopplerBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Arguments for one page scaled to `width`, height following the aspect.
    ///
    /// `-singlefile` makes pdftoppm write `<prefix>.png` instead of
    /// `<prefix>-<page>.png` with a page-count-dependent zero padding.
    /// `-cropbox` renders the visible area rather than the whole MediaBox.
    fn args(request: &RasterRequest<'_>, prefix: &Path) -> Vec<String> {
        let page = request.page.to_string();
        vec![
            "-png".into(),
            "-singlefile".into(),
            "-cropbox".into(),
            "-f".into(),
            page.clone(),
            "-l".into(),
            page,
            "-scale-to-x".into(),
            request.target_width_px.to_string(),
            "-scale-to-y".into(),
            "-1".into(),
            request.pdf_path.to_string_lossy().into_owned(),
            prefix.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl RenderBackend for PopplerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Poppler
    }

    async fn rasterize_page(
        &self,
        request: &RasterRequest<'_>,
        janitor: &ResourceJanitor,
    ) -> Result<RasterImage, BackendFailure> {
        let output = janitor
            .create("pdftoppm", "png")
            .map_err(|e| BackendFailure::Io(e.to_string()))?;
        let prefix: PathBuf = output.with_extension("");

        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(request, &prefix));
        debug!(
            "pdftoppm page {} → {} px wide",
            request.page, request.target_width_px
        );

        run_bounded(cmd, &self.program, self.timeout).await?;
        verify_output(&output)?;

        Ok(RasterImage::from_png_file(&output, self.method_name())?
            .normalize_width(request.target_width_px, request.max_height_px))
    }
}
