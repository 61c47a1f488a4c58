//! One pin on one page: the component both the preview and the report call.
//!
//! ```text
//! PinJob ──▶ BackendSelector ──▶ compose ──▶ PNG
//!            (first working      (marker at
//!             backend)            the point)
//! ```

use crate::config::{MarkerPolicy, PlanmarkConfig};
use crate::error::PlanmarkError;
use crate::model::NormPoint;
use crate::pipeline::backend::RasterRequest;
use crate::pipeline::compose::{composite, Composite, MarkerGlyph};
use crate::pipeline::janitor::ResourceJanitor;
use crate::pipeline::selector::{BackendAttempt, BackendSelector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// What to draw.
#[derive(Debug, Clone, Copy)]
pub struct PinJob<'a> {
    pub pdf_path: &'a Path,
    /// 1-based.
    pub page: u32,
    pub point: NormPoint,
    pub width_px: u32,
}

/// Result of one pin render. `composite == None` means no renderer was
/// available; `attempts` says why.
#[derive(Debug)]
pub struct PinRender {
    pub composite: Option<Composite>,
    pub method_used: Option<&'static str>,
    pub attempts: Vec<BackendAttempt>,
}

impl PinRender {
    /// Encode the composite as PNG, if there is one.
    pub fn to_png(&self) -> Result<Option<Vec<u8>>, PlanmarkError> {
        self.composite
            .as_ref()
            .map(|c| {
                c.raster
                    .to_png()
                    .map_err(|e| PlanmarkError::Internal(format!("PNG encoding failed: {e}")))
            })
            .transpose()
    }
}

/// Backend selection plus compositing, with a shared marker glyph.
#[derive(Clone)]
pub struct PinRenderer {
    selector: Arc<BackendSelector>,
    glyph: MarkerGlyph,
    marker: MarkerPolicy,
    max_height_px: u32,
    temp_root: PathBuf,
}

impl PinRenderer {
    pub fn new(selector: Arc<BackendSelector>, glyph: MarkerGlyph, config: &PlanmarkConfig) -> Self {
        Self {
            selector,
            glyph,
            marker: config.marker,
            max_height_px: config.max_raster_height_px,
            temp_root: config.temp_root(),
        }
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    /// A fresh janitor for one request.
    pub fn janitor(&self) -> ResourceJanitor {
        ResourceJanitor::new(&self.temp_root)
    }

    /// Render with temporaries tracked by `janitor`.
    pub async fn render(&self, job: &PinJob<'_>, janitor: &ResourceJanitor) -> PinRender {
        let request = RasterRequest {
            pdf_path: job.pdf_path,
            page: job.page,
            target_width_px: job.width_px,
            max_height_px: self.max_height_px,
        };
        let result = self.selector.render(&request, janitor).await;

        let composite = result.raster.as_ref().map(|base| {
            let out = composite(base, &self.glyph, job.point, &self.marker);
            debug!(
                "marker at ({:.3}, {:.3}) → box {:?}",
                job.point.x(),
                job.point.y(),
                out.marker_box
            );
            out
        });

        PinRender {
            composite,
            method_used: result.method_used,
            attempts: result.attempts,
        }
    }

    /// Render with a janitor scoped to this call; every temporary is gone
    /// when it returns.
    pub async fn render_scoped(&self, job: &PinJob<'_>) -> PinRender {
        let janitor = self.janitor();
        self.render(job, &janitor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendFailure;
    use crate::pipeline::availability::BackendAvailability;
    use crate::pipeline::backend::{BackendKind, RasterImage, RenderBackend};
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};

    struct Blank;

    #[async_trait]
    impl RenderBackend for Blank {
        fn kind(&self) -> BackendKind {
            BackendKind::Poppler
        }

        async fn rasterize_page(
            &self,
            request: &RasterRequest<'_>,
            janitor: &ResourceJanitor,
        ) -> Result<RasterImage, BackendFailure> {
            janitor.create("blank", "png").map_err(|e| BackendFailure::Io(e.to_string()))?;
            let img = RgbaImage::from_pixel(request.target_width_px, 300, Rgba([255; 4]));
            Ok(RasterImage::from_dynamic(DynamicImage::ImageRgba8(img), "pdftoppm"))
        }
    }

    fn renderer(dir: &Path, availability: BackendAvailability) -> PinRenderer {
        let config = PlanmarkConfig::builder().temp_dir(dir).build().unwrap();
        let backends: Vec<Arc<dyn RenderBackend>> = vec![Arc::new(Blank)];
        let selector = Arc::new(BackendSelector::new(backends, availability));
        PinRenderer::new(selector, MarkerGlyph::default_pin(), &config)
    }

    #[tokio::test]
    async fn renders_png_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path(), BackendAvailability::all());
        let job = PinJob {
            pdf_path: Path::new("plan.pdf"),
            page: 1,
            point: NormPoint::new(0.5, 0.5),
            width_px: 400,
        };
        let out = r.render_scoped(&job).await;
        assert_eq!(out.method_used, Some("pdftoppm"));
        let png = out.to_png().unwrap().unwrap();
        assert_eq!(&png[1..4], b"PNG");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn no_backend_means_no_composite() {
        let dir = tempfile::tempdir().unwrap();
        let r = renderer(dir.path(), BackendAvailability::none());
        let job = PinJob {
            pdf_path: Path::new("plan.pdf"),
            page: 1,
            point: NormPoint::new(0.1, 0.1),
            width_px: 200,
        };
        let out = r.render_scoped(&job).await;
        assert!(out.composite.is_none());
        assert!(out.to_png().unwrap().is_none());
        assert_eq!(out.attempts.len(), 1);
    }
}
