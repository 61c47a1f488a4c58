//! Backend fallback: try each available backend once, in priority order.

use crate::config::PlanmarkConfig;
use crate::pipeline::availability::BackendAvailability;
use crate::pipeline::backend::{
    BackendKind, GhostscriptBackend, NativeBackend, PopplerBackend, RasterImage, RasterRequest,
    RenderBackend,
};
use crate::pipeline::janitor::ResourceJanitor;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one backend in one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
    /// Not installed on this host; never invoked.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendAttempt {
    pub method: &'static str,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// What the selector produced. `raster == None` means no renderer was
/// available, which callers treat as a soft failure.
#[derive(Debug, Default)]
pub struct BackendResult {
    pub raster: Option<RasterImage>,
    pub method_used: Option<&'static str>,
    pub attempts: Vec<BackendAttempt>,
}

impl BackendResult {
    pub fn succeeded(&self) -> bool {
        self.raster.is_some()
    }
}

/// Ordered backend registry plus the host's capability table.
pub struct BackendSelector {
    backends: Vec<Arc<dyn RenderBackend>>,
    availability: BackendAvailability,
}

impl BackendSelector {
    /// Backends are re-ordered by [`BackendKind::PRIORITY`]; registration
    /// order does not matter.
    pub fn new(mut backends: Vec<Arc<dyn RenderBackend>>, availability: BackendAvailability) -> Self {
        backends.sort_by_key(|b| b.kind());
        Self {
            backends,
            availability,
        }
    }

    /// The three real backends, configured from `config`.
    pub fn from_config(config: &PlanmarkConfig, availability: BackendAvailability) -> Self {
        let timeout = config.subprocess_timeout();
        let backends: Vec<Arc<dyn RenderBackend>> = vec![
            Arc::new(NativeBackend::new(config.pdfium_library_path.clone())),
            Arc::new(PopplerBackend::new(config.pdftoppm_program.clone(), timeout)),
            Arc::new(GhostscriptBackend::new(
                config.ghostscript_program.clone(),
                timeout,
                config.fallback_dpi,
            )),
        ];
        Self::new(backends, availability)
    }

    pub fn availability(&self) -> &BackendAvailability {
        &self.availability
    }

    /// Registered kinds, in try order.
    pub fn order(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Rasterise one page with the first backend that succeeds.
    pub async fn render(
        &self,
        request: &RasterRequest<'_>,
        janitor: &ResourceJanitor,
    ) -> BackendResult {
        let mut result = BackendResult::default();

        for backend in &self.backends {
            let method = backend.method_name();
            if !self.availability.is_available(backend.kind()) {
                debug!("{} not available, skipping", method);
                result.attempts.push(BackendAttempt {
                    method,
                    status: AttemptStatus::Skipped,
                    diagnostic: None,
                });
                continue;
            }

            match backend.rasterize_page(request, janitor).await {
                Ok(raster) => {
                    info!(
                        "page {} rendered by {} ({}x{})",
                        request.page,
                        method,
                        raster.width(),
                        raster.height()
                    );
                    result.attempts.push(BackendAttempt {
                        method,
                        status: AttemptStatus::Succeeded,
                        diagnostic: None,
                    });
                    result.method_used = Some(method);
                    result.raster = Some(raster);
                    return result;
                }
                Err(failure) => {
                    warn!("{} failed on page {}: {}", method, request.page, failure);
                    result.attempts.push(BackendAttempt {
                        method,
                        status: AttemptStatus::Failed,
                        diagnostic: Some(failure.to_string()),
                    });
                }
            }
        }

        warn!(
            "no renderer available for {} page {}",
            request.pdf_path.display(),
            request.page
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendFailure;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fake {
        kind: BackendKind,
        succeed: bool,
        calls: AtomicUsize,
    }

    impl Fake {
        fn new(kind: BackendKind, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                succeed,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RenderBackend for Fake {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn rasterize_page(
            &self,
            request: &RasterRequest<'_>,
            _janitor: &ResourceJanitor,
        ) -> Result<RasterImage, BackendFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                let img = RgbaImage::from_pixel(request.target_width_px, 10, Rgba([255; 4]));
                Ok(RasterImage::from_dynamic(DynamicImage::ImageRgba8(img), self.method_name()))
            } else {
                Err(BackendFailure::ExitStatus {
                    code: Some(1),
                    stderr: format!("{} broke", self.method_name()),
                })
            }
        }
    }

    fn request() -> RasterRequest<'static> {
        RasterRequest {
            pdf_path: Path::new("plan.pdf"),
            page: 1,
            target_width_px: 40,
            max_height_px: 6000,
        }
    }

    #[tokio::test]
    async fn falls_through_to_ghostscript() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let native = Fake::new(BackendKind::Native, false);
        let poppler = Fake::new(BackendKind::Poppler, false);
        let gs = Fake::new(BackendKind::Ghostscript, true);
        let registry: Vec<Arc<dyn RenderBackend>> = vec![gs.clone(), poppler.clone(), native.clone()];
        let selector = BackendSelector::new(registry, BackendAvailability::all());

        let result = selector.render(&request(), &janitor).await;
        assert!(result.succeeded());
        assert_eq!(result.method_used, Some("ghostscript"));
        assert_eq!(result.raster.as_ref().unwrap().method(), "ghostscript");
        let methods: Vec<_> = result.attempts.iter().map(|a| a.method).collect();
        assert_eq!(methods, ["pdfium", "pdftoppm", "ghostscript"]);
        assert_eq!(result.attempts[0].status, AttemptStatus::Failed);
        assert!(result.attempts[1].diagnostic.as_deref().unwrap().contains("pdftoppm broke"));
        assert_eq!(native.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gs.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_failing_is_no_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let registry: Vec<Arc<dyn RenderBackend>> = vec![
            Fake::new(BackendKind::Native, false),
            Fake::new(BackendKind::Poppler, false),
            Fake::new(BackendKind::Ghostscript, false),
        ];
        let selector = BackendSelector::new(registry, BackendAvailability::all());

        let result = selector.render(&request(), &janitor).await;
        assert!(!result.succeeded());
        assert_eq!(result.method_used, None);
        assert_eq!(result.attempts.len(), 3);
        assert!(result.attempts.iter().all(|a| a.status == AttemptStatus::Failed));
    }

    #[tokio::test]
    async fn unavailable_backends_are_never_invoked() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let native = Fake::new(BackendKind::Native, true);
        let poppler = Fake::new(BackendKind::Poppler, true);
        let registry: Vec<Arc<dyn RenderBackend>> = vec![native.clone(), poppler.clone()];
        let selector =
            BackendSelector::new(registry, BackendAvailability::only(&[BackendKind::Poppler]));

        let result = selector.render(&request(), &janitor).await;
        assert_eq!(result.method_used, Some("pdftoppm"));
        assert_eq!(native.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.attempts[0].status, AttemptStatus::Skipped);
    }

    #[test]
    fn from_config_registers_priority_order() {
        let selector =
            BackendSelector::from_config(&PlanmarkConfig::default(), BackendAvailability::none());
        assert_eq!(selector.order(), BackendKind::PRIORITY.to_vec());
    }
}
