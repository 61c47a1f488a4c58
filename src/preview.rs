//! Live single-pin preview.
//!
//! Validation happens before any rendering: a request that names an unknown
//! plan, an issue on another plan, or a page the PDF does not have is
//! rejected without starting a backend. A file lopdf cannot count pages in
//! is passed on to the backends as is. "No renderer available" is not an
//! error here; it comes back as [`PreviewOutcome::NoRenderer`] and the HTTP
//! layer answers 204.

use crate::context::Planmark;
use crate::error::PlanmarkError;
use crate::model::NormPoint;
use crate::pipeline::input;
use crate::pipeline::selector::BackendAttempt;
use crate::render::PinJob;
use serde::Deserialize;
use tracing::info;

/// Preview parameters. Either `issue_id`, or all of `page`, `x_norm` and
/// `y_norm`. With an issue, any of the three given explicitly override the
/// stored values (the UI previews a pin while it is being dragged).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PinRequest {
    pub plan_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub page: Option<u32>,
    pub x_norm: Option<f64>,
    pub y_norm: Option<f64>,
    /// Raster width; defaults to the configured preview width.
    pub width: Option<u32>,
}

#[derive(Debug)]
pub enum PreviewOutcome {
    Rendered { png: Vec<u8>, method: &'static str },
    NoRenderer { attempts: Vec<BackendAttempt> },
}

/// Render one pin preview.
pub async fn render_pin(app: &Planmark, request: &PinRequest) -> Result<PreviewOutcome, PlanmarkError> {
    let plan_id = request
        .plan_id
        .ok_or_else(|| PlanmarkError::invalid("plan_id", "is required"))?;
    for (field, value) in [("x_norm", request.x_norm), ("y_norm", request.y_norm)] {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(PlanmarkError::invalid(field, "must be a finite number"));
        }
    }
    if request.width == Some(0) {
        return Err(PlanmarkError::invalid("width", "must be positive"));
    }

    let plan = app.plan(plan_id).await?;

    let (page, x, y) = match request.issue_id {
        Some(issue_id) => {
            let issue = app
                .store()
                .issue(issue_id)
                .await?
                .filter(|i| i.plan_id == plan.id)
                .ok_or(PlanmarkError::IssueNotFound { issue_id })?;
            (
                request.page.unwrap_or(issue.page),
                request.x_norm.unwrap_or(issue.x_norm),
                request.y_norm.unwrap_or(issue.y_norm),
            )
        }
        None => (
            request
                .page
                .ok_or_else(|| PlanmarkError::invalid("page", "is required without issue_id"))?,
            request
                .x_norm
                .ok_or_else(|| PlanmarkError::invalid("x_norm", "is required without issue_id"))?,
            request
                .y_norm
                .ok_or_else(|| PlanmarkError::invalid("y_norm", "is required without issue_id"))?,
        ),
    };

    let pdf_path = app.plan_file(&plan)?;
    let counted = pdf_path.clone();
    let total = tokio::task::spawn_blocking(move || input::known_page_count(&counted))
        .await
        .map_err(|e| PlanmarkError::Internal(format!("page count task panicked: {e}")))?;
    input::check_known_page(page, total)?;

    let width = request
        .width
        .unwrap_or(app.config().preview_width_px)
        .clamp(64, 8000);
    let job = PinJob {
        pdf_path: &pdf_path,
        page,
        point: NormPoint::new(x, y),
        width_px: width,
    };
    let render = app.renderer().render_scoped(&job).await;

    match (render.to_png()?, render.method_used) {
        (Some(png), Some(method)) => {
            info!(
                "preview plan {} page {} via {} ({} bytes)",
                plan.id,
                page,
                method,
                png.len()
            );
            Ok(PreviewOutcome::Rendered { png, method })
        }
        _ => Ok(PreviewOutcome::NoRenderer {
            attempts: render.attempts,
        }),
    }
}
