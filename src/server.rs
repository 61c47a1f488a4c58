//! HTTP routes for the preview, report export and crop operations.
//!
//! | Method | Path             | Success                          |
//! |--------|------------------|----------------------------------|
//! | GET    | `/render-pin`    | 200 `image/png`, 204 no renderer |
//! | POST   | `/export-report` | 200 JSON [`ExportSummary`]       |
//! | POST   | `/crop`          | 200 `application/pdf`            |
//!
//! Failures are `{"ok": false, "error": "..."}` with the status from
//! [`PlanmarkError::status_code`].
//!
//! [`ExportSummary`]: crate::report::ExportSummary

use crate::context::Planmark;
use crate::crop::{crop_page, CropSource};
use crate::error::PlanmarkError;
use crate::model::NormRect;
use crate::preview::{render_pin, PinRequest, PreviewOutcome};
use crate::report::ExportRequest;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Largest accepted crop upload.
const CROP_UPLOAD_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

/// A [`PlanmarkError`] on its way out as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub PlanmarkError);

impl From<PlanmarkError> for ApiError {
    fn from(e: PlanmarkError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            warn!("request rejected: {}", self.0);
        }
        let body = Json(ErrorBody {
            ok: false,
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

fn bad_request(field: &'static str, reason: impl Into<String>) -> ApiError {
    ApiError(PlanmarkError::InvalidInput {
        field,
        reason: reason.into(),
    })
}

/// All routes, sharing one [`Planmark`].
pub fn router(app: Arc<Planmark>) -> Router {
    Router::new()
        .route("/render-pin", get(render_pin_handler))
        .route("/export-report", post(export_report_handler))
        .route(
            "/crop",
            post(crop_handler).layer(DefaultBodyLimit::max(CROP_UPLOAD_LIMIT)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(app: Arc<Planmark>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(app)).await
}

async fn render_pin_handler(
    State(app): State<Arc<Planmark>>,
    query: Result<Query<PinRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) = query.map_err(|e| bad_request("query", e.body_text()))?;
    match render_pin(&app, &request).await? {
        PreviewOutcome::Rendered { png, method } => Ok((
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("image/png")),
                (
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store, no-cache, must-revalidate"),
                ),
                (header::PRAGMA, HeaderValue::from_static("no-cache")),
                (
                    header::HeaderName::from_static("x-render-method"),
                    HeaderValue::from_static(method),
                ),
            ],
            png,
        )
            .into_response()),
        PreviewOutcome::NoRenderer { attempts } => {
            warn!(
                "render-pin: no renderer available ({} attempt(s))",
                attempts.len()
            );
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

async fn export_report_handler(
    State(app): State<Arc<Planmark>>,
    body: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| bad_request("body", e.body_text()))?;
    let summary = app.export_report(&request).await?;
    Ok(Json(summary).into_response())
}

/// Parsed multipart form of `/crop`.
#[derive(Default)]
struct CropForm {
    file: Option<Vec<u8>>,
    plan_id: Option<i64>,
    page: Option<u32>,
    x_norm: Option<f64>,
    y_norm: Option<f64>,
    w_norm: Option<f64>,
    h_norm: Option<f64>,
}

fn parse_field<T: std::str::FromStr>(field: &'static str, text: &str) -> Result<T, ApiError> {
    text.trim()
        .parse()
        .map_err(|_| bad_request(field, format!("'{}' is not a valid value", text.trim())))
}

fn finite(field: &'static str, value: Option<f64>) -> Result<f64, ApiError> {
    match value {
        None => Err(bad_request(field, "is required")),
        Some(v) if !v.is_finite() => Err(bad_request(field, "must be a finite number")),
        Some(v) => Ok(v),
    }
}

async fn read_crop_form(mut multipart: Multipart) -> Result<CropForm, ApiError> {
    let mut form = CropForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request("multipart", e.body_text()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request("file", e.body_text()))?;
            form.file = Some(bytes.to_vec());
            continue;
        }
        let text = field
            .text()
            .await
            .map_err(|e| bad_request("multipart", e.body_text()))?;
        match name.as_str() {
            "plan_id" => form.plan_id = Some(parse_field("plan_id", &text)?),
            "page" => form.page = Some(parse_field("page", &text)?),
            "x_norm" => form.x_norm = Some(parse_field("x_norm", &text)?),
            "y_norm" => form.y_norm = Some(parse_field("y_norm", &text)?),
            "w_norm" => form.w_norm = Some(parse_field("w_norm", &text)?),
            "h_norm" => form.h_norm = Some(parse_field("h_norm", &text)?),
            other => tracing::debug!("crop: ignoring field '{}'", other),
        }
    }
    Ok(form)
}

async fn crop_handler(
    State(app): State<Arc<Planmark>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_crop_form(multipart).await?;
    let page = form.page.ok_or_else(|| bad_request("page", "is required"))?;
    let rect = NormRect::new(
        finite("x_norm", form.x_norm)?,
        finite("y_norm", form.y_norm)?,
        finite("w_norm", form.w_norm)?,
        finite("h_norm", form.h_norm)?,
    );

    let task = match (form.file, form.plan_id) {
        (Some(bytes), _) => tokio::task::spawn_blocking(move || {
            crop_page(CropSource::Bytes(&bytes), page, rect)
        }),
        (None, Some(plan_id)) => {
            let plan = app.plan(plan_id).await?;
            let path = app.plan_file(&plan)?;
            tokio::task::spawn_blocking(move || crop_page(CropSource::Path(&path), page, rect))
        }
        (None, None) => return Err(bad_request("file", "either a file or plan_id is required")),
    };
    let output = task
        .await
        .map_err(|e| PlanmarkError::Internal(format!("crop task panicked: {e}")))??;

    let disposition = format!("attachment; filename=\"crop-page-{}.pdf\"", output.page);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        output.pdf,
    )
        .into_response())
}
