//! # planmark
//!
//! Rasterise architectural PDF plans, draw issue pins on them, and assemble
//! survey reports.
//!
//! ## Why this crate?
//!
//! Surveyors drop "issue" pins on plan drawings at normalized page
//! coordinates. Showing such a pin means rasterising one page of a PDF,
//! which in practice means whichever of pdfium, Poppler or Ghostscript the
//! host happens to have. This crate hides that behind one call, puts the pin
//! in the same place whichever backend answered, and never leaves a
//! temporary file behind.
//!
//! ## Pipeline Overview
//!
//! ```text
//! plan PDF
//!  │
//!  ├─ 1. Input      resolve the stored file, check the page
//!  ├─ 2. Select     pdfium → pdftoppm → gs, first available that succeeds
//!  ├─ 3. Rasterise  one page at the requested width, flattened on white
//!  ├─ 4. Composite  scale the pin glyph, anchor bottom-center, clamp inside
//!  └─ 5. Output     PNG (preview) or an embedded thumbnail (report)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use planmark::{ManifestStore, Planmark, PlanmarkConfig, PinRequest, PreviewOutcome};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlanmarkConfig::builder().storage_root("/srv/planmark").build()?;
//!     let store = ManifestStore::from_path("/srv/planmark/manifest.json".as_ref()).await?;
//!     let app = Planmark::new(config, Arc::new(store));
//!
//!     let request = PinRequest {
//!         plan_id: Some(1),
//!         issue_id: Some(10),
//!         ..Default::default()
//!     };
//!     match planmark::render_pin(&app, &request).await? {
//!         PreviewOutcome::Rendered { png, method } => {
//!             std::fs::write("pin.png", png)?;
//!             eprintln!("rendered with {method}");
//!         }
//!         PreviewOutcome::NoRenderer { .. } => eprintln!("no rasteriser installed"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `planmark` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | off     | HTTP routes for preview, report export and crop (axum) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! planmark = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod crop;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod render;
pub mod report;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FetchPolicy, MarkerPolicy, PlanmarkConfig, PlanmarkConfigBuilder};
pub use context::{Planmark, PlanmarkBuilder};
pub use crop::{crop_page, CropOutput, CropSource};
pub use error::{BackendFailure, PlanmarkError, SkipReason};
pub use model::{IssueRecord, NormPoint, NormRect, PhotoRecord, PlanRecord};
pub use pipeline::availability::BackendAvailability;
pub use pipeline::backend::{BackendKind, RasterImage, RenderBackend};
pub use pipeline::selector::{BackendAttempt, BackendResult, BackendSelector};
pub use preview::{render_pin, PinRequest, PreviewOutcome};
pub use progress::{ExportProgressCallback, NoopProgressCallback, ProgressCallback};
pub use render::{PinJob, PinRender, PinRenderer};
pub use report::{ExportFormat, ExportRequest, ExportSummary, ReportAssembler};
pub use store::{Manifest, ManifestStore, PlanStore};
