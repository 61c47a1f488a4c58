//! Progress-callback trait for per-issue report export events.
//!
//! Pass an [`Arc<dyn ExportProgressCallback>`] to
//! [`ReportAssembler::with_progress`](crate::report::ReportAssembler::with_progress)
//! to receive events as the assembler works through the issues of a plan.
//! The CLI drives its progress bar from these; a server could forward them to
//! a websocket.
//!
//! # Example
//!
//! ```rust
//! use planmark::ExportProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ExportProgressCallback for CountingCallback {
//!     fn on_issue_complete(&self, index: usize, total: usize, _pin: bool, _photos: usize) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("issue {}/{} written ({n} so far)", index, total);
//!     }
//! }
//! ```

use crate::error::SkipReason;
use std::path::Path;
use std::sync::Arc;

/// Called by the report assembler as it writes each issue section.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Sections are written one after another, never
/// concurrently.
pub trait ExportProgressCallback: Send + Sync {
    /// Called once the header is written.
    ///
    /// # Arguments
    /// * `total_issues` — sections that will be written
    fn on_export_start(&self, total_issues: usize) {
        let _ = total_issues;
    }

    /// Called before an issue's pin is rendered.
    ///
    /// # Arguments
    /// * `index`    — 1-based position in export order
    /// * `total`    — total sections
    /// * `issue_id` — the issue being written
    fn on_issue_start(&self, index: usize, total: usize, issue_id: i64) {
        let _ = (index, total, issue_id);
    }

    /// Called when a photo is left out of a section.
    fn on_photo_skipped(&self, issue_id: i64, photo_id: i64, reason: &SkipReason) {
        let _ = (issue_id, photo_id, reason);
    }

    /// Called after a section is closed.
    ///
    /// # Arguments
    /// * `pin_included`    — whether a pin thumbnail was embedded
    /// * `photos_embedded` — photos that made it into the section
    fn on_issue_complete(&self, index: usize, total: usize, pin_included: bool, photos_embedded: usize) {
        let _ = (index, total, pin_included, photos_embedded);
    }

    /// Called once the report is on disk.
    fn on_export_complete(&self, path: &Path, size: u64) {
        let _ = (path, size);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExportProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn ExportProgressCallback>;
