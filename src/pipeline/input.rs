//! Input resolution: turn a plan record into a readable local PDF.
//!
//! The magic bytes (`%PDF`) are checked before anything else touches the
//! file, so a mis-uploaded JPEG comes back as [`PlanmarkError::NotAPdf`]
//! instead of three backend failures with unhelpful stderr.

use crate::error::PlanmarkError;
use crate::model::PlanRecord;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Absolute path of a plan's PDF, resolved against `storage_root`.
pub fn plan_path(storage_root: &Path, plan: &PlanRecord) -> PathBuf {
    if plan.file_path.is_absolute() {
        plan.file_path.clone()
    } else {
        storage_root.join(&plan.file_path)
    }
}

/// Resolve and validate a plan's PDF.
pub fn resolve_plan_file(storage_root: &Path, plan: &PlanRecord) -> Result<PathBuf, PlanmarkError> {
    let path = plan_path(storage_root, plan);
    check_pdf_file(&path)?;
    debug!("Resolved plan {} → {}", plan.id, path.display());
    Ok(path)
}

/// Verify that `path` exists and starts with `%PDF`.
pub fn check_pdf_file(path: &Path) -> Result<(), PlanmarkError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => {
            return Err(PlanmarkError::PlanFileMissing {
                path: path.to_path_buf(),
            })
        }
    };
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(PlanmarkError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Same check for an in-memory upload.
pub fn check_pdf_bytes(bytes: &[u8], label: &Path) -> Result<(), PlanmarkError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(PlanmarkError::NotAPdf {
            path: label.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Number of pages, read with lopdf.
pub fn page_count(path: &Path) -> Result<u32, PlanmarkError> {
    let doc = lopdf::Document::load(path).map_err(|e| PlanmarkError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(doc.get_pages().len() as u32)
}

/// Page count when lopdf can parse the file, `None` when it cannot.
///
/// lopdf is stricter than pdfium or poppler about damaged cross-reference
/// tables, so an unparseable file is not rejected here: the backend chain
/// gets to try it.
pub fn known_page_count(path: &Path) -> Option<u32> {
    match page_count(path) {
        Ok(total) => Some(total),
        Err(e) => {
            warn!("page count unknown, leaving {} to the rasterisers: {}", path.display(), e);
            None
        }
    }
}

/// [`check_page`] against a page count that may be unknown. Without a count
/// only page 0 is rejected.
pub fn check_known_page(page: u32, total: Option<u32>) -> Result<(), PlanmarkError> {
    match total {
        Some(total) => check_page(page, total),
        None if page == 0 => Err(PlanmarkError::invalid("page", "pages are numbered from 1")),
        None => Ok(()),
    }
}

/// Reject page numbers outside `1..=total`.
pub fn check_page(page: u32, total: u32) -> Result<(), PlanmarkError> {
    if page == 0 || page > total {
        return Err(PlanmarkError::PageOutOfRange { page, total });
    }
    Ok(())
}
