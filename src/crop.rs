//! Single-page crop export.
//!
//! The caller's rectangle is in screen convention: origin top-left, `y`
//! growing downwards, fractions of the page. PDF user space has its origin
//! bottom-left with `y` growing upwards, so the rectangle is flipped against
//! the page's MediaBox before it becomes a crop box:
//!
//! ```text
//! llx = mx0 + x·W          urx = llx + w·W
//! lly = my0 + (1−y−h)·H    ury = lly + h·H
//! ```
//!
//! The output keeps only the requested page, with MediaBox and CropBox both
//! set to the crop region. Page content is untouched, so the result is still
//! vector.

use crate::error::PlanmarkError;
use crate::model::NormRect;
use crate::pipeline::input::{check_page, check_pdf_bytes};
use lopdf::{Document, Object, ObjectId};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the source PDF comes from.
#[derive(Debug, Clone, Copy)]
pub enum CropSource<'a> {
    /// A stored plan file.
    Path(&'a Path),
    /// An uploaded document.
    Bytes(&'a [u8]),
}

/// A finished crop.
#[derive(Debug, Clone, Serialize)]
pub struct CropOutput {
    #[serde(skip)]
    pub pdf: Vec<u8>,
    pub page: u32,
    /// `[llx, lly, urx, ury]` in the source page's user space.
    pub crop_box: [f64; 4],
}

/// Crop `page` (1-based) of `source` to `rect`.
///
/// Blocking: parses and re-serialises the whole document.
pub fn crop_page(source: CropSource<'_>, page: u32, rect: NormRect) -> Result<CropOutput, PlanmarkError> {
    if rect.is_empty() {
        return Err(PlanmarkError::invalid(
            "rect",
            "crop rectangle has zero width or height after clamping",
        ));
    }

    let (mut doc, label) = load(source)?;
    let pages = doc.get_pages();
    check_page(page, pages.len() as u32)?;
    let page_id = pages[&page];

    let visible = effective_crop_box(&doc, page_id).ok_or_else(|| PlanmarkError::CorruptPdf {
        path: label.clone(),
        detail: format!("page {page} has no usable MediaBox"),
    })?;
    let crop_box = crop_box_for(visible, &rect);
    debug!("crop page {}: visible {:?} → {:?}", page, visible, crop_box);

    let others: Vec<u32> = pages.keys().copied().filter(|&p| p != page).collect();
    if !others.is_empty() {
        doc.delete_pages(&others);
    }

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PlanmarkError::CorruptPdf {
            path: label.clone(),
            detail: format!("page {page} is not a dictionary: {e}"),
        })?;
    let boxed = || Object::Array(crop_box.iter().map(|&v| Object::from(v)).collect());
    page_dict.set("MediaBox", boxed());
    page_dict.set("CropBox", boxed());
    for stale in [&b"TrimBox"[..], b"BleedBox", b"ArtBox"] {
        page_dict.remove(stale);
    }

    doc.prune_objects();
    let mut pdf = Vec::new();
    doc.save_to(&mut pdf).map_err(|e| PlanmarkError::OutputWriteFailed {
        path: label.clone(),
        source: std::io::Error::other(e.to_string()),
    })?;

    info!(
        "cropped page {} of {} to {:.1}×{:.1} pt ({} bytes)",
        page,
        label.display(),
        crop_box[2] - crop_box[0],
        crop_box[3] - crop_box[1],
        pdf.len()
    );
    Ok(CropOutput { pdf, page, crop_box })
}

fn load(source: CropSource<'_>) -> Result<(Document, PathBuf), PlanmarkError> {
    match source {
        CropSource::Path(path) => {
            crate::pipeline::input::check_pdf_file(path)?;
            let doc = Document::load(path).map_err(|e| PlanmarkError::CorruptPdf {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
            Ok((doc, path.to_path_buf()))
        }
        CropSource::Bytes(bytes) => {
            let label = PathBuf::from("<upload>");
            check_pdf_bytes(bytes, &label)?;
            let doc = Document::load_mem(bytes).map_err(|e| PlanmarkError::CorruptPdf {
                path: label.clone(),
                detail: e.to_string(),
            })?;
            Ok((doc, label))
        }
    }
}

/// Flip a top-left normalized rect into PDF user space inside `visible`.
pub fn crop_box_for(visible: [f64; 4], rect: &NormRect) -> [f64; 4] {
    let [mx0, my0, mx1, my1] = normalize_box(visible);
    let (w, h) = (mx1 - mx0, my1 - my0);
    let llx = mx0 + rect.x() * w;
    let lly = my0 + (1.0 - rect.y() - rect.h()) * h;
    [llx, lly, llx + rect.w() * w, lly + rect.h() * h]
}

/// The MediaBox that applies to a page, following `Parent` links for the
/// inherited case.
pub fn effective_media_box(doc: &Document, page_id: ObjectId) -> Option<[f64; 4]> {
    inherited_box(doc, page_id, b"MediaBox")
}

/// The area a viewer shows: the page's CropBox (inheritable, like the
/// MediaBox) clipped to its MediaBox. Without a CropBox, or when the two do
/// not overlap, this is the MediaBox.
///
/// Every rasteriser renders this area, so normalized coordinates and crop
/// rectangles are fractions of it.
pub fn effective_crop_box(doc: &Document, page_id: ObjectId) -> Option<[f64; 4]> {
    let media = effective_media_box(doc, page_id)?;
    let Some([cx0, cy0, cx1, cy1]) = inherited_box(doc, page_id, b"CropBox") else {
        return Some(media);
    };
    let clipped = [
        cx0.max(media[0]),
        cy0.max(media[1]),
        cx1.min(media[2]),
        cy1.min(media[3]),
    ];
    if clipped[2] - clipped[0] <= 0.0 || clipped[3] - clipped[1] <= 0.0 {
        return Some(media);
    }
    Some(clipped)
}

fn inherited_box(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<[f64; 4]> {
    let mut current = Some(page_id);
    // Page trees are shallow; the bound only guards against Parent cycles.
    for _ in 0..64 {
        let id = current?;
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Some(found) = box_of(doc, dict, key) {
            return Some(normalize_box(found));
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn box_of(doc: &Document, dict: &lopdf::Dictionary, key: &[u8]) -> Option<[f64; 4]> {
    let raw = dict.get(key).ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let arr = resolved.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    Some([
        obj_to_f64(&arr[0])?,
        obj_to_f64(&arr[1])?,
        obj_to_f64(&arr[2])?,
        obj_to_f64(&arr[3])?,
    ])
}

/// Order the corners as `[min_x, min_y, max_x, max_y]`.
fn normalize_box([a, b, c, d]: [f64; 4]) -> [f64; 4] {
    [a.min(c), b.min(d), a.max(c), b.max(d)]
}

pub(crate) fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}
