//! Records read from the persistence layer and the normalized geometry types.
//!
//! Records are plain data. They are owned by whatever [`PlanStore`]
//! produced them and are never cached past one call.
//!
//! [`PlanStore`]: crate::store::PlanStore

use crate::pipeline::geometry::clamp_unit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A stored PDF drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: i64,
    pub name: String,
    /// Absolute, or relative to the configured storage root.
    pub file_path: PathBuf,
    #[serde(default = "default_revision")]
    pub revision: u32,
}

fn default_revision() -> u32 {
    1
}

/// An annotation anchored to a normalized point on one plan page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: i64,
    pub plan_id: i64,
    /// 1-based.
    pub page: u32,
    pub x_norm: f64,
    pub y_norm: f64,
    pub title: String,
    #[serde(default)]
    pub notes: String,
}

impl IssueRecord {
    pub fn point(&self) -> NormPoint {
        NormPoint::new(self.x_norm, self.y_norm)
    }
}

/// A photo attached to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub issue_id: i64,
    pub filename: String,
    /// Local path (absolute or storage-relative) or an absolute http(s) URL.
    #[serde(default)]
    pub stored_path: Option<String>,
}

impl PhotoRecord {
    /// The stored reference when it is an absolute http(s) URL.
    pub fn remote_url(&self) -> Option<&str> {
        self.stored_path.as_deref().filter(|p| is_remote_url(p))
    }
}

pub fn is_remote_url(s: &str) -> bool {
    let lower = s.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A point in page space, origin top-left, both axes in `[0, 1]`.
///
/// Construction clamps, so a `NormPoint` is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormPoint {
    x: f64,
    y: f64,
}

impl NormPoint {
    pub fn new(x_norm: f64, y_norm: f64) -> Self {
        Self {
            x: clamp_unit(x_norm),
            y: clamp_unit(y_norm),
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }
}

/// A rectangle in page space, origin top-left.
///
/// Construction clamps every component to `[0, 1]` and then shrinks the
/// width and height so the rectangle ends inside the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormRect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl NormRect {
    pub fn new(x_norm: f64, y_norm: f64, w_norm: f64, h_norm: f64) -> Self {
        let x = clamp_unit(x_norm);
        let y = clamp_unit(y_norm);
        let w = clamp_unit(w_norm).min(1.0 - x);
        let h = clamp_unit(h_norm).min(1.0 - y);
        Self { x, y, w, h }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn w(&self) -> f64 {
        self.w
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    /// Zero width or height after clamping.
    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }
}
