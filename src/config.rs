//! Configuration for rendering, compositing, fetching and report export.
//!
//! Every knob lives in [`PlanmarkConfig`], built via
//! [`PlanmarkConfig::builder`]. The struct is passed explicitly to each
//! component; nothing reads process-wide state after startup.
//!
//! # Design choice: builder over constructor
//! Most callers only change two or three settings (the storage root, an
//! output directory, perhaps the remote-fetch opt-in). The builder lets them
//! set exactly those and rely on documented defaults for the rest.

use crate::error::PlanmarkError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the preview, report and crop operations.
///
/// # Example
/// ```rust
/// use planmark::PlanmarkConfig;
///
/// let config = PlanmarkConfig::builder()
///     .storage_root("/srv/planmark")
///     .output_dir("/srv/planmark/exports")
///     .allow_remote_photos(true)
///     .build()
///     .unwrap();
/// assert!(config.fetch.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct PlanmarkConfig {
    /// Raster width for the live single-pin preview. Default: 1200.
    pub preview_width_px: u32,

    /// Raster width for pin thumbnails embedded in reports. Default: 800.
    ///
    /// Reports print at roughly 515 pt of usable width, so 800 px gives a
    /// thumbnail that stays sharp at 100% zoom without bloating the file.
    pub report_pin_width_px: u32,

    /// Upper bound on raster height, whatever the page aspect. Default: 6000.
    ///
    /// Plans come as A0 sheets and as long strip elevations; a 1200 px wide
    /// render of a 1:8 strip is still fine, a 1:50 one is not.
    pub max_raster_height_px: u32,

    /// Resolution handed to Ghostscript when the page size cannot be read.
    /// Range: 36–600. Default: 150.
    pub fallback_dpi: u32,

    /// Upper bound on every external rasteriser run, in seconds. Default: 5.
    pub subprocess_timeout_secs: u64,

    /// Directory or file of an existing pdfium library. `None` binds the
    /// system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Poppler executable. Default: `pdftoppm` (looked up on `PATH`).
    pub pdftoppm_program: String,

    /// Ghostscript executable. Default: `gs` (`gswin64c` on Windows).
    pub ghostscript_program: String,

    /// Marker sizing policy.
    pub marker: MarkerPolicy,

    /// Remote photo fetching policy.
    pub fetch: FetchPolicy,

    /// Root against which relative stored paths are resolved.
    pub storage_root: PathBuf,

    /// Conventional photo subdirectory under `storage_root`. Default: `photos`.
    pub photo_subdir: String,

    /// Directory searched for a bare photo filename. Default: `<storage_root>/uploads`.
    pub default_photo_dir: PathBuf,

    /// Where finished reports are written. Default: `exports`.
    pub output_dir: PathBuf,

    /// Parent directory for intermediate files. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Longest edge of a photo once embedded in a report. Default: 1600.
    pub max_photo_px: u32,
}

impl Default for PlanmarkConfig {
    fn default() -> Self {
        let storage_root = PathBuf::from(".");
        Self {
            preview_width_px: 1200,
            report_pin_width_px: 800,
            max_raster_height_px: 6000,
            fallback_dpi: 150,
            subprocess_timeout_secs: 5,
            pdfium_library_path: None,
            pdftoppm_program: "pdftoppm".to_string(),
            ghostscript_program: default_ghostscript_program().to_string(),
            marker: MarkerPolicy::default(),
            fetch: FetchPolicy::default(),
            default_photo_dir: storage_root.join("uploads"),
            storage_root,
            photo_subdir: "photos".to_string(),
            output_dir: PathBuf::from("exports"),
            temp_dir: None,
            max_photo_px: 1600,
        }
    }
}

impl PlanmarkConfig {
    pub fn builder() -> PlanmarkConfigBuilder {
        PlanmarkConfigBuilder {
            config: Self::default(),
            default_photo_dir_set: false,
        }
    }

    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_timeout_secs)
    }

    /// Directory for intermediate files.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`PlanmarkConfig`].
#[derive(Debug)]
pub struct PlanmarkConfigBuilder {
    config: PlanmarkConfig,
    default_photo_dir_set: bool,
}

impl PlanmarkConfigBuilder {
    pub fn preview_width_px(mut self, px: u32) -> Self {
        self.config.preview_width_px = px.clamp(64, 8000);
        self
    }

    pub fn report_pin_width_px(mut self, px: u32) -> Self {
        self.config.report_pin_width_px = px.clamp(64, 8000);
        self
    }

    pub fn max_raster_height_px(mut self, px: u32) -> Self {
        self.config.max_raster_height_px = px.max(64);
        self
    }

    pub fn fallback_dpi(mut self, dpi: u32) -> Self {
        self.config.fallback_dpi = dpi.clamp(36, 600);
        self
    }

    pub fn subprocess_timeout_secs(mut self, secs: u64) -> Self {
        self.config.subprocess_timeout_secs = secs;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn pdftoppm_program(mut self, program: impl Into<String>) -> Self {
        self.config.pdftoppm_program = program.into();
        self
    }

    pub fn ghostscript_program(mut self, program: impl Into<String>) -> Self {
        self.config.ghostscript_program = program.into();
        self
    }

    pub fn marker(mut self, marker: MarkerPolicy) -> Self {
        self.config.marker = marker;
        self
    }

    pub fn fetch(mut self, fetch: FetchPolicy) -> Self {
        self.config.fetch = fetch;
        self
    }

    /// Opt in to fetching photos referenced by absolute URL.
    pub fn allow_remote_photos(mut self, enabled: bool) -> Self {
        self.config.fetch.enabled = enabled;
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        if !self.default_photo_dir_set {
            self.config.default_photo_dir = self.config.storage_root.join("uploads");
        }
        self
    }

    pub fn photo_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.config.photo_subdir = subdir.into();
        self
    }

    pub fn default_photo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.default_photo_dir = dir.into();
        self.default_photo_dir_set = true;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn max_photo_px(mut self, px: u32) -> Self {
        self.config.max_photo_px = px.max(64);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PlanmarkConfig, PlanmarkError> {
        let c = &self.config;
        if c.subprocess_timeout_secs == 0 {
            return Err(PlanmarkError::InvalidConfig(
                "subprocess timeout must be at least 1s".into(),
            ));
        }
        if !(c.marker.height_fraction > 0.0 && c.marker.height_fraction <= 1.0) {
            return Err(PlanmarkError::InvalidConfig(format!(
                "marker height fraction must be in (0, 1], got {}",
                c.marker.height_fraction
            )));
        }
        if c.fetch.max_bytes == 0 {
            return Err(PlanmarkError::InvalidConfig(
                "remote fetch size cap must be non-zero".into(),
            ));
        }
        if c.pdftoppm_program.trim().is_empty() || c.ghostscript_program.trim().is_empty() {
            return Err(PlanmarkError::InvalidConfig(
                "rasteriser program names must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How large the pin glyph is drawn relative to the raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerPolicy {
    /// Marker height as a fraction of the raster height. Default: 0.12.
    pub height_fraction: f32,
    /// Floor so thumbnails keep a legible pin. Default: 24.
    pub min_height_px: u32,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self {
            height_fraction: 0.12,
            min_height_px: 24,
        }
    }
}

/// Limits for fetching photos referenced by absolute URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Caller opt-in; remote photos are skipped when false. Default: false.
    pub enabled: bool,
    /// Largest body accepted, declared or actual. Default: 5 MiB.
    pub max_bytes: u64,
    /// Timeout for the metadata probe. Default: 5.
    pub probe_timeout_secs: u64,
    /// Timeout for the body transfer. Default: 20.
    pub transfer_timeout_secs: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bytes: 5 * 1024 * 1024,
            probe_timeout_secs: 5,
            transfer_timeout_secs: 20,
        }
    }
}

fn default_ghostscript_program() -> &'static str {
    if cfg!(windows) {
        "gswin64c"
    } else {
        "gs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PlanmarkConfig::default();
        assert_eq!(c.preview_width_px, 1200);
        assert_eq!(c.subprocess_timeout(), Duration::from_secs(5));
        assert_eq!(c.fetch.max_bytes, 5 * 1024 * 1024);
        assert!(!c.fetch.enabled);
        assert!((c.marker.height_fraction - 0.12).abs() < f32::EPSILON);
        assert_eq!(c.marker.min_height_px, 24);
    }

    #[test]
    fn storage_root_moves_default_photo_dir() {
        let c = PlanmarkConfig::builder()
            .storage_root("/srv/pm")
            .build()
            .unwrap();
        assert_eq!(c.default_photo_dir, PathBuf::from("/srv/pm/uploads"));
    }

    #[test]
    fn explicit_photo_dir_survives_storage_root() {
        let c = PlanmarkConfig::builder()
            .default_photo_dir("/data/photos")
            .storage_root("/srv/pm")
            .build()
            .unwrap();
        assert_eq!(c.default_photo_dir, PathBuf::from("/data/photos"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = PlanmarkConfig::builder()
            .subprocess_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanmarkError::InvalidConfig(_)));
    }

    #[test]
    fn bad_marker_fraction_is_rejected() {
        let err = PlanmarkConfig::builder()
            .marker(MarkerPolicy {
                height_fraction: 1.5,
                min_height_px: 24,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("fraction"));
    }

    #[test]
    fn widths_are_clamped() {
        let c = PlanmarkConfig::builder()
            .preview_width_px(10)
            .fallback_dpi(2000)
            .build()
            .unwrap();
        assert_eq!(c.preview_width_px, 64);
        assert_eq!(c.fallback_dpi, 600);
    }
}
