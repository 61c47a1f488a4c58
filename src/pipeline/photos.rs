//! Locating a photo's file on local storage.
//!
//! Photo rows come from several upload generations, so a stored path may be
//! absolute, storage-relative, stale, or missing entirely. The lookup is an
//! explicit ordered list ([`RESOLUTION_ORDER`]) and the first strategy whose
//! candidate exists wins.

use crate::config::PlanmarkConfig;
use crate::error::SkipReason;
use crate::model::{is_remote_url, PhotoRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One way of turning a photo record into a candidate path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// `stored_path` as recorded: absolute, or relative to the storage root.
    StoredPath,
    /// `<storage_root>/<photo_subdir>/<plan_id>/<filename>`.
    ConventionalSubdir,
    /// `<default_photo_dir>/<filename>`.
    BareFilename,
}

/// Strategies in the order they are tried.
pub const RESOLUTION_ORDER: [ResolutionStrategy; 3] = [
    ResolutionStrategy::StoredPath,
    ResolutionStrategy::ConventionalSubdir,
    ResolutionStrategy::BareFilename,
];

/// A photo found on disk, and which strategy found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPhoto {
    pub path: PathBuf,
    pub strategy: ResolutionStrategy,
}

#[derive(Debug, Clone)]
pub struct PhotoResolver {
    storage_root: PathBuf,
    photo_subdir: String,
    default_photo_dir: PathBuf,
}

impl PhotoResolver {
    pub fn new(
        storage_root: impl Into<PathBuf>,
        photo_subdir: impl Into<String>,
        default_photo_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage_root: storage_root.into(),
            photo_subdir: photo_subdir.into(),
            default_photo_dir: default_photo_dir.into(),
        }
    }

    pub fn from_config(config: &PlanmarkConfig) -> Self {
        Self::new(
            config.storage_root.clone(),
            config.photo_subdir.clone(),
            config.default_photo_dir.clone(),
        )
    }

    /// Candidate path for one strategy, if the record has what it needs.
    pub fn candidate(
        &self,
        strategy: ResolutionStrategy,
        plan_id: i64,
        photo: &PhotoRecord,
    ) -> Option<PathBuf> {
        match strategy {
            ResolutionStrategy::StoredPath => {
                let stored = photo.stored_path.as_deref()?.trim();
                if stored.is_empty() || is_remote_url(stored) {
                    return None;
                }
                let p = Path::new(stored);
                Some(if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    self.storage_root.join(p)
                })
            }
            ResolutionStrategy::ConventionalSubdir => {
                let name = bare_name(&photo.filename)?;
                Some(
                    self.storage_root
                        .join(&self.photo_subdir)
                        .join(plan_id.to_string())
                        .join(name),
                )
            }
            ResolutionStrategy::BareFilename => {
                let name = bare_name(&photo.filename)?;
                Some(self.default_photo_dir.join(name))
            }
        }
    }

    /// First existing candidate in [`RESOLUTION_ORDER`].
    pub fn resolve(&self, plan_id: i64, photo: &PhotoRecord) -> Result<ResolvedPhoto, SkipReason> {
        let mut tried = Vec::new();
        for strategy in RESOLUTION_ORDER {
            if let Some(path) = self.candidate(strategy, plan_id, photo) {
                if path.is_file() {
                    return Ok(ResolvedPhoto { path, strategy });
                }
                tried.push(path.display().to_string());
            }
        }
        Err(SkipReason::NotFound(if tried.is_empty() {
            "no usable path".to_string()
        } else {
            tried.join(", ")
        }))
    }
}

/// Final component of a filename, refusing `..` and empty names.
fn bare_name(filename: &str) -> Option<&std::ffi::OsStr> {
    Path::new(filename.trim()).file_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(filename: &str, stored: Option<&str>) -> PhotoRecord {
        PhotoRecord {
            id: 1,
            issue_id: 1,
            filename: filename.to_string(),
            stored_path: stored.map(str::to_string),
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn resolver(root: &Path) -> PhotoResolver {
        PhotoResolver::new(root, "photos", root.join("uploads"))
    }

    #[test]
    fn order_is_stored_conventional_bare() {
        assert_eq!(
            RESOLUTION_ORDER,
            [
                ResolutionStrategy::StoredPath,
                ResolutionStrategy::ConventionalSubdir,
                ResolutionStrategy::BareFilename
            ]
        );
    }

    #[test]
    fn stored_relative_path_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("legacy/a.jpg"));
        touch(&dir.path().join("photos/7/a.jpg"));
        let found = resolver(dir.path())
            .resolve(7, &photo("a.jpg", Some("legacy/a.jpg")))
            .unwrap();
        assert_eq!(found.strategy, ResolutionStrategy::StoredPath);
        assert_eq!(found.path, dir.path().join("legacy/a.jpg"));
    }

    #[test]
    fn stored_absolute_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().join("elsewhere/b.png");
        touch(&abs);
        let found = resolver(&dir.path().join("root"))
            .resolve(1, &photo("b.png", Some(abs.to_str().unwrap())))
            .unwrap();
        assert_eq!(found.path, abs);
    }

    #[test]
    fn stale_stored_path_falls_back_to_conventional_subdir() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("photos/7/a.jpg"));
        let found = resolver(dir.path())
            .resolve(7, &photo("a.jpg", Some("gone/a.jpg")))
            .unwrap();
        assert_eq!(found.strategy, ResolutionStrategy::ConventionalSubdir);
    }

    #[test]
    fn bare_filename_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("uploads/c.jpg"));
        let found = resolver(dir.path()).resolve(7, &photo("c.jpg", None)).unwrap();
        assert_eq!(found.strategy, ResolutionStrategy::BareFilename);
    }

    #[test]
    fn filename_cannot_escape_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("uploads/secret.jpg"));
        let r = resolver(dir.path());
        let p = r
            .candidate(ResolutionStrategy::BareFilename, 1, &photo("../../x/secret.jpg", None))
            .unwrap();
        assert_eq!(p, dir.path().join("uploads/secret.jpg"));
        assert!(r
            .candidate(ResolutionStrategy::BareFilename, 1, &photo("..", None))
            .is_none());
    }

    #[test]
    fn remote_stored_path_is_not_a_local_candidate() {
        let r = PhotoResolver::new("/srv", "photos", "/srv/uploads");
        let p = photo("d.jpg", Some("https://cdn.example.com/d.jpg"));
        assert!(r.candidate(ResolutionStrategy::StoredPath, 1, &p).is_none());
    }

    #[test]
    fn nothing_found_lists_what_was_tried() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolver(dir.path()).resolve(2, &photo("e.jpg", None)).unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(err.to_string().contains("e.jpg"));
    }
}
