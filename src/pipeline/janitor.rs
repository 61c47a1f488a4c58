//! Scoped tracking of every intermediate file a request creates.
//!
//! Backends, the fetcher and the report writer never create temp files on
//! their own: they ask the request's [`ResourceJanitor`] for a path. The
//! janitor registers the path *at creation time*, so a backend that fails,
//! an early `?` return, a panic, or a dropped future all end in the same
//! place: [`Drop`] runs [`ResourceJanitor::cleanup`], which deletes every
//! registered path exactly once.
//!
//! Names come from [`tempfile::Builder`] (random suffix, `O_EXCL` create), so
//! concurrent requests never collide and no locking is needed.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    /// Paths that were already gone (e.g. a tool never created its output).
    pub missing: usize,
    pub failed: usize,
}

/// Per-request registry of temp files.
#[derive(Debug)]
pub struct ResourceJanitor {
    dir: PathBuf,
    prefix: String,
    registered: Mutex<Vec<PathBuf>>,
}

impl ResourceJanitor {
    /// A janitor creating its files directly inside `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_prefix(dir, "planmark")
    }

    pub fn with_prefix(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty file with a unique name and register it.
    ///
    /// `label` ends up in the name to make stray files attributable
    /// (`planmark-poppler-XXXXXX.png`); `extension` has no leading dot.
    pub fn create(&self, label: &str, extension: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", self.prefix, label))
            .suffix(&format!(".{extension}"))
            .rand_bytes(10)
            .tempfile_in(&self.dir)?;
        // Keep the file on disk; deletion is our job from here on.
        let (_file, path) = file.keep().map_err(|e| e.error)?;
        self.register(path.clone());
        debug!("janitor: created {}", path.display());
        Ok(path)
    }

    /// Track a path that something else created (or is about to create).
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut registered = self.lock();
        if !registered.contains(&path) {
            registered.push(path);
        }
    }

    /// Stop tracking `path`, handing ownership to the caller.
    ///
    /// Returns `false` when the path was not registered.
    pub fn release(&self, path: &Path) -> bool {
        let mut registered = self.lock();
        let before = registered.len();
        registered.retain(|p| p != path);
        registered.len() != before
    }

    /// Number of paths currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Delete every registered path. Safe to call more than once: the
    /// registry is drained, so each path is attempted exactly once.
    ///
    /// Failures are logged, never returned.
    pub fn cleanup(&self) -> CleanupReport {
        let paths: Vec<PathBuf> = std::mem::take(&mut *self.lock());
        let mut report = CleanupReport::default();

        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("janitor: could not delete {}: {}", path.display(), e);
                }
            }
        }

        if report.removed + report.failed > 0 {
            debug!(
                "janitor: removed {} file(s), {} missing, {} failed",
                report.removed, report.missing, report.failed
            );
        }
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        // A panic while holding the lock leaves the Vec intact; keep using it.
        self.registered.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for ResourceJanitor {
    fn drop(&mut self) {
        self.cleanup();
    }
}
