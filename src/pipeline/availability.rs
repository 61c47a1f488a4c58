//! Which rendering backends this host can run.
//!
//! Probed once, when the application starts, and handed to the
//! [`BackendSelector`](crate::pipeline::selector::BackendSelector). Requests
//! never re-probe; a tool uninstalled while the process runs simply shows up
//! as a spawn failure on its next attempt.

use crate::config::PlanmarkConfig;
use crate::pipeline::backend::{native::bind_pdfium, BackendKind};
use serde::Serialize;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Capability row for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub kind: BackendKind,
    pub available: bool,
    /// What the probe looked at or why it failed.
    pub detail: String,
}

/// Capability table, in [`BackendKind::PRIORITY`] order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendAvailability {
    rows: Vec<Capability>,
}

impl BackendAvailability {
    /// Look for each backend on this host.
    ///
    /// Native: the pdfium library binds. Subprocess tools: the executable
    /// starts at all (its version flag's exit status is ignored, some poppler
    /// builds exit non-zero on `-v`).
    pub fn probe(config: &PlanmarkConfig) -> Self {
        let rows = BackendKind::PRIORITY
            .iter()
            .map(|&kind| {
                let (available, detail) = match kind {
                    BackendKind::Native => {
                        match bind_pdfium(config.pdfium_library_path.as_deref()) {
                            Ok(_) => (true, "pdfium library bound".to_string()),
                            Err(e) => (false, e.to_string()),
                        }
                    }
                    BackendKind::Poppler => probe_program(&config.pdftoppm_program, "-v"),
                    BackendKind::Ghostscript => {
                        probe_program(&config.ghostscript_program, "--version")
                    }
                };
                debug!("backend {}: available={} ({})", kind, available, detail);
                Capability {
                    kind,
                    available,
                    detail,
                }
            })
            .collect::<Vec<_>>();

        let found: Vec<String> = rows
            .iter()
            .filter(|r| r.available)
            .map(|r| r.kind.to_string())
            .collect();
        info!("Rendering backends available: [{}]", found.join(", "));

        Self { rows }
    }

    /// Every backend marked available (tests, hosts known to be complete).
    pub fn all() -> Self {
        Self::uniform(true, "assumed")
    }

    /// Nothing available.
    pub fn none() -> Self {
        Self::uniform(false, "disabled")
    }

    /// Exactly the listed kinds are available.
    pub fn only(kinds: &[BackendKind]) -> Self {
        let rows = BackendKind::PRIORITY
            .iter()
            .map(|&kind| Capability {
                kind,
                available: kinds.contains(&kind),
                detail: "configured".to_string(),
            })
            .collect();
        Self { rows }
    }

    fn uniform(available: bool, detail: &str) -> Self {
        let rows = BackendKind::PRIORITY
            .iter()
            .map(|&kind| Capability {
                kind,
                available,
                detail: detail.to_string(),
            })
            .collect();
        Self { rows }
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.rows.iter().any(|r| r.kind == kind && r.available)
    }

    pub fn any_available(&self) -> bool {
        self.rows.iter().any(|r| r.available)
    }

    pub fn rows(&self) -> &[Capability] {
        &self.rows
    }
}

fn probe_program(program: &str, version_flag: &str) -> (bool, String) {
    match Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => (true, format!("`{program}` found")),
        Err(e) => (false, format!("`{program}`: {e}")),
    }
}
