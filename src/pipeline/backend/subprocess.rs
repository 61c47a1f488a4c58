//! Time-bounded external rasteriser runs.
//!
//! Success needs both a zero exit code *and* a non-empty output file.
//! Poppler and Ghostscript have both been seen exiting 0 after writing a
//! zero-byte PNG (fonts missing, broken xref), so the exit code alone is
//! not trusted.

use crate::error::BackendFailure;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run `cmd` to completion or kill it after `timeout`.
///
/// `kill_on_drop` does the killing: when the timeout fires the
/// `wait_with_output` future is dropped together with the child handle.
pub(super) async fn run_bounded(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> Result<(), BackendFailure> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| BackendFailure::Spawn {
        program: program.to_string(),
        detail: e.to_string(),
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| BackendFailure::Io(e.to_string()))?,
        Err(_) => {
            return Err(BackendFailure::Timeout {
                secs: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(BackendFailure::ExitStatus {
            code: output.status.code(),
            stderr: diagnostic_text(&output.stderr, &output.stdout),
        });
    }

    debug!("{} exited 0", program);
    Ok(())
}

/// Check that a tool actually wrote something at `path`.
pub(super) fn verify_output(path: &Path) -> Result<(), BackendFailure> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(BackendFailure::EmptyOutput {
            path: path.to_path_buf(),
        }),
        Err(_) => Err(BackendFailure::MissingOutput {
            path: path.to_path_buf(),
        }),
    }
}

/// Last few hundred bytes of stderr (or stdout when stderr is empty).
fn diagnostic_text(stderr: &[u8], stdout: &[u8]) -> String {
    let raw = if stderr.iter().any(|b| !b.is_ascii_whitespace()) {
        stderr
    } else {
        stdout
    };
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    const MAX: usize = 600;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut start = text.len() - MAX;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.png");
        std::fs::write(&p, b"").unwrap();
        assert!(matches!(verify_output(&p), Err(BackendFailure::EmptyOutput { .. })));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nope.png");
        assert!(matches!(verify_output(&p), Err(BackendFailure::MissingOutput { .. })));
    }

    #[test]
    fn non_empty_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.png");
        std::fs::write(&p, b"\x89PNG").unwrap();
        assert!(verify_output(&p).is_ok());
    }

    #[test]
    fn diagnostic_prefers_stderr_and_truncates() {
        assert_eq!(diagnostic_text(b"  boom \n", b"ignored"), "boom");
        assert_eq!(diagnostic_text(b"\n", b"from stdout"), "from stdout");
        let long = "x".repeat(2000);
        let d = diagnostic_text(long.as_bytes(), b"");
        assert!(d.starts_with('…'));
        assert!(d.len() < 700);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let cmd = Command::new("planmark-definitely-not-installed");
        let err = run_bounded(cmd, "planmark-definitely-not-installed", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendFailure::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_bounded(cmd, "sleep", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendFailure::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken xref >&2; exit 3"]);
        let err = run_bounded(cmd, "sh", Duration::from_secs(5)).await.unwrap_err();
        match err {
            BackendFailure::ExitStatus { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("broken xref"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
