//! Error types for the planmark library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`PlanmarkError`] — **Fatal**: the request cannot proceed at all
//!   (bad input, unknown plan, the report file could not be written).
//!   Returned as `Err(PlanmarkError)` from the top-level operations.
//!
//! * [`BackendFailure`] — **Non-fatal**: one rendering backend failed for
//!   one attempt. The selector logs it and moves on to the next candidate.
//!
//! * [`SkipReason`] — **Non-fatal**: one photo could not be embedded. The
//!   report records the reason and keeps going.
//!
//! "No renderer available" is deliberately none of these: it is an outcome
//! (see [`crate::pipeline::selector::BackendResult`]) that callers turn into
//! a 204 or an omitted pin.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the planmark library.
#[derive(Debug, Error)]
pub enum PlanmarkError {
    // ── Input validation ──────────────────────────────────────────────────
    /// A request parameter is missing or malformed.
    #[error("Invalid '{field}': {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The export format is recognised but not produced by this crate.
    #[error("Unsupported export format '{format}'")]
    UnsupportedFormat { format: String },

    // ── Lookup ────────────────────────────────────────────────────────────
    #[error("Plan {plan_id} not found")]
    PlanNotFound { plan_id: i64 },

    #[error("Issue {issue_id} not found")]
    IssueNotFound { issue_id: i64 },

    /// The plan record exists but its PDF is not on disk.
    #[error("Plan file not found: '{path}'")]
    PlanFileMissing { path: PathBuf },

    // ── PDF ───────────────────────────────────────────────────────────────
    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    #[error("PDF '{path}' could not be parsed: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    // ── Output ────────────────────────────────────────────────────────────
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The report was written but is empty; the whole export fails.
    #[error("Output file '{path}' is empty after writing")]
    OutputEmpty { path: PathBuf },

    // ── Collaborators ─────────────────────────────────────────────────────
    #[error("Plan store error: {0}")]
    Store(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlanmarkError {
    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            PlanmarkError::InvalidInput { .. } | PlanmarkError::UnsupportedFormat { .. } => 400,
            PlanmarkError::PlanNotFound { .. }
            | PlanmarkError::IssueNotFound { .. }
            | PlanmarkError::PlanFileMissing { .. } => 404,
            PlanmarkError::NotAPdf { .. }
            | PlanmarkError::CorruptPdf { .. }
            | PlanmarkError::PageOutOfRange { .. } => 422,
            PlanmarkError::OutputWriteFailed { .. }
            | PlanmarkError::OutputEmpty { .. }
            | PlanmarkError::Store(_)
            | PlanmarkError::InvalidConfig(_)
            | PlanmarkError::Internal(_) => 500,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        PlanmarkError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

/// Why a single backend attempt failed.
///
/// Logged with the backend's diagnostic output; never aborts the request.
#[derive(Debug, Clone, Error)]
pub enum BackendFailure {
    /// pdfium could not be bound, or refused the document/page.
    #[error("pdfium: {0}")]
    Library(String),

    /// The executable could not be started.
    #[error("failed to start '{program}': {detail}")]
    Spawn { program: String, detail: String },

    /// The process exited non-zero.
    #[error("exited with {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    /// Exit code 0 but no output file was produced.
    #[error("exited 0 but wrote no output at '{path}'")]
    MissingOutput { path: PathBuf },

    /// Exit code 0 but the output file is zero bytes.
    #[error("exited 0 but output '{path}' is empty")]
    EmptyOutput { path: PathBuf },

    #[error("timed out after {secs}s and was killed")]
    Timeout { secs: u64 },

    /// The produced file is not a decodable PNG.
    #[error("output could not be decoded: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal: {0}")]
    Internal(String),
}

/// Why a photo was left out of a report.
///
/// [`SkipReason::code`] is the stable identifier written into debug output.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The photo is remote but the caller did not opt in to fetching.
    #[error("remote fetching is disabled")]
    RemoteDisabled,

    #[error("not a fetchable http(s) URL: {0}")]
    BadUrl(String),

    #[error("server answered HTTP {0}")]
    HttpStatus(u16),

    #[error("content-type {0:?} is not an image")]
    BadContentType(Option<String>),

    #[error("{declared} bytes exceeds the {limit} byte cap")]
    TooLarge { declared: u64, limit: u64 },

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    /// No resolver strategy found the file on disk.
    #[error("file not found (tried {0})")]
    NotFound(String),

    #[error("image could not be decoded: {0}")]
    DecodeFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::RemoteDisabled => "remote_disabled",
            SkipReason::BadUrl(_) => "bad_url",
            SkipReason::HttpStatus(_) => "http_status",
            SkipReason::BadContentType(_) => "bad_content_type",
            SkipReason::TooLarge { .. } => "too_large",
            SkipReason::Timeout(_) => "timeout",
            SkipReason::Network(_) => "network",
            SkipReason::NotFound(_) => "not_found",
            SkipReason::DecodeFailed(_) => "decode_failed",
            SkipReason::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_is_client_error() {
        let e = PlanmarkError::invalid("x_norm", "not a number");
        assert_eq!(e.status_code(), 400);
        assert!(e.to_string().contains("x_norm"), "got: {e}");
    }

    #[test]
    fn empty_output_is_server_error() {
        let e = PlanmarkError::OutputEmpty {
            path: PathBuf::from("/tmp/report.pdf"),
        };
        assert_eq!(e.status_code(), 500);
        assert!(e.to_string().contains("report.pdf"));
    }

    #[test]
    fn lookup_failures_are_not_found() {
        assert_eq!(PlanmarkError::PlanNotFound { plan_id: 7 }.status_code(), 404);
        assert_eq!(PlanmarkError::IssueNotFound { issue_id: 9 }.status_code(), 404);
    }

    #[test]
    fn skip_reason_codes_are_stable() {
        assert_eq!(SkipReason::BadContentType(Some("text/html".into())).code(), "bad_content_type");
        assert_eq!(
            SkipReason::TooLarge {
                declared: 6_000_000,
                limit: 5_242_880
            }
            .code(),
            "too_large"
        );
        assert_eq!(SkipReason::RemoteDisabled.code(), "remote_disabled");
    }

    #[test]
    fn timeout_display_mentions_kill() {
        let e = BackendFailure::Timeout { secs: 5 };
        assert!(e.to_string().contains("5s"));
        assert!(e.to_string().contains("killed"));
    }
}
