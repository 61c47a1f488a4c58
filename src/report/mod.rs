//! Bulk report export: one PDF per plan (or per issue) with a section per
//! issue, each carrying an optional pin thumbnail and the issue's photos.
//!
//! ## Section lifecycle
//!
//! ```text
//! Init ─▶ HeaderWritten ─┬─▶ SectionHeader ─▶ OptionalPin ─▶ PhotoLoop ─▶ SectionClose ─┐
//!                        │         ▲                                                     │
//!                        │         └─────────────────────────────────────────────────────┤
//!                        └──────────────────────────────▶ Finalized ◀────────────────────┘
//! ```
//!
//! Everything that can go wrong inside a section (no renderer, a photo that
//! is missing, remote or undecodable) is recorded and the section is written
//! without it. Only failures outside a section are fatal: unknown plan or
//! issue, or a report that could not be written to disk.

pub mod writer;

use crate::context::Planmark;
use crate::error::{PlanmarkError, SkipReason};
use crate::model::{IssueRecord, PhotoRecord, PlanRecord};
use crate::pipeline::fetch::RemoteAssetFetcher;
use crate::pipeline::input;
use crate::pipeline::janitor::ResourceJanitor;
use crate::pipeline::photos::ResolutionStrategy;
use crate::pipeline::selector::BackendAttempt;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::render::PinJob;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use writer::{EncodedImage, ReportWriter};

/// Tallest a pin thumbnail may be drawn, in points.
const PIN_MAX_HEIGHT: f64 = 380.0;
/// Tallest a photo may be drawn, in points.
const PHOTO_MAX_HEIGHT: f64 = 300.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Pdf,
    /// Recognised, but produced elsewhere.
    Csv,
}

/// Parameters of one export, as received over HTTP or from the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub plan_id: i64,
    /// Export only this issue.
    #[serde(default)]
    pub issue_id: Option<i64>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_true")]
    pub include_pin: bool,
    /// Attach [`ExportDebug`] to the summary.
    #[serde(default)]
    pub debug: bool,
    /// Fetch photos referenced by URL. `None` uses the configured policy.
    #[serde(default)]
    pub allow_remote: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl ExportRequest {
    pub fn new(plan_id: i64) -> Self {
        Self {
            plan_id,
            issue_id: None,
            format: ExportFormat::Pdf,
            include_pin: true,
            debug: false,
            allow_remote: None,
        }
    }
}

/// Result of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub ok: bool,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub pins_included: usize,
    pub sections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<ExportDebug>,
}

/// What happened inside each section, for troubleshooting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportDebug {
    pub backend_attempts: Vec<PinDiagnostic>,
    pub skipped_photos: Vec<SkippedPhoto>,
    pub resolved_photos: Vec<ResolvedPhotoEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinDiagnostic {
    pub issue_id: i64,
    pub method_used: Option<&'static str>,
    pub attempts: Vec<BackendAttempt>,
    /// Why no render was attempted at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedPhoto {
    pub issue_id: i64,
    pub photo_id: i64,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPhotoEntry {
    pub issue_id: i64,
    pub photo_id: i64,
    /// Local path, or the URL it was fetched from.
    pub source: String,
    /// `None` for fetched photos.
    pub strategy: Option<ResolutionStrategy>,
}

/// Everything one issue contributes to the report.
#[derive(Debug)]
pub struct ReportSection {
    pub issue_id: i64,
    pub title: String,
    pub notes: String,
    pub page: u32,
    pub x_norm: f64,
    pub y_norm: f64,
    pub pin: Option<EncodedImage>,
    pub photos: Vec<EncodedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyState {
    Init,
    HeaderWritten,
    SectionHeader,
    OptionalPin,
    PhotoLoop,
    SectionClose,
    Finalized,
}

impl AssemblyState {
    fn can_advance_to(self, next: AssemblyState) -> bool {
        use AssemblyState::*;
        matches!(
            (self, next),
            (Init, HeaderWritten)
                | (HeaderWritten, SectionHeader)
                | (HeaderWritten, Finalized)
                | (SectionHeader, OptionalPin)
                | (OptionalPin, PhotoLoop)
                | (PhotoLoop, SectionClose)
                | (SectionClose, SectionHeader)
                | (SectionClose, Finalized)
        )
    }
}

/// The writer plus the lifecycle state guarding it.
struct Assembly {
    state: AssemblyState,
    writer: ReportWriter,
}

impl Assembly {
    fn new(title: &str) -> Self {
        Self {
            state: AssemblyState::Init,
            writer: ReportWriter::new(title),
        }
    }

    fn advance(&mut self, next: AssemblyState) -> Result<(), PlanmarkError> {
        let legal = self.state.can_advance_to(next);
        debug_assert!(legal, "report state {:?} -> {:?}", self.state, next);
        if !legal {
            return Err(PlanmarkError::Internal(format!(
                "report assembly cannot go from {:?} to {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    fn header(&mut self, plan: &PlanRecord, scope: &str, issue_count: usize) -> Result<(), PlanmarkError> {
        self.advance(AssemblyState::HeaderWritten)?;
        let w = &mut self.writer;
        w.text(&plan.name, 20.0, true);
        w.text(&format!("Issue report  ·  {scope}"), 12.0, false);
        w.text(
            &format!(
                "Revision {}  ·  {} issue(s)  ·  generated {}",
                plan.revision,
                issue_count,
                Local::now().format("%Y-%m-%d %H:%M")
            ),
            9.0,
            false,
        );
        w.rule();
        w.spacer(8.0);
        if issue_count == 0 {
            w.text("No issues recorded on this plan.", 11.0, false);
        }
        Ok(())
    }

    fn section(&mut self, section: &ReportSection) -> Result<(), PlanmarkError> {
        self.advance(AssemblyState::SectionHeader)?;
        let w = &mut self.writer;
        // Keep a heading together with at least its first lines.
        w.ensure_space(90.0);
        w.text(&format!("Issue #{}: {}", section.issue_id, section.title), 14.0, true);
        w.text(
            &format!(
                "Page {}  ·  position ({:.3}, {:.3})",
                section.page, section.x_norm, section.y_norm
            ),
            9.0,
            false,
        );
        if !section.notes.trim().is_empty() {
            w.spacer(4.0);
            w.text(section.notes.trim(), 10.0, false);
        }

        self.advance(AssemblyState::OptionalPin)?;
        if let Some(pin) = &section.pin {
            self.writer.spacer(6.0);
            self.writer
                .image(pin, ReportWriter::content_width(), PIN_MAX_HEIGHT);
        }

        self.advance(AssemblyState::PhotoLoop)?;
        if !section.photos.is_empty() {
            self.writer.spacer(6.0);
            self.writer
                .text(&format!("Photos ({})", section.photos.len()), 10.0, true);
            for photo in &section.photos {
                self.writer.spacer(4.0);
                self.writer
                    .image(photo, ReportWriter::content_width(), PHOTO_MAX_HEIGHT);
            }
        }

        self.advance(AssemblyState::SectionClose)?;
        self.writer.spacer(8.0);
        self.writer.rule();
        self.writer.spacer(8.0);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, PlanmarkError> {
        self.advance(AssemblyState::Finalized)?;
        self.writer.finish()
    }
}

/// Where pins come from for this export, decided once.
enum PinSource {
    Disabled,
    /// `total_pages` is `None` when lopdf could not parse the plan.
    Ready {
        pdf_path: PathBuf,
        total_pages: Option<u32>,
    },
    Unavailable(String),
}

/// Builds reports for one [`Planmark`].
pub struct ReportAssembler<'a> {
    app: &'a Planmark,
    progress: ProgressCallback,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(app: &'a Planmark) -> Self {
        Self {
            app,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Assemble and write a report.
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportSummary, PlanmarkError> {
        if request.format == ExportFormat::Csv {
            return Err(PlanmarkError::UnsupportedFormat {
                format: "csv".to_string(),
            });
        }

        let app = self.app;
        let plan = app.plan(request.plan_id).await?;
        let issues = select_issues(app.store().issues_for_plan(plan.id).await?, request.issue_id)?;
        let total = issues.len();
        info!(
            "Exporting plan {} ({}): {} issue(s), pins {}",
            plan.id,
            plan.name,
            total,
            if request.include_pin { "on" } else { "off" }
        );

        let pins = self.pin_source(&plan, request.include_pin).await;
        let allow_remote = request
            .allow_remote
            .unwrap_or(app.fetcher().policy().enabled);
        let fetcher = app.fetcher().with_enabled(allow_remote);
        let janitor = app.renderer().janitor();

        let scope = match request.issue_id {
            Some(id) => format!("issue #{id}"),
            None => "all issues".to_string(),
        };
        let mut assembly = Assembly::new(&plan.name);
        assembly.header(&plan, &scope, total)?;
        self.progress.on_export_start(total);

        let mut debug = ExportDebug::default();
        let mut pins_included = 0;

        for (i, issue) in issues.iter().enumerate() {
            let index = i + 1;
            self.progress.on_issue_start(index, total, issue.id);

            let pin = self.render_pin(issue, &pins, &janitor, &mut debug).await;
            let mut photos = Vec::new();
            for photo in app.store().photos_for_issue(issue.id).await? {
                match self
                    .load_photo(plan.id, issue, &photo, &fetcher, &janitor, &mut debug)
                    .await
                {
                    Ok(image) => photos.push(image),
                    Err(reason) => {
                        warn!("Issue {}: photo {} skipped: {}", issue.id, photo.id, reason);
                        self.progress.on_photo_skipped(issue.id, photo.id, &reason);
                        debug.skipped_photos.push(SkippedPhoto {
                            issue_id: issue.id,
                            photo_id: photo.id,
                            reason,
                        });
                    }
                }
            }

            let section = ReportSection {
                issue_id: issue.id,
                title: issue.title.clone(),
                notes: issue.notes.clone(),
                page: issue.page,
                x_norm: issue.x_norm,
                y_norm: issue.y_norm,
                pin,
                photos,
            };
            assembly.section(&section)?;
            if section.pin.is_some() {
                pins_included += 1;
            }
            self.progress
                .on_issue_complete(index, total, section.pin.is_some(), section.photos.len());
        }

        let pages = assembly.writer.page_count();
        let bytes = assembly.finish()?;
        let filename = report_filename(&plan, request.issue_id);
        let output_dir = app.config().output_dir.clone();
        let (path, size) = tokio::task::spawn_blocking(move || write_atomically(&output_dir, &filename, &bytes))
            .await
            .map_err(|e| PlanmarkError::Internal(format!("report write task panicked: {e}")))??;

        let cleanup = janitor.cleanup();
        debug!("export cleanup: {:?}", cleanup);
        info!(
            "Wrote {} ({} bytes, {} page(s), {}/{} pin(s))",
            path.display(),
            size,
            pages,
            pins_included,
            total
        );
        self.progress.on_export_complete(&path, size);

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ExportSummary {
            ok: true,
            filename,
            path,
            size,
            pins_included,
            sections: total,
            debug: request.debug.then_some(debug),
        })
    }

    async fn pin_source(&self, plan: &PlanRecord, include_pin: bool) -> PinSource {
        if !include_pin {
            return PinSource::Disabled;
        }
        let pdf_path = match self.app.plan_file(plan) {
            Ok(p) => p,
            Err(e) => {
                warn!("Plan {}: pins omitted: {}", plan.id, e);
                return PinSource::Unavailable(e.to_string());
            }
        };
        let counted = pdf_path.clone();
        match tokio::task::spawn_blocking(move || input::known_page_count(&counted)).await {
            Ok(total_pages) => PinSource::Ready {
                pdf_path,
                total_pages,
            },
            Err(e) => PinSource::Unavailable(format!("page count task panicked: {e}")),
        }
    }

    async fn render_pin(
        &self,
        issue: &IssueRecord,
        pins: &PinSource,
        janitor: &ResourceJanitor,
        debug: &mut ExportDebug,
    ) -> Option<EncodedImage> {
        let note = |text: String| PinDiagnostic {
            issue_id: issue.id,
            method_used: None,
            attempts: Vec::new(),
            note: Some(text),
        };
        let (pdf_path, total_pages) = match pins {
            PinSource::Disabled => return None,
            PinSource::Unavailable(reason) => {
                debug.backend_attempts.push(note(reason.clone()));
                return None;
            }
            PinSource::Ready {
                pdf_path,
                total_pages,
            } => (pdf_path, *total_pages),
        };
        if let Err(e) = input::check_known_page(issue.page, total_pages) {
            warn!("Issue {}: pin omitted: {}", issue.id, e);
            debug.backend_attempts.push(note(e.to_string()));
            return None;
        }

        let job = PinJob {
            pdf_path,
            page: issue.page,
            point: issue.point(),
            width_px: self.app.config().report_pin_width_px,
        };
        let render = self.app.renderer().render(&job, janitor).await;
        debug.backend_attempts.push(PinDiagnostic {
            issue_id: issue.id,
            method_used: render.method_used,
            attempts: render.attempts,
            note: None,
        });
        let Some(composite) = render.composite else {
            warn!("Issue {}: no renderer available, section written without pin", issue.id);
            return None;
        };

        let pixels = composite.raster.into_pixels();
        match tokio::task::spawn_blocking(move || EncodedImage::from_rgba(&pixels)).await {
            Ok(Ok(image)) => Some(image),
            Ok(Err(e)) => {
                warn!("Issue {}: pin could not be encoded: {}", issue.id, e);
                None
            }
            Err(e) => {
                warn!("Issue {}: pin encoding task panicked: {}", issue.id, e);
                None
            }
        }
    }

    async fn load_photo(
        &self,
        plan_id: i64,
        issue: &IssueRecord,
        photo: &PhotoRecord,
        fetcher: &RemoteAssetFetcher,
        janitor: &ResourceJanitor,
        debug: &mut ExportDebug,
    ) -> Result<EncodedImage, SkipReason> {
        let (path, entry) = match photo.remote_url() {
            Some(url) => {
                let path = fetcher.fetch(url, janitor).await?;
                let entry = ResolvedPhotoEntry {
                    issue_id: issue.id,
                    photo_id: photo.id,
                    source: url.to_string(),
                    strategy: None,
                };
                (path, entry)
            }
            None => {
                let resolved = self.app.photos().resolve(plan_id, photo)?;
                let entry = ResolvedPhotoEntry {
                    issue_id: issue.id,
                    photo_id: photo.id,
                    source: resolved.path.display().to_string(),
                    strategy: Some(resolved.strategy),
                };
                (resolved.path, entry)
            }
        };

        let max_px = self.app.config().max_photo_px;
        let image = tokio::task::spawn_blocking(move || decode_photo(&path, max_px))
            .await
            .map_err(|e| SkipReason::DecodeFailed(format!("decode task panicked: {e}")))??;
        debug!("Issue {}: photo {} from {}", issue.id, photo.id, entry.source);
        debug.resolved_photos.push(entry);
        Ok(image)
    }
}

impl Planmark {
    /// Shorthand for [`ReportAssembler::export`] without progress events.
    pub async fn export_report(&self, request: &ExportRequest) -> Result<ExportSummary, PlanmarkError> {
        ReportAssembler::new(self).export(request).await
    }
}

/// Stable order (page, then id), optionally narrowed to one issue.
fn select_issues(
    mut issues: Vec<IssueRecord>,
    only: Option<i64>,
) -> Result<Vec<IssueRecord>, PlanmarkError> {
    if let Some(issue_id) = only {
        issues.retain(|i| i.id == issue_id);
        if issues.is_empty() {
            return Err(PlanmarkError::IssueNotFound { issue_id });
        }
    }
    issues.sort_by_key(|i| (i.page, i.id));
    Ok(issues)
}

fn decode_photo(path: &Path, max_px: u32) -> Result<EncodedImage, SkipReason> {
    let image = image::ImageReader::open(path)
        .map_err(|e| SkipReason::Io(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| SkipReason::Io(e.to_string()))?
        .decode()
        .map_err(|e| SkipReason::DecodeFailed(e.to_string()))?;
    EncodedImage::from_image(&image, max_px).map_err(|e| SkipReason::DecodeFailed(e.to_string()))
}

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase ASCII slug of a plan name, at most 60 characters.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let slug = NON_SLUG.replace_all(&lower, "-");
    let slug: String = slug.trim_matches('-').chars().take(60).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "plan".to_string()
    } else {
        slug.to_string()
    }
}

fn report_filename(plan: &PlanRecord, issue_id: Option<i64>) -> String {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    match issue_id {
        Some(id) => format!("{}-issue-{}-{}.pdf", slugify(&plan.name), id, stamp),
        None => format!("{}-report-{}.pdf", slugify(&plan.name), stamp),
    }
}

/// Write `bytes` to `dir/filename` through a temp file and a no-clobber
/// rename. An existing file of the same name gets a `-2`, `-3`, … suffix.
fn write_atomically(dir: &Path, filename: &str, bytes: &[u8]) -> Result<(PathBuf, u64), PlanmarkError> {
    let write_failed = |path: &Path, source: io::Error| PlanmarkError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(|e| write_failed(dir, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".planmark-report-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| write_failed(dir, e))?;
    if let Err(e) = tmp.write_all(bytes) {
        return Err(write_failed(tmp.path(), e));
    }
    if let Err(e) = tmp.as_file().sync_all() {
        return Err(write_failed(tmp.path(), e));
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (filename.to_string(), String::new()),
    };
    let mut target = dir.join(filename);
    let mut attempt = 1;
    loop {
        match tmp.persist_noclobber(&target) {
            Ok(_) => break,
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                tmp = e.file;
                attempt += 1;
                target = dir.join(format!("{stem}-{attempt}{ext}"));
            }
            Err(e) => return Err(write_failed(&target, e.error)),
        }
    }

    let size = std::fs::metadata(&target)
        .map_err(|e| write_failed(&target, e))?
        .len();
    if size == 0 {
        let _ = std::fs::remove_file(&target);
        return Err(PlanmarkError::OutputEmpty { path: target });
    }
    Ok((target, size))
}
