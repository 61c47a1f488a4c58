//! CLI binary for planmark.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PlanmarkConfig`, loads a project manifest and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use planmark::pipeline::compose::MarkerGlyph;
use planmark::{
    crop_page, render_pin, BackendAvailability, CropSource, ExportProgressCallback, ExportRequest,
    ManifestStore, NormRect, PinRequest, Planmark, PlanmarkConfig, PreviewOutcome, ReportAssembler,
    SkipReason,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over report sections, with one log line per skipped photo.
struct CliExportProgress {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliExportProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading plan…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            skipped: AtomicUsize::new(0),
        })
    }
}

impl ExportProgressCallback for CliExportProgress {
    fn on_export_start(&self, total_issues: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} issues  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_issues as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Exporting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Writing {total_issues} issue section(s)…"))
        ));
    }

    fn on_issue_start(&self, _index: usize, _total: usize, issue_id: i64) {
        self.bar.set_message(format!("issue #{issue_id}"));
    }

    fn on_photo_skipped(&self, issue_id: i64, photo_id: i64, reason: &SkipReason) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} issue #{issue_id}: photo {photo_id} skipped  {}",
            red("✗"),
            dim(&reason.to_string())
        ));
    }

    fn on_issue_complete(&self, index: usize, total: usize, pin_included: bool, photos_embedded: usize) {
        self.bar.println(format!(
            "  {} Section {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            if pin_included { "pin" } else { "no pin" },
            dim(&format!("{photos_embedded} photo(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_export_complete(&self, path: &Path, size: u64) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        eprintln!(
            "{} {}  {}{}",
            green("✔"),
            bold(&path.display().to_string()),
            dim(&format!("{size} bytes")),
            if skipped > 0 {
                format!("  ({} photo(s) skipped)", red(&skipped.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Which rasterisers does this host have?
  planmark backends

  # Preview one issue's pin
  planmark --manifest project.json render-pin --plan-id 1 --issue-id 10 -o pin.png

  # Preview an arbitrary point
  planmark --manifest project.json render-pin --plan-id 1 --page 2 --x 0.4 --y 0.7

  # Export a report for the whole plan, fetching remote photos
  planmark --manifest project.json export --plan-id 1 --allow-remote

  # Crop a region of an uploaded PDF
  planmark crop --file drawing.pdf --page 1 --x 0.1 --y 0.1 --w 0.5 --h 0.3 -o detail.pdf

  # Serve the HTTP routes (build with --features server)
  planmark --manifest project.json serve --addr 0.0.0.0:8080

BACKENDS (tried in this order):
  pdfium        in-process, needs libpdfium (PLANMARK_PDFIUM_LIB_PATH or system)
  pdftoppm      Poppler utilities
  ghostscript   gs / gswin64c

ENVIRONMENT VARIABLES:
  PLANMARK_MANIFEST        Project manifest (plans, issues, photos)
  PLANMARK_STORAGE_ROOT    Root for relative plan and photo paths
  PLANMARK_OUTPUT_DIR      Where reports are written
  PLANMARK_PDFIUM_LIB_PATH Directory or file of an existing libpdfium
  RUST_LOG                 Overrides -v / -q log filtering
"#;

/// Render issue pins on PDF plans and export survey reports.
#[derive(Parser, Debug)]
#[command(
    name = "planmark",
    version,
    about = "Render issue pins on PDF plans and export survey reports",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Project manifest with plans, issues and photos.
    #[arg(long, global = true, env = "PLANMARK_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Root against which relative plan and photo paths resolve.
    #[arg(long, global = true, env = "PLANMARK_STORAGE_ROOT", default_value = ".")]
    storage_root: PathBuf,

    /// Directory for exported reports.
    #[arg(long, global = true, env = "PLANMARK_OUTPUT_DIR", default_value = "exports")]
    output_dir: PathBuf,

    /// Directory for intermediate files (default: system temp dir).
    #[arg(long, global = true, env = "PLANMARK_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Existing libpdfium (file or directory).
    #[arg(long, global = true, env = "PLANMARK_PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    #[arg(long, global = true, env = "PLANMARK_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: String,

    /// Ghostscript executable (default: gs, gswin64c on Windows).
    #[arg(long, global = true, env = "PLANMARK_GHOSTSCRIPT")]
    ghostscript: Option<String>,

    /// Kill external rasterisers after this many seconds.
    #[arg(long, global = true, env = "PLANMARK_TIMEOUT", default_value_t = 5)]
    timeout: u64,

    /// PNG used as the pin glyph instead of the built-in one.
    #[arg(long, global = true, env = "PLANMARK_MARKER")]
    marker: Option<PathBuf>,

    /// Fetch photos referenced by http(s) URL.
    #[arg(long, global = true, env = "PLANMARK_ALLOW_REMOTE")]
    allow_remote: bool,

    /// Print machine-readable JSON results.
    #[arg(long, global = true, env = "PLANMARK_JSON")]
    json: bool,

    #[arg(long, global = true, env = "PLANMARK_NO_PROGRESS")]
    no_progress: bool,

    /// Debug logging.
    #[arg(short, long, global = true, env = "PLANMARK_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "PLANMARK_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one pin on its plan page as PNG.
    RenderPin(RenderPinArgs),
    /// Export a PDF report for a plan or a single issue.
    Export(ExportArgs),
    /// Crop a region of one page into a new single-page PDF.
    Crop(CropArgs),
    /// Probe and print the available rasterisers.
    Backends,
    /// Serve the HTTP routes.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RenderPinArgs {
    #[arg(long)]
    plan_id: i64,
    #[arg(long)]
    issue_id: Option<i64>,
    /// 1-based page; overrides the issue's page.
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    x: Option<f64>,
    #[arg(long)]
    y: Option<f64>,
    /// Raster width in pixels (default: configured preview width).
    #[arg(long)]
    width: Option<u32>,
    #[arg(short, long, default_value = "pin.png")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long)]
    plan_id: i64,
    /// Export only this issue.
    #[arg(long)]
    issue_id: Option<i64>,
    /// Leave pin thumbnails out.
    #[arg(long)]
    no_pin: bool,
    /// Include backend attempts and photo resolution in the JSON summary.
    #[arg(long)]
    debug: bool,
}

#[derive(Args, Debug)]
struct CropArgs {
    /// Source PDF; otherwise the stored file of --plan-id.
    #[arg(long, conflicts_with = "plan_id")]
    file: Option<PathBuf>,
    #[arg(long)]
    plan_id: Option<i64>,
    #[arg(long)]
    page: u32,
    #[arg(long)]
    x: f64,
    #[arg(long)]
    y: f64,
    #[arg(long)]
    w: f64,
    #[arg(long)]
    h: f64,
    #[arg(short, long, default_value = "crop.pdf")]
    output: PathBuf,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "PLANMARK_ADDR", default_value = "127.0.0.1:8080")]
    addr: std::net::SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The export progress bar replaces INFO lines unless -v is given.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.json
        && matches!(cli.command, Command::Export(_));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    match &cli.command {
        Command::Backends => backends(&cli, &config),
        Command::RenderPin(args) => {
            let app = build_app(&cli, config).await?;
            render_pin_cmd(&cli, &app, args).await
        }
        Command::Export(args) => {
            let app = build_app(&cli, config).await?;
            export_cmd(&cli, &app, args, show_progress).await
        }
        Command::Crop(args) => crop_cmd(&cli, config, args).await,
        #[cfg(feature = "server")]
        Command::Serve(args) => {
            let app = build_app(&cli, config).await?;
            planmark::server::serve(Arc::new(app), args.addr)
                .await
                .context("Server failed")
        }
    }
}

/// Map CLI args to `PlanmarkConfig`.
fn build_config(cli: &Cli) -> Result<PlanmarkConfig> {
    let mut builder = PlanmarkConfig::builder()
        .storage_root(&cli.storage_root)
        .output_dir(&cli.output_dir)
        .pdftoppm_program(&cli.pdftoppm)
        .subprocess_timeout_secs(cli.timeout)
        .allow_remote_photos(cli.allow_remote);
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }
    if let Some(ref gs) = cli.ghostscript {
        builder = builder.ghostscript_program(gs);
    }
    builder.build().context("Invalid configuration")
}

async fn build_app(cli: &Cli, config: PlanmarkConfig) -> Result<Planmark> {
    let Some(ref manifest) = cli.manifest else {
        bail!("--manifest (or PLANMARK_MANIFEST) is required for this command");
    };
    let store = ManifestStore::from_path(manifest)
        .await
        .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;
    let mut builder = Planmark::builder(config, Arc::new(store));
    if let Some(ref marker) = cli.marker {
        let glyph = MarkerGlyph::from_path(marker)
            .with_context(|| format!("Failed to load marker {}", marker.display()))?;
        builder = builder.glyph(glyph);
    }
    Ok(builder.build())
}

fn backends(cli: &Cli, config: &PlanmarkConfig) -> Result<()> {
    let availability = BackendAvailability::probe(config);
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(availability.rows()).context("Failed to serialise")?
        );
        return Ok(());
    }
    for row in availability.rows() {
        println!(
            "{}  {:<12} {}",
            if row.available { green("✓") } else { red("✗") },
            row.kind.method_name(),
            dim(&row.detail)
        );
    }
    if !availability.any_available() {
        eprintln!("{} no rasteriser available; previews will be empty", cyan("⚠"));
    }
    Ok(())
}

async fn render_pin_cmd(cli: &Cli, app: &Planmark, args: &RenderPinArgs) -> Result<()> {
    let request = PinRequest {
        plan_id: Some(args.plan_id),
        issue_id: args.issue_id,
        page: args.page,
        x_norm: args.x,
        y_norm: args.y,
        width: args.width,
    };
    match render_pin(app, &request).await.context("Preview failed")? {
        PreviewOutcome::Rendered { png, method } => {
            tokio::fs::write(&args.output, &png)
                .await
                .with_context(|| format!("Failed to write {}", args.output.display()))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "ok": true,
                        "path": args.output,
                        "size": png.len(),
                        "method": method,
                    })
                );
            } else if !cli.quiet {
                eprintln!(
                    "{} {}  {}",
                    green("✔"),
                    bold(&args.output.display().to_string()),
                    dim(&format!("{} bytes via {method}", png.len()))
                );
            }
            Ok(())
        }
        PreviewOutcome::NoRenderer { attempts } => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "ok": false, "error": "no renderer available", "attempts": attempts })
                );
            } else {
                for a in &attempts {
                    eprintln!(
                        "  {} {:<12} {}",
                        red("✗"),
                        a.method,
                        dim(a.diagnostic.as_deref().unwrap_or(""))
                    );
                }
            }
            bail!("No renderer available on this host");
        }
    }
}

async fn export_cmd(cli: &Cli, app: &Planmark, args: &ExportArgs, show_progress: bool) -> Result<()> {
    let request = ExportRequest {
        include_pin: !args.no_pin,
        debug: args.debug,
        issue_id: args.issue_id,
        allow_remote: Some(cli.allow_remote),
        ..ExportRequest::new(args.plan_id)
    };
    let mut assembler = ReportAssembler::new(app);
    if show_progress {
        assembler = assembler.with_progress(CliExportProgress::new());
    }
    let summary = assembler.export(&request).await.context("Export failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Wrote {} ({} bytes, {}/{} pins)",
            summary.path.display(),
            summary.size,
            summary.pins_included,
            summary.sections
        );
    }
    Ok(())
}

async fn crop_cmd(cli: &Cli, config: PlanmarkConfig, args: &CropArgs) -> Result<()> {
    let path = match (&args.file, args.plan_id) {
        (Some(file), _) => file.clone(),
        (None, Some(plan_id)) => {
            let app = build_app(cli, config).await?;
            let plan = app.plan(plan_id).await.context("Plan lookup failed")?;
            app.plan_file(&plan).context("Plan file unavailable")?
        }
        (None, None) => bail!("either --file or --plan-id is required"),
    };
    for (name, v) in [("x", args.x), ("y", args.y), ("w", args.w), ("h", args.h)] {
        if !v.is_finite() {
            bail!("--{name} must be a finite number");
        }
    }
    let rect = NormRect::new(args.x, args.y, args.w, args.h);
    let page = args.page;
    let output = tokio::task::spawn_blocking(move || crop_page(CropSource::Path(&path), page, rect))
        .await
        .context("Crop task panicked")?
        .context("Crop failed")?;

    tokio::fs::write(&args.output, &output.pdf)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "path": args.output,
                "page": output.page,
                "crop_box": output.crop_box,
            })
        );
    } else if !cli.quiet {
        eprintln!(
            "{} {}  {}",
            green("✔"),
            bold(&args.output.display().to_string()),
            dim(&format!("crop box {:?}", output.crop_box))
        );
    }
    Ok(())
}
