//! CLI binary for pdfsmith.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::builder::TypedValueParser as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pdfsmith::pipeline::input::resolve_input;
use pdfsmith::{
    compile_markup_chain, rasterize, rasterize_to_dir, Backend, CompilationAttempt,
    CompileRequest, ConversionConfig, FailureRecord, PageError, PipelineObserver, RasterResponse,
    DEFAULT_DPI, DEFAULT_MAX_PAGES,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner plus one log line per compiler pass or rendered page.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(prefix: &str) -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix(prefix.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_attempt_start(&self, backend: Backend, pass_number: u32) {
        self.bar.set_message(format!("{backend} pass {pass_number}"));
    }

    fn on_attempt_complete(&self, attempt: &CompilationAttempt) {
        let mark = if attempt.succeeded() { green("✓") } else { red("✗") };
        let status = match attempt.exit_status {
            Some(code) => format!("exit {code}"),
            None => "killed".to_string(),
        };
        self.bar.println(format!(
            "  {} {} pass {}  {}  {}",
            mark,
            attempt.backend,
            attempt.pass_number,
            dim(&status),
            dim(&format!("{:.1}s", attempt.duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_page_rendered(&self, index: usize, encoded_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            green("✓"),
            index,
            dim(&format!("{:>7} bytes", encoded_len)),
        ));
    }

    fn on_page_skipped(&self, error: &PageError) {
        self.bar
            .println(format!("  {} {}", red("✗"), red(&error.to_string())));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compile with pdfLaTeX
  pdfsmith compile resume.tex -o resume.pdf

  # Tectonic first, pdfLaTeX if that fails
  pdfsmith compile --backend auto resume.tex

  # Render the first three pages to page-N.jpg
  pdfsmith rasterize paper.pdf --out-dir pages/

  # JSON envelope with base64 pages
  pdfsmith rasterize https://arxiv.org/pdf/1706.03762 --json > pages.json

  # Pre-fetch Tectonic and PDFium
  pdfsmith provision

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips auto-download
  TOOLCACHE_DIR           Override the download cache directory
  RUST_LOG                Log filter, e.g. pdfsmith=debug

PROVISIONING:
  Tectonic and PDFium are downloaded on first use and cached in
  ~/.cache/pdfsmith/. pdfLaTeX must come from a TeX distribution.
"#;

/// Compile LaTeX to PDF and rasterize PDFs to JPEG.
#[derive(Parser, Debug)]
#[command(
    name = "pdfsmith",
    version,
    about = "Compile LaTeX to PDF and rasterize PDFs to JPEG",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFSMITH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFSMITH_QUIET")]
    quiet: bool,

    /// Parent directory for per-request scratch directories.
    #[arg(long, global = true, env = "PDFSMITH_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// pdfLaTeX executable.
    #[arg(long, global = true, env = "PDFSMITH_PDFLATEX")]
    pdflatex: Option<PathBuf>,

    /// Directory searched for TeX binaries (repeatable).
    #[arg(long = "tex-path", global = true, env = "PDFSMITH_TEX_PATH", value_delimiter = ':')]
    tex_paths: Vec<PathBuf>,

    /// Extra TEXINPUTS directory (repeatable).
    #[arg(long = "tex-input", global = true, env = "PDFSMITH_TEX_INPUTS", value_delimiter = ':')]
    tex_inputs: Vec<PathBuf>,

    /// Pre-installed Tectonic executable; disables the download.
    #[arg(long, global = true, env = "PDFSMITH_TECTONIC")]
    tectonic: Option<PathBuf>,

    /// libpdfium to bind instead of the cached download.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "PDFSMITH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a .tex file or URL to PDF.
    Compile(CompileArgs),
    /// Render the first pages of a PDF to JPEG.
    Rasterize(RasterizeArgs),
    /// Download Tectonic and PDFium into the cache.
    Provision,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Local .tex file path or HTTP/HTTPS URL.
    input: String,

    /// Write the PDF here instead of `<input stem>.pdf`.
    #[arg(short, long, env = "PDFSMITH_OUTPUT")]
    output: Option<PathBuf>,

    /// Compiler to use.
    #[arg(long, env = "PDFSMITH_BACKEND", value_enum, default_value = "primary")]
    backend: BackendArg,

    /// Per-process time budget in seconds.
    #[arg(long, env = "PDFSMITH_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Print a JSON summary (PDF base64-encoded) instead of writing a file.
    #[arg(long, env = "PDFSMITH_JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct RasterizeArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Pages to render, counted from the first.
    #[arg(long, env = "PDFSMITH_MAX_PAGES", default_value_t = DEFAULT_MAX_PAGES,
          value_parser = clap::value_parser!(u64).range(1..=1000).map(|v| v as usize))]
    max_pages: usize,

    /// Rendering DPI (36–600).
    #[arg(long, env = "PDFSMITH_DPI", default_value_t = DEFAULT_DPI,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi: u32,

    /// Directory for page-N.jpg files.
    #[arg(long, env = "PDFSMITH_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// JPEG quality (1–100).
    #[arg(long, env = "PDFSMITH_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Print the JSON envelope instead of writing files.
    #[arg(long, env = "PDFSMITH_JSON")]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    /// pdfLaTeX, two passes.
    Primary,
    /// Tectonic, downloaded on first use.
    Fallback,
    /// Tectonic, then pdfLaTeX.
    Auto,
}

impl BackendArg {
    fn chain(self) -> &'static [Backend] {
        match self {
            BackendArg::Primary => &[Backend::Primary],
            BackendArg::Fallback => &[Backend::Fallback],
            BackendArg::Auto => &[Backend::Fallback, Backend::Primary],
        }
    }
}

/// JSON printed by `compile --json`.
#[derive(Serialize)]
struct CompileSummary<'a> {
    success: bool,
    output_name: &'a str,
    backend: Backend,
    size: usize,
    corrections: Vec<&'a str>,
    pdf: String,
}

/// JSON printed for any failure under `--json`.
#[derive(Serialize)]
struct FailureSummary<'a> {
    success: bool,
    status: u16,
    #[serde(flatten)]
    failure: &'a FailureRecord,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO lines would tear through the spinner; keep them for plain runs.
    let filter = log_filter(&cli);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Compile(args) => run_compile(&cli.global, args).await,
        Command::Rasterize(args) => run_rasterize(&cli.global, args).await,
        Command::Provision => run_provision(&cli.global).await,
    }
}

/// Default tracing filter when `RUST_LOG` is unset.
fn log_filter(cli: &Cli) -> &'static str {
    let json = match &cli.command {
        Command::Compile(args) => args.json,
        Command::Rasterize(args) => args.json,
        Command::Provision => false,
    };
    if cli.global.verbose {
        "debug"
    } else if cli.global.quiet {
        "error"
    } else if json {
        "info"
    } else {
        "warn"
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(
    global: &GlobalArgs,
    observer: Option<Arc<dyn PipelineObserver>>,
    tune: impl FnOnce(pdfsmith::ConversionConfigBuilder) -> pdfsmith::ConversionConfigBuilder,
) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder().download_timeout_secs(global.download_timeout);

    if let Some(dir) = &global.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    if let Some(p) = &global.pdflatex {
        builder = builder.pdflatex(p);
    }
    for dir in &global.tex_paths {
        builder = builder.search_path(dir);
    }
    for dir in &global.tex_inputs {
        builder = builder.tex_input(dir);
    }
    if let Some(p) = &global.tectonic {
        builder = builder.tectonic(p);
    }
    if let Some(p) = &global.pdfium_lib {
        builder = builder.pdfium_library(p);
    }
    if let Some(o) = observer {
        builder = builder.observer(o);
    }

    tune(builder).build().context("Invalid configuration")
}

fn print_failure_json(failure: &FailureRecord) -> Result<()> {
    let summary = FailureSummary {
        success: false,
        status: failure.http_status(),
        failure,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialise failure")?
    );
    Ok(())
}

fn default_output_path(input: &str) -> PathBuf {
    let stem = input
        .rsplit(['/', '\\'])
        .next()
        .map(|name| name.strip_suffix(".tex").unwrap_or(name))
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    PathBuf::from(format!("{stem}.pdf"))
}

async fn run_compile(global: &GlobalArgs, args: &CompileArgs) -> Result<()> {
    let show_progress = !global.quiet && !args.json;
    let observer = show_progress.then(|| CliObserver::new("Compiling"));

    let config = build_config(
        global,
        observer.clone().map(|o| o as Arc<dyn PipelineObserver>),
        |b| b.compile_timeout_secs(args.timeout),
    )?;

    let resolved = resolve_input(&args.input, global.download_timeout)
        .await
        .with_context(|| format!("Failed to read {}", args.input))?;
    let source = String::from_utf8(resolved.bytes).context("Input is not UTF-8 text")?;

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    let output_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let request = CompileRequest::new(source, output_name);

    let result = compile_markup_chain(&request, args.backend.chain(), &config).await;
    if let Some(o) = &observer {
        o.finish();
    }

    let doc = match result {
        Ok(doc) => doc,
        Err(failure) => {
            if args.json {
                print_failure_json(&failure)?;
            } else if let Some(excerpt) = &failure.diagnostic_excerpt {
                eprintln!("{}", dim(excerpt));
            }
            return Err(failure).context("Compilation failed");
        }
    };

    if args.json {
        let summary = CompileSummary {
            success: true,
            output_name: &doc.output_name,
            backend: doc.backend,
            size: doc.size,
            corrections: doc.corrections.iter().map(|c| c.description.as_str()).collect(),
            pdf: doc.to_base64(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise output")?
        );
        return Ok(());
    }

    pdfsmith::convert::write_atomic(&output_path, &doc.bytes)
        .await
        .context("Failed to write PDF")?;

    if !global.quiet {
        for fix in &doc.corrections {
            eprintln!("  {} {}", cyan("⚙"), fix);
        }
        eprintln!(
            "{}  {} via {}  {}  →  {}",
            green("✔"),
            dim(&format!("{} bytes", doc.size)),
            doc.backend,
            dim(&format!("{} pass(es)", doc.attempts.len())),
            bold(&output_path.display().to_string()),
        );
    }
    Ok(())
}

async fn run_rasterize(global: &GlobalArgs, args: &RasterizeArgs) -> Result<()> {
    let show_progress = !global.quiet && !args.json;
    let observer = show_progress.then(|| CliObserver::new("Rendering"));

    let config = build_config(
        global,
        observer.clone().map(|o| o as Arc<dyn PipelineObserver>),
        |b| b.jpeg_quality(args.quality),
    )?;

    let resolved = resolve_input(&args.input, global.download_timeout)
        .await
        .with_context(|| format!("Failed to read {}", args.input))?;

    if args.json {
        let result = rasterize(resolved.bytes, args.max_pages, args.dpi, &config).await;
        if let Some(o) = &observer {
            o.finish();
        }
        match result {
            Ok(output) => {
                let response = RasterResponse::from_output(&output, Some(resolved.file_name));
                println!(
                    "{}",
                    serde_json::to_string_pretty(&response).context("Failed to serialise output")?
                );
                Ok(())
            }
            Err(failure) => {
                print_failure_json(&failure)?;
                Err(failure).context("Rasterization failed")
            }
        }
    } else {
        let result =
            rasterize_to_dir(resolved.bytes, args.max_pages, args.dpi, &args.out_dir, &config).await;
        if let Some(o) = &observer {
            o.finish();
        }
        let (output, written) = result.context("Rasterization failed")?;

        if !global.quiet {
            eprintln!(
                "{}  {}/{} page(s)  {}ms  →  {}",
                if output.skipped_pages.is_empty() {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                written.len(),
                output.document_pages.min(args.max_pages),
                output.duration_ms,
                bold(&args.out_dir.display().to_string()),
            );
        }
        Ok(())
    }
}

fn download_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix(prefix.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn progress_into(bar: &ProgressBar) -> impl Fn(u64, Option<u64>) + '_ {
    move |downloaded, total| {
        if let Some(t) = total {
            if bar.length().unwrap_or(0) != t {
                bar.set_length(t);
            }
        }
        bar.set_position(downloaded);
    }
}

async fn run_provision(global: &GlobalArgs) -> Result<()> {
    let config = build_config(global, None, |b| b)?;
    let toolchain = config.toolchain();

    // ── Tectonic ─────────────────────────────────────────────────────────
    let tectonic = match &toolchain.tectonic {
        Some(path) => path.clone(),
        None => fetch("Tectonic", global.quiet, |cb| {
            toolcache::tectonic::ensure_tectonic(&toolchain.tool_cache_dir, cb)
        })
        .context("Failed to download Tectonic")?,
    };

    // ── PDFium ───────────────────────────────────────────────────────────
    let pdfium = match &toolchain.pdfium_library {
        Some(path) => path.clone(),
        None => fetch("PDF engine", global.quiet, |cb| {
            toolcache::pdfium::ensure_pdfium_library_in(&toolchain.tool_cache_dir, cb)
        })
        .context("Failed to download PDFium engine")?,
    };

    if !global.quiet {
        report_ready("tectonic", &tectonic);
        report_ready("pdfium", &pdfium);
    }
    Ok(())
}

/// Run a blocking download, with a progress bar unless `quiet`.
fn fetch<F>(prefix: &str, quiet: bool, download: F) -> Result<PathBuf, toolcache::ToolcacheError>
where
    F: FnOnce(Option<toolcache::ProgressFn<'_>>) -> Result<PathBuf, toolcache::ToolcacheError>,
{
    if quiet {
        return tokio::task::block_in_place(|| download(None));
    }

    let bar = download_bar(prefix);
    let on_progress = progress_into(&bar);
    // The callback borrows `bar`, so this cannot move to spawn_blocking.
    let result = tokio::task::block_in_place(|| download(Some(&on_progress)));
    match &result {
        Ok(_) => bar.finish_with_message("ready ✓"),
        Err(_) => bar.abandon(),
    }
    result
}

fn report_ready(tool: &str, path: &Path) {
    eprintln!("{}  {:<9} {}", green("✔"), tool, dim(&path.display().to_string()));
}
