//! CLI binary for edgequake-pdfocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig` and either runs the HTTP service or a one-shot command.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdfocr::server::{self, AppState, DEFAULT_MAX_UPLOAD_BYTES};
use edgequake_pdfocr::{
    Coordinator, Document, FsResultStore, IngestConfig, IngestProgressCallback, PageState,
    PdfiumRasterizer, PipelineRun, ProgressCallback, Rasterizer, ResultStore, TempBlobStore,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages finish out
/// of order, so per-page timers are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running OCR on {total_pages} pages…"))
        ));
    }

    fn on_page_state(&self, index: usize, state: PageState) {
        match state {
            PageState::Rasterized => {
                if let Ok(mut t) = self.start_times.lock() {
                    t.insert(index, Instant::now());
                }
            }
            PageState::OcrPolling => self.bar.set_message(format!("polling page {}", index + 1)),
            _ => {}
        }
    }

    fn on_page_complete(&self, index: usize, total: usize, regions: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{regions:>4} regions")),
            dim(&format!("{:.1}s", self.elapsed_secs(index))),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, index: usize, total: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs(index))),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, succeeded: usize) {
        let failed = total_pages.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages recognised",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages recognised  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  pdfocr serve --addr 0.0.0.0:3000

  # OCR every page of a PDF and print the text
  pdfocr ingest invoice.pdf

  # Full per-page JSON (status, bounding boxes, failures)
  pdfocr ingest invoice.pdf --json -o invoice.json

  # Only rasterise pages to PNG
  pdfocr rasterize invoice.pdf -o pages/

  # Print a stored page result
  pdfocr show invoice_page_2 --text

ENVIRONMENT VARIABLES:
  AZURE_COMPUTER_VISION_ENDPOINT          OCR resource base URL
  AZURE_COMPUTER_VISION_SUBSCRIPTION_KEY  OCR subscription key
  PDFOCR_SCALE                            Rasterisation scale (default 3)
  PDFOCR_CONCURRENCY                      Pages in flight (default 4)
  PDFOCR_POLL_INTERVAL_MS                 Delay between polls (default 1000)
  PDFOCR_MAX_POLL_ATTEMPTS                Polls before timeout (default 60)
  PDFOCR_POLL_RETRIES                     Poll transport retries (default 3)
  PDFOCR_RESULTS_DIR                      Result store directory (default ./json)
  PDFIUM_LIB_PATH                         Directory containing libpdfium
  PDFOCR_ADDR                             Listen address for `serve`
  PDFOCR_MAX_UPLOAD_BYTES                 Request body limit for `serve`

  A `.env` file in the working directory is loaded first.
"#;

/// Rasterise PDFs and run asynchronous OCR on every page.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Rasterise PDFs and run asynchronous OCR on every page",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFOCR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload, OCR and result endpoints over HTTP.
    Serve {
        /// Listen address.
        #[arg(long, env = "PDFOCR_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        /// Maximum request body size in bytes.
        #[arg(long, env = "PDFOCR_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
        max_upload_bytes: usize,

        #[command(flatten)]
        render: RenderArgs,

        #[command(flatten)]
        ocr: OcrArgs,
    },

    /// Rasterise a PDF, OCR every page and store the results.
    Ingest {
        /// PDF file to process.
        input: PathBuf,

        /// Print the full run as JSON instead of page text.
        #[arg(long)]
        json: bool,

        /// Write output to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable the progress bar.
        #[arg(long, env = "PDFOCR_NO_PROGRESS")]
        no_progress: bool,

        #[command(flatten)]
        render: RenderArgs,

        #[command(flatten)]
        ocr: OcrArgs,
    },

    /// Rasterise a PDF to `<name>_page_<n>.png` files without OCR.
    Rasterize {
        /// PDF file to rasterise.
        input: PathBuf,

        /// Output directory.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Print a stored page result.
    Show {
        /// Image identifier, e.g. `invoice_page_1`.
        image_id: String,

        /// Print only the recognised text.
        #[arg(long)]
        text: bool,

        /// Result store directory.
        #[arg(long, env = "PDFOCR_RESULTS_DIR", default_value = "json")]
        results_dir: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    /// Rasterisation scale factor (0 < scale <= 10).
    #[arg(long, env = "PDFOCR_SCALE", default_value_t = 3.0)]
    scale: f32,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct OcrArgs {
    /// OCR backend base URL.
    #[arg(long, env = "AZURE_COMPUTER_VISION_ENDPOINT")]
    endpoint: Option<String>,

    /// OCR subscription key.
    #[arg(long, env = "AZURE_COMPUTER_VISION_SUBSCRIPTION_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Pages whose OCR operation may be in flight at once.
    #[arg(short, long, env = "PDFOCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Delay between polls in milliseconds.
    #[arg(long, env = "PDFOCR_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Polls before a page times out.
    #[arg(long, env = "PDFOCR_MAX_POLL_ATTEMPTS", default_value_t = 60)]
    max_poll_attempts: u32,

    /// Consecutive poll transport failures tolerated.
    #[arg(long, env = "PDFOCR_POLL_RETRIES", default_value_t = 3)]
    poll_retries: u32,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "PDFOCR_HTTP_TIMEOUT", default_value_t = 30)]
    http_timeout: u64,

    /// Result store directory.
    #[arg(long, env = "PDFOCR_RESULTS_DIR", default_value = "json")]
    results_dir: PathBuf,

    /// Always call the OCR backend, even when a stored result exists.
    #[arg(long)]
    no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for `ingest`.
    let show_progress = match &cli.command {
        Command::Ingest {
            json, no_progress, ..
        } => !cli.quiet && !*no_progress && !*json,
        _ => false,
    };
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

    match cli.command {
        Command::Serve {
            addr,
            max_upload_bytes,
            render,
            ocr,
        } => {
            let config = build_config(&render, &ocr, None)?;
            let coordinator =
                Coordinator::from_config(config).context("Failed to configure pipeline")?;
            server::serve(addr, AppState::new(coordinator), max_upload_bytes)
                .await
                .context("Server failed")?;
        }

        Command::Ingest {
            input,
            json,
            output,
            render,
            ocr,
            ..
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new_dynamic() as Arc<dyn IngestProgressCallback>)
            } else {
                None
            };
            let config = build_config(&render, &ocr, progress)?;
            let coordinator =
                Coordinator::from_config(config).context("Failed to configure pipeline")?;
            let doc = read_document(&input).await?;

            let run = coordinator.run(&doc).await.context("OCR run failed")?;

            let rendered = if json {
                serde_json::to_string_pretty(&run).context("Failed to serialise run")?
            } else {
                render_text(&run)
            };
            match output {
                Some(path) => write_atomic(&path, rendered.as_bytes()).await?,
                None => println!("{rendered}"),
            }

            if !cli.quiet && !show_progress {
                eprintln!(
                    "Recognised {}/{} pages in {}ms ({} cached)",
                    run.stats.succeeded_pages,
                    run.page_count,
                    run.stats.total_duration_ms,
                    run.stats.cached_pages
                );
                for (index, error) in run.failures() {
                    eprintln!("  {} page {}: {}", red("✗"), index + 1, error);
                }
            }
        }

        Command::Rasterize {
            input,
            output,
            render,
        } => {
            let doc = read_document(&input).await?;
            let written = rasterize_to_dir(&doc, &render, &output).await?;
            if !cli.quiet {
                eprintln!(
                    "{} {} pages → {}",
                    green("✔"),
                    written,
                    bold(&output.display().to_string())
                );
            }
        }

        Command::Show {
            image_id,
            text,
            results_dir,
        } => {
            let store = FsResultStore::new(&results_dir);
            let result = store
                .get(&image_id)
                .await
                .with_context(|| format!("Failed to load '{}'", image_id))?;
            if text {
                println!("{}", result.text());
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(
    render: &RenderArgs,
    ocr: &OcrArgs,
    progress: Option<ProgressCallback>,
) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .scale(render.scale)
        .concurrency(ocr.concurrency)
        .poll_interval(Duration::from_millis(ocr.poll_interval_ms))
        .max_poll_attempts(ocr.max_poll_attempts)
        .poll_transport_retries(ocr.poll_retries)
        .http_timeout_secs(ocr.http_timeout)
        .reuse_cached_results(!ocr.no_cache)
        .results_dir(&ocr.results_dir);

    if let Some(ref endpoint) = ocr.endpoint {
        builder = builder.ocr_endpoint(endpoint);
    }
    if let Some(ref key) = ocr.key {
        builder = builder.ocr_api_key(key);
    }
    if let Some(ref dir) = render.pdfium_lib_path {
        builder = builder.pdfium_library_path(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_document(path: &Path) -> Result<Document> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Document::named(&file_name, bytes))
}

async fn rasterize_to_dir(doc: &Document, render: &RenderArgs, dir: &Path) -> Result<usize> {
    anyhow::ensure!(
        render.scale.is_finite() && render.scale > 0.0 && render.scale <= 10.0,
        "Scale must be in (0, 10], got {}",
        render.scale
    );
    let mut rasterizer = PdfiumRasterizer::new(TempBlobStore::new());
    if let Some(ref lib) = render.pdfium_lib_path {
        rasterizer = rasterizer.with_library_path(lib);
    }

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let pages = rasterizer
        .rasterize(doc.bytes(), render.scale)
        .await
        .context("Failed to open PDF")?;
    let mut stream = pages.into_stream();
    let mut written = 0;
    while let Some(page) = stream.next().await {
        let page = page.context("Page rasterisation failed")?;
        let path = dir.join(format!("{}.png", doc.image_id(page.index)));
        tokio::fs::write(&path, &page.png)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}

/// Human-readable page dump.
fn render_text(run: &PipelineRun) -> String {
    let mut out = String::new();
    for page in &run.pages {
        let id = page
            .image
            .as_ref()
            .map(|i| i.image_id.clone())
            .unwrap_or_else(|| format!("{}_page_{}", run.document_name, page.index + 1));
        match (&page.result, &page.error) {
            (Some(result), _) => {
                out.push_str(&format!(
                    "── {} ({} regions{}) ──\n",
                    id,
                    result.regions.len(),
                    if page.cached { ", cached" } else { "" }
                ));
                out.push_str(&result.text());
                out.push('\n');
            }
            (None, Some(error)) => {
                out.push_str(&format!("── {} (failed) ──\n{}\n", id, error));
            }
            (None, None) => {}
        }
    }
    out
}

/// Write via temp file + rename so a reader never sees a partial file.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output to {}", path.display()))?;
    Ok(())
}
