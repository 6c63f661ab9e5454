//! CLI binary for takeoff-parser.
//!
//! A thin shim over the library crate that layers CLI flags over
//! `ParsingConfig::from_env()` and prints the result as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use takeoff_parser::{
    inspect, parse_document, DocumentMetrics, ParseProgressCallback, ParsingConfig,
    ProgressCallback, StrategySelector,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while analyzing and between strategies; a tile bar while the
/// tiling strategy runs its detail pass.
struct CliProgressCallback {
    bar: ProgressBar,
    failed_tiles: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_prefix("Analyzing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failed_tiles: AtomicUsize::new(0),
        })
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_analysis_complete(&self, m: &DocumentMetrics) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{} pages, {:.1} MB", m.page_count, m.file_size_mb)),
            dim(&format!(
                "dpi={} scanned={} complexity={:.2}",
                m.average_dpi.map_or("?".to_string(), |d| d.to_string()),
                m.is_scanned,
                m.complexity_score
            )),
        ));
    }

    fn on_strategy_start(&self, name: &str, index: usize, chain_len: usize) {
        self.bar.set_style(spinner_style());
        self.bar.set_prefix(format!("{index}/{chain_len}"));
        self.bar.set_message(name.to_string());
    }

    fn on_strategy_failed(&self, name: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), name, red(&msg)));
    }

    fn on_tiles_planned(&self, total_tiles: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} tiles  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_tiles as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Tiling");
        self.bar.reset_eta();
    }

    fn on_tile_complete(&self, page: usize, tile_number: usize, total_tiles: usize, ok: bool) {
        if !ok {
            self.failed_tiles.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} page {} tile {}/{} omitted",
                red("✗"),
                page,
                tile_number + 1,
                total_tiles
            ));
        }
        self.bar.inc(1);
    }

    fn on_parse_complete(&self, success: bool, strategy: Option<&str>) {
        self.bar.finish_and_clear();
        let failed = self.failed_tiles.load(Ordering::SeqCst);
        match (success, strategy) {
            (true, Some(name)) if failed > 0 => {
                eprintln!("{} parsed with {}  ({} tiles omitted)", cyan("⚠"), bold(name), failed)
            }
            (true, Some(name)) => eprintln!("{} parsed with {}", green("✔"), bold(name)),
            _ => eprintln!("{} all strategies failed", red("✘")),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse the first 5 pages, print JSON
  takeoff plans.pdf

  # Parse 3 pages to a file
  takeoff plans.pdf --max-pages 3 -o takeoff.json

  # Download from a bid portal
  takeoff https://bids.example.com/project/plans.pdf

  # Profile the document only (no API key needed)
  takeoff --inspect-only plans.pdf

  # Skip the native strategy, tile harder
  takeoff --no-openai --detail-dpi 250 --concurrency 8 plans.pdf

STRATEGIES (tried in this order when available and capable):
  1  OpenAI Native   whole PDF in one request; < 50 MB, ≤ 10 pages, < 300 DPI
  3  Claude Tiling   coarse ROI scan, detail tiles, fuzzy dedup; any document
  4  Tesseract OCR   local OCR, heuristic bid items; always last

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY        Enables Claude tiling
  OPENAI_API_KEY           Enables OpenAI native parsing
  ENABLE_*_PARSING         ENABLE_OPENAI_PARSING / ENABLE_CLAUDE_PARSING / ENABLE_TESSERACT_PARSING
  CLAUDE_MODEL             Default: claude-sonnet-4-5-20250929
  OPENAI_MODEL             Default: gpt-4o
  PDFIUM_LIB_PATH          Path to libpdfium (otherwise the system library)
  TESSERACT_LANG           Tesseract languages (default: eng; needs the tesseract feature)
"#;

/// Extract bid items and materials from construction-plan PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "takeoff",
    version,
    about = "Extract bid items and materials from construction-plan PDFs",
    long_about = "Parse construction-plan PDFs (local files or URLs) into structured takeoff data: \
bid items, specifications, project information and materials. Tries OpenAI native PDF input, \
then tiled Claude vision, then local Tesseract OCR.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the result JSON to this file instead of stdout.
    #[arg(short, long, env = "TAKEOFF_OUTPUT")]
    output: Option<PathBuf>,

    /// Maximum pages to process (default: DEFAULT_MAX_PAGES or 5).
    #[arg(long, env = "TAKEOFF_MAX_PAGES")]
    max_pages: Option<usize>,

    /// Print document metrics only, no parsing.
    #[arg(long)]
    inspect_only: bool,

    /// Print the strategy table and exit.
    #[arg(long)]
    list_strategies: bool,

    /// Disable the OpenAI native strategy.
    #[arg(long)]
    no_openai: bool,

    /// Disable the Claude tiling strategy.
    #[arg(long)]
    no_claude: bool,

    /// Disable the Tesseract OCR strategy.
    #[arg(long)]
    no_ocr: bool,

    /// Coarse-scan DPI for ROI detection.
    #[arg(long, value_parser = clap::value_parser!(u32).range(36..=300))]
    coarse_dpi: Option<u32>,

    /// Detail-pass DPI for tiles.
    #[arg(long, value_parser = clap::value_parser!(u32).range(72..=600))]
    detail_dpi: Option<u32>,

    /// Maximum concurrent tile requests.
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Fuzzy dedup threshold (0–100).
    #[arg(long)]
    fuzzy_threshold: Option<f64>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "TAKEOFF_PASSWORD")]
    password: Option<String>,

    /// Disable the progress display.
    #[arg(long, env = "TAKEOFF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TAKEOFF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TAKEOFF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only && !cli.list_strategies;
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ParseProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── List / inspect modes ─────────────────────────────────────────────
    if cli.list_strategies {
        let info = StrategySelector::new(&config).strategy_info();
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise strategy info")?
        );
        return Ok(());
    }

    if cli.inspect_only {
        let metrics = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&metrics).context("Failed to serialise metrics")?
        );
        return Ok(());
    }

    // ── Parse ────────────────────────────────────────────────────────────
    let result = parse_document(&cli.input, cli.max_pages, &config)
        .await
        .context("Parsing failed")?;

    if let Some(ref path) = cli.output {
        result
            .write_json(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!(
                "{}  confidence {:.2}  {}ms  →  {}",
                if result.success { green("✔") } else { red("✘") },
                result.confidence_score,
                result.processing_time_ms,
                bold(&path.display().to_string()),
            );
        }
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Layer CLI flags over the environment configuration.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParsingConfig> {
    let env = ParsingConfig::from_env();
    let mut builder = env
        .clone()
        .into_builder()
        .enable_openai_parsing(env.enable_openai_parsing && !cli.no_openai)
        .enable_claude_parsing(env.enable_claude_parsing && !cli.no_claude)
        .enable_tesseract_parsing(env.enable_tesseract_parsing && !cli.no_ocr);

    if let Some(dpi) = cli.coarse_dpi {
        builder = builder.coarse_scan_dpi(dpi);
    }
    if let Some(dpi) = cli.detail_dpi {
        builder = builder.detail_scan_dpi(dpi);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.max_concurrent_tiles(n);
    }
    if let Some(t) = cli.fuzzy_threshold {
        builder = builder.fuzzy_match_threshold(t);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
