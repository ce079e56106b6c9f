//! CLI binary for hybrid-pdf2md.
//!
//! A thin shim over the library crate that maps CLI flags (and an optional
//! TOML file) to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use hybrid_pdf2md::{
    inspect, write_markdown, BackendSpec, CancellationToken, ConfigFile, ConversionConfig,
    ConversionConfigBuilder, ConversionOutcome, ConversionProgressCallback, ConversionResult,
    Converter, MergePolicy, PageSelection, PageSeparator, ProgressCallback, UnitErrorPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished unit. Units finish out
/// of order, so start times are keyed by unit id.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the unit count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, unit_id: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(unit_id))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_units: usize) {
        self.activate_bar(total_units);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total_units} units…"))
        ));
    }

    fn on_unit_start(&self, unit_id: &str, _position: usize, _total_units: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(unit_id.to_string(), Instant::now());
        }
        self.bar.set_message(unit_id.to_string());
    }

    fn on_unit_complete(
        &self,
        unit_id: &str,
        position: usize,
        total_units: usize,
        backend: &str,
        content_len: usize,
    ) {
        let elapsed = self.elapsed_secs(unit_id);
        self.bar.println(format!(
            "  {} {:<10} {:>3}/{:<3}  {:<8}  {}  {}",
            green("✓"),
            unit_id,
            position,
            total_units,
            dim(&format!("{content_len:>5} chars")),
            cyan(backend),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, unit_id: &str, position: usize, total_units: usize, error: &str) {
        let elapsed = self.elapsed_secs(unit_id);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep one line per unit.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<10} {:>3}/{:<3}  {}  {}",
            red("✗"),
            unit_id,
            position,
            total_units,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_units: usize, success_count: usize) {
        let failed = total_units.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} units converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} units converted  ({} not converted, {} errors)",
                if success_count == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_units,
                red(&failed.to_string()),
                self.errors.load(Ordering::SeqCst),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout), backend auto-detected from API keys
  hybrid-pdf2md document.pdf

  # Two backends, the second takes over when the first fails
  hybrid-pdf2md --backend fast=openai:gpt-4.1-nano \
                --backend careful=anthropic:claude-sonnet-4-20250514 \
                --priority fast,careful document.pdf -o out.md

  # Ask both backends for every page and keep the majority answer
  hybrid-pdf2md --backend a=openai:gpt-4.1-mini --backend b=gemini:gemini-2.0-flash \
                --page-candidates 2 --merge vote document.pdf

  # Layout blocks routed by a TOML file (routing rules, merge policy, …)
  hybrid-pdf2md --config hybrid.toml --blocks paper.pdf -o paper.md

  # Abort on the first page that cannot be converted
  hybrid-pdf2md --on-error raise document.pdf

  # Inspect PDF metadata (no API key needed)
  hybrid-pdf2md --inspect-only document.pdf

  # JSON report with per-unit status
  hybrid-pdf2md --json document.pdf > report.json

CONFIG FILE (--config):
  max_workers = 4
  backend_priority = ["fast", "careful"]
  on_unit_error = "placeholder"     # skip | placeholder | raise

  [[backends]]
  name = "fast"
  provider = "openai"
  model = "gpt-4.1-nano"

  [merge_policy]
  policy = "vote"                   # prefer_first | prefer_backend | vote | llm_arbitrate
  threshold = 0.9

  [[routing_rules]]
  block_type = "table"
  backends = ["careful"]
  use_specialized_operation = true

  Command-line flags override values from the file.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider of the auto-detected backend
  EDGEQUAKE_MODEL         Model of the auto-detected backend
  RUST_LOG                Overrides the log filter

Ctrl-C stops outstanding backend calls; units already converted are still
written, the rest are reported as cancelled.
"#;

/// Convert PDF files and URLs to Markdown using several OCR / VLM backends.
#[derive(Parser, Debug)]
#[command(
    name = "hybrid-pdf2md",
    version,
    about = "Convert PDF files and URLs to Markdown using several OCR / VLM backends",
    long_about = "Convert PDF documents (local files or URLs) to Markdown by routing pages or \
layout blocks to one or more Vision Language Model backends, with retries, fallback between \
backends and merging of competing answers.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// TOML configuration file. Flags override its values.
    #[arg(long, env = "PDF2MD_CONFIG")]
    config: Option<PathBuf>,

    /// Backend as name=provider:model (repeatable).
    #[arg(long = "backend", value_name = "NAME=PROVIDER:MODEL")]
    backends: Vec<String>,

    /// Backend priority for the default route, e.g. fast,careful.
    #[arg(long, value_delimiter = ',', env = "PDF2MD_PRIORITY")]
    priority: Vec<String>,

    /// Units processed concurrently.
    #[arg(short, long, env = "PDF2MD_WORKERS")]
    workers: Option<usize>,

    /// Retries per backend call.
    #[arg(long, env = "PDF2MD_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// First retry delay in milliseconds.
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Upper bound on any retry delay in milliseconds.
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Per backend call timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT")]
    timeout: Option<u64>,

    /// What to do with a unit no backend could convert.
    #[arg(long, value_enum, env = "PDF2MD_ON_ERROR")]
    on_error: Option<OnErrorArg>,

    /// How competing candidates are merged.
    #[arg(long, value_enum)]
    merge: Option<MergeArg>,

    /// Backend preferred by `--merge prefer-backend`.
    #[arg(long, required_if_eq("merge", "prefer-backend"))]
    prefer: Option<String>,

    /// Arbiter backend for `--merge llm-arbitrate`.
    #[arg(long, required_if_eq("merge", "llm-arbitrate"))]
    arbiter: Option<String>,

    /// Similarity (0–1) at which two candidates count as the same answer.
    #[arg(long, default_value_t = 0.9)]
    vote_threshold: f64,

    /// Backends asked per page (1 = fallback chain only).
    #[arg(long)]
    page_candidates: Option<usize>,

    /// Segment pages into layout blocks and route each block.
    #[arg(long)]
    blocks: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2MD_PAGES")]
    pages: Option<String>,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDF2MD_SEPARATOR")]
    separator: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2MD_DPI", value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: Option<u32>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Prepend YAML front-matter with document metadata.
    #[arg(long, env = "PDF2MD_METADATA")]
    metadata: bool,

    /// Output the full JSON report instead of Markdown.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT")]
    download_timeout: Option<u64>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OnErrorArg {
    Skip,
    Placeholder,
    Raise,
}

impl From<OnErrorArg> for UnitErrorPolicy {
    fn from(v: OnErrorArg) -> Self {
        match v {
            OnErrorArg::Skip => UnitErrorPolicy::Skip,
            OnErrorArg::Placeholder => UnitErrorPolicy::Placeholder,
            OnErrorArg::Raise => UnitErrorPolicy::Raise,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
enum MergeArg {
    PreferFirst,
    PreferBackend,
    Vote,
    LlmArbitrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always shows everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input).await.context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let converter = Converter::from_config(config).context("Failed to set up backends")?;

    // ── Ctrl-C → cancel, keep what is done ───────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding backend calls");
            on_signal.cancel();
        }
    });

    // ── Run conversion ───────────────────────────────────────────────────
    let result = converter
        .convert(&cli.input, &cancel)
        .await
        .context("Conversion failed")?;

    if let Some(ref output_path) = cli.output {
        write_markdown(output_path, &result.content)
            .await
            .context("Failed to write output")?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(result.content.as_bytes())
            .context("Failed to write to stdout")?;
        if !result.content.is_empty() && !result.content.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !cli.json {
        print_summary(&result, cli.output.as_ref(), show_progress);
    }

    if result.cancelled {
        anyhow::bail!(
            "Conversion cancelled after {}/{} units",
            result.successful_units,
            result.total_units
        );
    }
    if result.outcome() == ConversionOutcome::Failed {
        result.into_result().context("Conversion failed")?;
    }
    Ok(())
}

fn print_summary(result: &ConversionResult, output: Option<&PathBuf>, show_progress: bool) {
    let summary = &result.summary;

    // The progress callback already printed the unit counts.
    if !show_progress {
        eprintln!(
            "Converted {}/{} units in {}ms",
            result.successful_units, result.total_units, summary.duration_ms
        );
        let not_converted = summary.placeholder_units + summary.skipped_units + summary.failed_units;
        if not_converted > 0 {
            eprintln!(
                "  {} placeholder, {} skipped, {} failed",
                summary.placeholder_units, summary.skipped_units, summary.failed_units
            );
        }
    }

    let usage: Vec<String> = summary
        .backend_usage
        .iter()
        .map(|(name, n)| format!("{name}×{n}"))
        .collect();
    if !usage.is_empty() {
        eprintln!("   backends: {}", dim(&usage.join("  ")));
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out  —  {}ms total",
        dim(&summary.total_input_tokens.to_string()),
        dim(&summary.total_output_tokens.to_string()),
        summary.duration_ms,
    );
    if let Some(path) = output {
        eprintln!("   →  {}", bold(&path.display().to_string()));
    }
}

/// Layer CLI flags over the optional config file.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder();
    if let Some(ref path) = cli.config {
        builder = ConfigFile::load(path)
            .context("Failed to load config file")?
            .apply(builder)
            .context("Invalid config file")?;
    }
    builder = apply_flags(cli, builder)?;

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn apply_flags(cli: &Cli, mut b: ConversionConfigBuilder) -> Result<ConversionConfigBuilder> {
    for shorthand in &cli.backends {
        let spec = BackendSpec::parse_shorthand(shorthand)
            .with_context(|| format!("Invalid --backend '{shorthand}'"))?;
        b = b.backend(spec);
    }
    if !cli.priority.is_empty() {
        b = b.backend_priority(cli.priority.iter().map(|s| s.trim().to_string()));
    }
    if let Some(n) = cli.workers {
        b = b.max_workers(n);
    }
    if let Some(n) = cli.max_retries {
        b = b.max_retries(n);
    }
    if let Some(ms) = cli.initial_delay_ms {
        b = b.initial_delay_ms(ms);
    }
    if let Some(ms) = cli.max_delay_ms {
        b = b.max_delay_ms(ms);
    }
    if let Some(secs) = cli.timeout {
        b = b.per_call_timeout_secs(secs);
    }
    if let Some(policy) = cli.on_error {
        b = b.on_unit_error(policy.into());
    }
    if let Some(merge) = cli.merge {
        b = b.merge_policy(merge_policy(cli, merge)?);
    }
    if let Some(n) = cli.page_candidates {
        b = b.page_candidates(n);
    }
    if cli.blocks {
        b = b.block_processing(true);
    }
    if let Some(ref pages) = cli.pages {
        b = b.pages(PageSelection::parse(pages).context("Invalid --pages")?);
    }
    if let Some(ref sep) = cli.separator {
        b = b.page_separator(PageSeparator::parse(sep));
    }
    if let Some(dpi) = cli.dpi {
        b = b.dpi(dpi);
    }
    if let Some(ref pwd) = cli.password {
        b = b.password(pwd.clone());
    }
    if cli.metadata {
        b = b.include_metadata(true);
    }
    if let Some(secs) = cli.download_timeout {
        b = b.download_timeout_secs(secs);
    }
    Ok(b)
}

fn merge_policy(cli: &Cli, merge: MergeArg) -> Result<MergePolicy> {
    Ok(match merge {
        MergeArg::PreferFirst => MergePolicy::PreferFirst,
        MergeArg::PreferBackend => MergePolicy::PreferBackend {
            backend: cli
                .prefer
                .clone()
                .context("--merge prefer-backend needs --prefer <name>")?,
        },
        MergeArg::Vote => MergePolicy::Vote {
            threshold: cli.vote_threshold,
        },
        MergeArg::LlmArbitrate => MergePolicy::LlmArbitrate {
            arbiter: cli
                .arbiter
                .clone()
                .context("--merge llm-arbitrate needs --arbiter <name>")?,
        },
    })
}
