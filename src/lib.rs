//! # hybrid-pdf2md
//!
//! Convert PDF documents to Markdown by orchestrating several OCR / Vision
//! Language Model backends.
//!
//! ## Why this crate?
//!
//! No single VLM is best at everything: one reads prose well, another gets
//! tables right, a third is the only one that survives a rate-limit storm.
//! This crate treats backends as interchangeable services and decides, per
//! page or per layout block, which of them to call, how to retry them, when
//! to fall back to the next one and how to reconcile their answers.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file, URL or bytes
//!  ├─ 2. Units     one per page, or one per layout block (segmenter)
//!  ├─ 3. Schedule  ≤ max_workers units in flight, results kept in order
//!  ├─ 4. Render    rasterise page/region via pdfium (spawn_blocking)
//!  ├─ 5. Route     block type → backends + generic/specialised operation
//!  ├─ 6. Call      retry with backoff, fall back across backends
//!  ├─ 7. Merge     prefer_first │ prefer_backend │ vote │ llm_arbitrate
//!  └─ 8. Assemble  Markdown with page separators + per-unit report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hybrid_pdf2md::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One backend auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ConversionConfig::default();
//!     let result = convert("document.pdf", &config).await?;
//!     println!("{}", result.content);
//!     eprintln!("{}/{} units converted", result.successful_units, result.total_units);
//!     Ok(())
//! }
//! ```
//!
//! ## Several backends
//!
//! ```rust,no_run
//! use hybrid_pdf2md::{BackendSpec, BlockType, ConversionConfig, Converter, MergePolicy, RoutingRule};
//! use hybrid_pdf2md::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConversionConfig::builder()
//!     .backend(BackendSpec::vlm("fast", "openai", "gpt-4.1-nano"))
//!     .backend(BackendSpec::vlm("careful", "anthropic", "claude-sonnet-4-20250514"))
//!     .backend_priority(["fast", "careful"])
//!     .routing_rule(RoutingRule::new(BlockType::Table, ["careful", "fast"]).specialized())
//!     .merge_policy(MergePolicy::Vote { threshold: 0.9 })
//!     .page_candidates(2)
//!     .build()?;
//!
//! let converter = Converter::from_config(config)?;
//! let result = converter.convert("report.pdf", &CancellationToken::new()).await?;
//! for unit in &result.units {
//!     println!("{} {:?} via {:?}", unit.unit_id, unit.status, unit.backend_used);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `hybrid-pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! hybrid-pdf2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod unit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    BackendRegistry, BackendSet, BackendSpec, OcrBackend, Operation, SpecializedVariant,
    VlmBackend,
};
pub use config::{
    ConfigFile, ConversionConfig, ConversionConfigBuilder, PageSelection, PageSeparator,
    UnitErrorPolicy,
};
pub use convert::{
    convert, convert_from_bytes, convert_sync, convert_to_file, convert_with_cancellation,
    inspect, write_markdown, Converter,
};
pub use error::{BackendError, BackendFailure, MergeError, Pdf2MdError, UnitError};
pub use layout::{Block, BlockType, BoundingBox, LayoutSegmenter, WholePageSegmenter};
pub use orchestrator::merge::MergePolicy;
pub use orchestrator::retry::RetryPolicy;
pub use orchestrator::router::RoutingRule;
pub use orchestrator::Orchestrator;
pub use output::{
    BackendCandidate, CandidateStatus, ConversionOutcome, ConversionResult, ConversionSummary,
    DocumentMetadata, Extraction, UnitResult, UnitStatus,
};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, RenderError, RenderedImage};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use unit::{UnitKind, UnitMetadata, WorkUnit};

pub use tokio_util::sync::CancellationToken;
