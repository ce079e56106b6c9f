//! Configuration types for hybrid PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks and diff two runs to understand
//! why their outputs differ.
//!
//! Routing rules and backend lists are awkward to express as flags, so the
//! serialisable subset can also be loaded from a TOML file through
//! [`ConfigFile`] and applied on top of a builder.

use crate::backend::BackendSpec;
use crate::error::Pdf2MdError;
use crate::orchestrator::merge::MergePolicy;
use crate::orchestrator::retry::RetryPolicy;
use crate::orchestrator::router::RoutingRule;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a conversion.
///
/// # Example
/// ```rust
/// use hybrid_pdf2md::{ConversionConfig, UnitErrorPolicy};
///
/// let config = ConversionConfig::builder()
///     .max_workers(8)
///     .max_retries(2)
///     .on_unit_error(UnitErrorPolicy::Placeholder)
///     .backend_priority(["cloud", "local"])
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Maximum work units in flight at once. Default: 4.
    ///
    /// This is the only admission control. Peak memory is roughly
    /// `max_workers × (rendered image + response)`, so lower it for very
    /// high DPI renders.
    pub max_workers: usize,

    /// Retries per backend after the first attempt. Default: 3.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds. Default: 500.
    pub initial_delay_ms: u64,

    /// Backoff multiplier applied per attempt. Default: 2.0.
    pub exponential_base: f64,

    /// Upper bound for any single retry delay, including server hints. Default: 30 000.
    pub max_delay_ms: u64,

    /// Per-call timeout in seconds. A timeout is retryable. Default: 120.
    ///
    /// Local inference servers usually answer well under a minute; cloud
    /// VLMs on dense pages can take longer.
    pub per_call_timeout_secs: u64,

    /// What to do with a unit whose whole fallback chain failed. Default: placeholder.
    pub on_unit_error: UnitErrorPolicy,

    /// Backend names in priority order for page mode and the routing default.
    /// Empty means registration order.
    pub backend_priority: Vec<String>,

    /// Backends to construct through the [`crate::backend::BackendRegistry`].
    /// Empty means auto-detect one VLM backend from the environment.
    pub backends: Vec<BackendSpec>,

    /// Segment pages into blocks and route each block separately. Default: false.
    pub block_processing_enabled: bool,

    /// Block-type routing table (block mode only).
    pub routing_rules: Vec<RoutingRule>,

    /// How competing candidates are reduced to one. Default: prefer_first.
    pub merge_policy: MergePolicy,

    /// Backends queried per page in page mode. Default: 1 (fallback only).
    ///
    /// Values above 1 run the first N available backends on every page and
    /// merge their outputs with `merge_policy`.
    pub page_candidates: usize,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on the longest edge of a rendered page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Boundary marker between pages in assembled output. Default: none.
    pub page_separator: PageSeparator,

    /// Prepend YAML front matter with document metadata. Default: false.
    pub include_metadata: bool,

    /// Run the deterministic Markdown cleanup on accepted content. Default: true.
    pub postprocess: bool,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt for generic page extraction.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 3,
            initial_delay_ms: 500,
            exponential_base: 2.0,
            max_delay_ms: 30_000,
            per_call_timeout_secs: 120,
            on_unit_error: UnitErrorPolicy::default(),
            backend_priority: Vec::new(),
            backends: Vec::new(),
            block_processing_enabled: false,
            routing_rules: Vec::new(),
            merge_policy: MergePolicy::default(),
            page_candidates: 1,
            dpi: 150,
            max_rendered_pixels: 2000,
            pages: PageSelection::default(),
            page_separator: PageSeparator::default(),
            include_metadata: false,
            postprocess: true,
            password: None,
            system_prompt: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_workers", &self.max_workers)
            .field("max_retries", &self.max_retries)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("exponential_base", &self.exponential_base)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("per_call_timeout_secs", &self.per_call_timeout_secs)
            .field("on_unit_error", &self.on_unit_error)
            .field("backend_priority", &self.backend_priority)
            .field("backends", &self.backends)
            .field("block_processing_enabled", &self.block_processing_enabled)
            .field("routing_rules", &self.routing_rules)
            .field("merge_policy", &self.merge_policy)
            .field("page_candidates", &self.page_candidates)
            .field("dpi", &self.dpi)
            .field("pages", &self.pages)
            .field("page_separator", &self.page_separator)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry settings shared by every backend call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            exponential_base: self.exponential_base,
            max_delay: Duration::from_millis(self.max_delay_ms),
            per_call_timeout: Duration::from_secs(self.per_call_timeout_secs),
        }
    }

    /// Check internal consistency. Backend-name references are checked
    /// later, once the backend set is known.
    pub fn validate(&self) -> Result<(), Pdf2MdError> {
        if self.max_workers == 0 {
            return Err(Pdf2MdError::InvalidConfig("max_workers must be ≥ 1".into()));
        }
        if self.page_candidates == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "page_candidates must be ≥ 1".into(),
            ));
        }
        if !(72..=400).contains(&self.dpi) {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "exponential_base must be ≥ 1.0, got {}",
                self.exponential_base
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if self.per_call_timeout_secs == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "per_call_timeout_secs must be ≥ 1".into(),
            ));
        }
        for rule in &self.routing_rules {
            if rule.max_candidates == 0 {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "routing rule for '{}' has max_candidates = 0",
                    rule.block_type
                )));
            }
        }
        let mut seen = HashSet::new();
        for spec in &self.backends {
            if !seen.insert(spec.name.as_str()) {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "backend '{}' is declared twice",
                    spec.name
                )));
            }
        }
        self.merge_policy.validate()
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.config.initial_delay_ms = ms;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_delay_ms = ms;
        self
    }

    pub fn per_call_timeout_secs(mut self, secs: u64) -> Self {
        self.config.per_call_timeout_secs = secs;
        self
    }

    pub fn on_unit_error(mut self, policy: UnitErrorPolicy) -> Self {
        self.config.on_unit_error = policy;
        self
    }

    pub fn backend_priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.backend_priority = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn backend(mut self, spec: BackendSpec) -> Self {
        self.config.backends.push(spec);
        self
    }

    pub fn block_processing(mut self, enabled: bool) -> Self {
        self.config.block_processing_enabled = enabled;
        self
    }

    pub fn routing_rule(mut self, rule: RoutingRule) -> Self {
        self.config.routing_rules.push(rule);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    pub fn page_candidates(mut self, n: usize) -> Self {
        self.config.page_candidates = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn postprocess(mut self, v: bool) -> Self {
        self.config.postprocess = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Policy for a unit that exhausted its whole fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorPolicy {
    /// Omit the unit from the content; still counted in the summary.
    Skip,
    /// Insert a visible marker naming the unit and the error. (default)
    #[default]
    Placeholder,
    /// Abort the whole conversion on the first unrecoverable unit.
    Raise,
}

impl FromStr for UnitErrorPolicy {
    type Err = Pdf2MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(UnitErrorPolicy::Skip),
            "placeholder" => Ok(UnitErrorPolicy::Placeholder),
            "raise" => Ok(UnitErrorPolicy::Raise),
            other => Err(Pdf2MdError::InvalidConfig(format!(
                "on_unit_error must be skip, placeholder or raise, got '{other}'"
            ))),
        }
    }
}

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Parse `all`, `5`, `3-15` or `1,3,5`.
    pub fn parse(s: &str) -> Result<Self, Pdf2MdError> {
        let s = s.trim().to_lowercase();
        let page = |p: &str| -> Result<usize, Pdf2MdError> {
            let n: usize = p
                .trim()
                .parse()
                .map_err(|_| Pdf2MdError::InvalidConfig(format!("Invalid page number: '{p}'")))?;
            if n < 1 {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "Pages are 1-indexed, minimum is 1 (got {n})"
                )));
            }
            Ok(n)
        };

        if s == "all" {
            return Ok(PageSelection::All);
        }
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "Invalid page range '{start}-{end}': start must be <= end"
                )));
            }
            return Ok(PageSelection::Range(start, end));
        }
        if s.contains(',') {
            return s
                .split(',')
                .map(page)
                .collect::<Result<Vec<_>, _>>()
                .map(PageSelection::Set);
        }
        page(&s).map(PageSelection::Single)
    }

    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Boundary marker between pages in the assembled output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule between pages.
    HorizontalRule,
    /// `<!-- page N -->` before every page, the first included.
    Comment,
    /// Custom string between pages.
    Custom(String),
}

impl PageSeparator {
    /// Parse `none`, `hr`, `comment`, or treat anything else as a custom marker.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => PageSeparator::None,
            "hr" | "---" => PageSeparator::HorizontalRule,
            "comment" => PageSeparator::Comment,
            _ => PageSeparator::Custom(s.trim().to_string()),
        }
    }

    /// Text to emit before the content of page `page_num` (1-indexed).
    pub fn boundary(&self, page_num: usize, first: bool) -> String {
        match (self, first) {
            (PageSeparator::Comment, true) => format!("<!-- page {page_num} -->\n\n"),
            (PageSeparator::Comment, false) => format!("\n\n<!-- page {page_num} -->\n\n"),
            (_, true) => String::new(),
            (PageSeparator::None, false) => "\n\n".to_string(),
            (PageSeparator::HorizontalRule, false) => "\n\n---\n\n".to_string(),
            (PageSeparator::Custom(s), false) => format!("\n\n{s}\n\n"),
        }
    }
}

// ── File configuration ───────────────────────────────────────────────────

/// Serialisable subset of [`ConversionConfig`] loaded from TOML.
///
/// ```toml
/// max_workers = 6
/// on_unit_error = "skip"
/// backend_priority = ["cloud", "local"]
///
/// [[backends]]
/// name = "cloud"
/// provider = "openai"
/// model = "gpt-4.1-mini"
///
/// [[routing_rules]]
/// block_type = "table"
/// backends = ["cloud"]
/// use_specialized_operation = true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub max_workers: Option<usize>,
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub exponential_base: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub per_call_timeout_secs: Option<u64>,
    pub on_unit_error: Option<UnitErrorPolicy>,
    pub backend_priority: Option<Vec<String>>,
    pub backends: Vec<BackendSpec>,
    pub block_processing_enabled: Option<bool>,
    pub routing_rules: Vec<RoutingRule>,
    pub merge_policy: Option<MergePolicy>,
    pub page_candidates: Option<usize>,
    pub dpi: Option<u32>,
    pub max_rendered_pixels: Option<u32>,
    pub pages: Option<String>,
    pub separator: Option<String>,
    pub include_metadata: Option<bool>,
    pub postprocess: Option<bool>,
    pub download_timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn from_toml_str(s: &str) -> Result<Self, Pdf2MdError> {
        toml::from_str(s).map_err(|e| Pdf2MdError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, Pdf2MdError> {
        let text = std::fs::read_to_string(path).map_err(|e| Pdf2MdError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|e| Pdf2MdError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Apply every value present in the file on top of `builder`.
    pub fn apply(self, mut b: ConversionConfigBuilder) -> Result<ConversionConfigBuilder, Pdf2MdError> {
        if let Some(v) = self.max_workers {
            b = b.max_workers(v);
        }
        if let Some(v) = self.max_retries {
            b = b.max_retries(v);
        }
        if let Some(v) = self.initial_delay_ms {
            b = b.initial_delay_ms(v);
        }
        if let Some(v) = self.exponential_base {
            b = b.exponential_base(v);
        }
        if let Some(v) = self.max_delay_ms {
            b = b.max_delay_ms(v);
        }
        if let Some(v) = self.per_call_timeout_secs {
            b = b.per_call_timeout_secs(v);
        }
        if let Some(v) = self.on_unit_error {
            b = b.on_unit_error(v);
        }
        if let Some(v) = self.backend_priority {
            b = b.backend_priority(v);
        }
        for spec in self.backends {
            b = b.backend(spec);
        }
        if let Some(v) = self.block_processing_enabled {
            b = b.block_processing(v);
        }
        for rule in self.routing_rules {
            b = b.routing_rule(rule);
        }
        if let Some(v) = self.merge_policy {
            b = b.merge_policy(v);
        }
        if let Some(v) = self.page_candidates {
            b = b.page_candidates(v);
        }
        if let Some(v) = self.dpi {
            b = b.dpi(v);
        }
        if let Some(v) = self.max_rendered_pixels {
            b = b.max_rendered_pixels(v);
        }
        if let Some(v) = self.pages {
            b = b.pages(PageSelection::parse(&v)?);
        }
        if let Some(v) = self.separator {
            b = b.page_separator(PageSeparator::parse(&v));
        }
        if let Some(v) = self.include_metadata {
            b = b.include_metadata(v);
        }
        if let Some(v) = self.postprocess {
            b = b.postprocess(v);
        }
        if let Some(v) = self.download_timeout_secs {
            b = b.download_timeout_secs(v);
        }
        Ok(b)
    }
}
