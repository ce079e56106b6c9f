//! Conversion entry points.
//!
//! [`Converter`] owns the validated configuration, the constructed backends
//! and the layout segmenter, and turns one document into a
//! [`ConversionResult`]. The free functions (`convert`, `convert_to_file`, …)
//! build a converter from a [`ConversionConfig`] for one-shot use.
//!
//! A conversion only returns `Err` for fatal problems: unreadable input,
//! invalid configuration, a renderer that cannot open the document, or a unit
//! failure under `on_unit_error = raise`. Degraded documents come back as
//! `Ok`; call [`ConversionResult::into_result`] to treat them as errors.

use crate::backend::{BackendRegistry, BackendSet, VlmBackend};
use crate::config::{ConversionConfig, PageSelection, UnitErrorPolicy};
use crate::error::{Pdf2MdError, UnitError};
use crate::layout::{LayoutSegmenter, WholePageSegmenter};
use crate::orchestrator::{assemble, Orchestrator};
use crate::output::{ConversionResult, ConversionSummary, DocumentMetadata, UnitResult, UnitStatus};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::unit::WorkUnit;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the backend auto-detected when none are declared.
pub const DEFAULT_BACKEND_NAME: &str = "default";

/// A configured converter. Cheap to share; holds no per-document state.
pub struct Converter {
    config: ConversionConfig,
    backends: Arc<BackendSet>,
    segmenter: Arc<dyn LayoutSegmenter>,
}

impl Converter {
    /// Use an already-constructed backend set.
    ///
    /// Fails when the configuration is invalid, the set is empty, or the
    /// configuration names a backend the set does not contain.
    pub fn new(config: ConversionConfig, backends: BackendSet) -> Result<Self, Pdf2MdError> {
        config.validate()?;
        if backends.is_empty() {
            return Err(Pdf2MdError::BackendNotConfigured {
                backend: "none".to_string(),
                hint: "at least one backend must be registered".to_string(),
            });
        }
        check_backend_references(&config, &backends)?;
        debug!("Converter ready with backends {:?}", backends.names());

        Ok(Self {
            config,
            backends: Arc::new(backends),
            segmenter: Arc::new(WholePageSegmenter),
        })
    }

    /// Construct backends from `config.backends` with the built-in registry,
    /// or auto-detect a single VLM backend when none are declared.
    pub fn from_config(config: ConversionConfig) -> Result<Self, Pdf2MdError> {
        Self::with_registry(config, &BackendRegistry::with_defaults())
    }

    /// Like [`Converter::from_config`] with a caller-supplied registry.
    pub fn with_registry(
        config: ConversionConfig,
        registry: &BackendRegistry,
    ) -> Result<Self, Pdf2MdError> {
        let backends = if config.backends.is_empty() {
            let mut vlm = VlmBackend::from_env(DEFAULT_BACKEND_NAME, None)?;
            if let Some(ref prompt) = config.system_prompt {
                vlm = vlm.with_system_prompt(prompt.clone());
            }
            info!("No backends declared, using auto-detected '{}'", DEFAULT_BACKEND_NAME);
            BackendSet::new().with(Arc::new(vlm))?
        } else {
            let specs: Vec<_> = config
                .backends
                .iter()
                .cloned()
                .map(|mut spec| {
                    if spec.system_prompt.is_none() {
                        spec.system_prompt = config.system_prompt.clone();
                    }
                    spec
                })
                .collect();
            registry.build(&specs)?
        };
        Self::new(config, backends)
    }

    /// Replace the layout segmenter used in block mode.
    pub fn with_segmenter(mut self, segmenter: Arc<dyn LayoutSegmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Convert a local path or `http(s)://` URL.
    pub async fn convert(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, Pdf2MdError> {
        info!("Starting conversion: {}", input);
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        self.convert_resolved(&resolved, cancel).await
    }

    /// Convert PDF bytes held in memory.
    pub async fn convert_bytes(
        &self,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, Pdf2MdError> {
        let resolved = input::resolve_bytes(bytes, "document").await?;
        self.convert_resolved(&resolved, cancel).await
    }

    async fn convert_resolved(
        &self,
        resolved: &ResolvedInput,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, Pdf2MdError> {
        let renderer = open_renderer(
            resolved.path(),
            self.config.password.clone(),
            self.config.max_rendered_pixels,
        )
        .await?;
        self.convert_document(&resolved.doc_id(), renderer, cancel).await
    }

    /// Convert a document behind any [`PageRenderer`].
    pub async fn convert_document(
        &self,
        doc_id: &str,
        renderer: Arc<dyn PageRenderer>,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, Pdf2MdError> {
        let start = Instant::now();
        let metadata = renderer.metadata();
        let total_pages = renderer.page_count();

        let page_indices = self.config.pages.to_indices(total_pages);
        if page_indices.is_empty() {
            return Err(Pdf2MdError::PageOutOfRange {
                page: first_requested_page(&self.config.pages),
                total: total_pages,
            });
        }

        let doc: Arc<str> = Arc::from(doc_id);
        let units = self.build_units(&doc, &renderer, &page_indices).await?;
        info!(
            "'{}': {} unit(s) from {} page(s) on {} backend(s)",
            doc_id,
            units.len(),
            page_indices.len(),
            self.backends.len()
        );

        let orchestrator = Orchestrator::new(&self.config, Arc::clone(&self.backends));
        let units = orchestrator.run(units, renderer, cancel).await;

        if self.config.on_unit_error == UnitErrorPolicy::Raise {
            if let Some((unit_id, source)) = first_raised(&units) {
                return Err(Pdf2MdError::UnitFailed { unit_id, source });
            }
        }

        let mut content = assemble::assemble(&units, &self.config.page_separator);
        if self.config.include_metadata {
            content = format!("{}{}", format_yaml_front_matter(&metadata), content);
        }

        let mut summary = assemble::summarize(&units);
        summary.duration_ms = start.elapsed().as_millis() as u64;

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(
                "Conversion cancelled: {} of {} units finished",
                units.len() - summary.cancelled_units,
                units.len()
            );
        }
        info!(
            "Conversion complete: {}/{} units, {}ms total, backends {:?}",
            summary.successful_units,
            units.len(),
            summary.duration_ms,
            summary.backend_usage
        );

        Ok(ConversionResult {
            doc_id: doc_id.to_string(),
            total_units: units.len(),
            successful_units: summary.successful_units,
            units,
            content,
            summary,
            metadata,
            cancelled,
        })
    }

    async fn build_units(
        &self,
        doc: &Arc<str>,
        renderer: &Arc<dyn PageRenderer>,
        page_indices: &[usize],
    ) -> Result<Vec<WorkUnit>, Pdf2MdError> {
        let dpi = self.config.dpi;
        if !self.config.block_processing_enabled {
            return Ok(page_indices
                .iter()
                .enumerate()
                .map(|(sequence, &page)| WorkUnit::page(Arc::clone(doc), sequence, page, dpi))
                .collect());
        }

        let blocks = self
            .segmenter
            .segment(Arc::clone(renderer), page_indices)
            .await?;
        debug!(
            "Segmented {} page(s) into {} block(s)",
            page_indices.len(),
            blocks.len()
        );
        Ok(blocks
            .into_iter()
            .enumerate()
            .map(|(sequence, block)| WorkUnit::block(Arc::clone(doc), sequence, block, dpi))
            .collect())
    }
}

/// Every backend name the configuration mentions must be registered.
fn check_backend_references(
    config: &ConversionConfig,
    backends: &BackendSet,
) -> Result<(), Pdf2MdError> {
    let mut references: Vec<(String, &str)> = config
        .backend_priority
        .iter()
        .map(|name| ("backend_priority".to_string(), name.as_str()))
        .collect();
    for rule in &config.routing_rules {
        for name in &rule.backends {
            references.push((format!("routing rule for '{}'", rule.block_type), name));
        }
    }
    if let Some(name) = config.merge_policy.referenced_backend() {
        references.push((format!("merge policy '{}'", config.merge_policy.name()), name));
    }

    match references.into_iter().find(|(_, name)| !backends.contains(name)) {
        Some((origin, name)) => Err(Pdf2MdError::InvalidConfig(format!(
            "{origin} references unknown backend '{name}' (registered: {})",
            backends.names().join(", ")
        ))),
        None => Ok(()),
    }
}

/// First unit that failed under `raise`. Panicked units do not abort.
fn first_raised(units: &[UnitResult]) -> Option<(String, UnitError)> {
    units.iter().find_map(|u| match (&u.status, &u.error) {
        (UnitStatus::Error, Some(e)) if !matches!(e, UnitError::TaskPanicked { .. }) => {
            Some((u.unit_id.clone(), e.clone()))
        }
        _ => None,
    })
}

fn first_requested_page(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 1,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(pages) => pages.first().copied().unwrap_or(1),
    }
}

/// Open the PDF with pdfium on the blocking pool.
async fn open_renderer(
    path: &Path,
    password: Option<String>,
    max_pixels: u32,
) -> Result<Arc<dyn PageRenderer>, Pdf2MdError> {
    let path = path.to_path_buf();
    let renderer = tokio::task::spawn_blocking(move || {
        PdfiumRenderer::open(&path, password.as_deref(), max_pixels)
    })
    .await
    .map_err(|e| Pdf2MdError::Internal(format!("renderer task failed: {e}")))??;
    Ok(Arc::new(renderer))
}

// ── One-shot API ─────────────────────────────────────────────────────────

/// Convert a PDF file or URL to Markdown.
///
/// # Example
/// ```rust,no_run
/// use hybrid_pdf2md::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::default();
/// let result = convert("document.pdf", &config).await?;
/// println!("{}", result.content);
/// eprintln!("{:?}: {}/{} units", result.outcome(), result.successful_units, result.total_units);
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, Pdf2MdError> {
    convert_with_cancellation(input, config, &CancellationToken::new()).await
}

/// [`convert`] with a caller-owned cancellation token.
///
/// Cancelling stops pending backend calls; the partial document is still
/// returned with `cancelled = true`.
pub async fn convert_with_cancellation(
    input: impl AsRef<str>,
    config: &ConversionConfig,
    cancel: &CancellationToken,
) -> Result<ConversionResult, Pdf2MdError> {
    Converter::from_config(config.clone())?
        .convert(input.as_ref(), cancel)
        .await
}

/// Convert PDF bytes in memory.
///
/// The bytes are spilled to a managed temp directory that is removed when
/// the call returns.
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionResult, Pdf2MdError> {
    Converter::from_config(config.clone())?
        .convert_bytes(bytes, &CancellationToken::new())
        .await
}

/// Convert and write the Markdown to `output_path`.
pub async fn convert_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionSummary, Pdf2MdError> {
    let result = convert(input, config).await?;
    write_markdown(output_path.as_ref(), &result.content).await?;
    Ok(result.summary)
}

/// Write `content` atomically (temp file + rename), creating parent dirs.
pub async fn write_markdown(path: &Path, content: &str) -> Result<(), Pdf2MdError> {
    let write_failed = |source: std::io::Error| Pdf2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path: PathBuf = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)?;
    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, Pdf2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2MdError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(input, config))
}

/// Read PDF metadata without converting. Needs no backend or API key.
pub async fn inspect(input: impl AsRef<str>) -> Result<DocumentMetadata, Pdf2MdError> {
    let resolved = input::resolve_input(input.as_ref(), 120).await?;
    let renderer = open_renderer(resolved.path(), None, 2000).await?;
    Ok(renderer.metadata())
}

/// Format document metadata as YAML front matter.
fn format_yaml_front_matter(meta: &DocumentMetadata) -> String {
    let quoted = |s: &str| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""));
    let mut yaml = String::from("---\n");

    let fields = [
        ("title", &meta.title),
        ("author", &meta.author),
        ("subject", &meta.subject),
        ("creator", &meta.creator),
        ("producer", &meta.producer),
    ];
    for (key, value) in fields {
        if let Some(v) = value {
            yaml.push_str(&format!("{key}: {}\n", quoted(v)));
        }
    }
    yaml.push_str(&format!("pages: {}\n", meta.page_count));
    if !meta.pdf_version.is_empty() {
        yaml.push_str(&format!("pdf_version: {}\n", quoted(&meta.pdf_version)));
    }

    yaml.push_str("---\n\n");
    yaml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::config::PageSeparator;
    use crate::error::BackendError;
    use crate::layout::{Block, BlockType, BoundingBox};
    use crate::orchestrator::merge::MergePolicy;
    use crate::orchestrator::router::RoutingRule;
    use crate::pipeline::render::{RenderError, RenderedImage};
    use async_trait::async_trait;

    struct BlankRenderer(usize);

    impl PageRenderer for BlankRenderer {
        fn page_count(&self) -> usize {
            self.0
        }

        fn render(&self, _page_index: usize, _dpi: u32) -> Result<RenderedImage, RenderError> {
            Ok(RenderedImage {
                png: vec![0],
                width: 1,
                height: 1,
            })
        }

        fn render_region(
            &self,
            page_index: usize,
            _bbox: BoundingBox,
            dpi: u32,
        ) -> Result<RenderedImage, RenderError> {
            self.render(page_index, dpi)
        }

        fn metadata(&self) -> DocumentMetadata {
            DocumentMetadata {
                title: Some("A \"quoted\" title".into()),
                page_count: self.0,
                pdf_version: "1.7".into(),
                ..Default::default()
            }
        }
    }

    fn backends(list: Vec<ScriptedBackend>) -> BackendSet {
        let mut set = BackendSet::new();
        for b in list {
            set.insert(Arc::new(b)).unwrap();
        }
        set
    }

    fn fast() -> crate::config::ConversionConfigBuilder {
        ConversionConfig::builder()
            .max_retries(0)
            .initial_delay_ms(1)
            .max_delay_ms(1)
    }

    #[test]
    fn unknown_backend_references_are_rejected() {
        let set = || backends(vec![ScriptedBackend::ok("cloud", "x")]);

        let cfg = fast().backend_priority(["cloud", "local"]).build().unwrap();
        let err = Converter::new(cfg, set()).err().unwrap();
        assert!(err.to_string().contains("'local'"), "got: {err}");

        let cfg = fast()
            .routing_rule(RoutingRule::new(BlockType::Table, ["tables"]))
            .build()
            .unwrap();
        assert!(Converter::new(cfg, set()).is_err());

        let cfg = fast()
            .merge_policy(MergePolicy::LlmArbitrate {
                arbiter: "judge".into(),
            })
            .build()
            .unwrap();
        assert!(Converter::new(cfg, set()).is_err());
    }

    #[test]
    fn empty_backend_set_is_rejected() {
        let cfg = fast().build().unwrap();
        assert!(matches!(
            Converter::new(cfg, BackendSet::new()),
            Err(Pdf2MdError::BackendNotConfigured { .. })
        ));
    }

    #[tokio::test]
    async fn converts_pages_with_separators_and_front_matter() {
        let cfg = fast()
            .page_separator(PageSeparator::HorizontalRule)
            .include_metadata(true)
            .build()
            .unwrap();
        let converter = Converter::new(cfg, backends(vec![ScriptedBackend::ok("A", "body")])).unwrap();

        let result = converter
            .convert_document("doc", Arc::new(BlankRenderer(2)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            result.content,
            "---\ntitle: \"A \\\"quoted\\\" title\"\npages: 2\npdf_version: \"1.7\"\n---\n\nbody\n\n---\n\nbody\n"
        );
        assert_eq!(result.successful_units, 2);
        assert_eq!(result.summary.backend_usage.get("A"), Some(&2));
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn page_selection_outside_document_is_fatal() {
        let cfg = fast().pages(PageSelection::Single(9)).build().unwrap();
        let converter = Converter::new(cfg, backends(vec![ScriptedBackend::ok("A", "x")])).unwrap();
        let err = converter
            .convert_document("doc", Arc::new(BlankRenderer(3)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2MdError::PageOutOfRange { page: 9, total: 3 }));
    }

    #[tokio::test]
    async fn raise_policy_returns_unit_failure() {
        let cfg = fast()
            .on_unit_error(UnitErrorPolicy::Raise)
            .build()
            .unwrap();
        let failing = ScriptedBackend::failing(
            "A",
            BackendError::Auth {
                detail: "expired".into(),
            },
        );
        let converter = Converter::new(cfg, backends(vec![failing])).unwrap();
        let err = converter
            .convert_document("doc", Arc::new(BlankRenderer(2)), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Pdf2MdError::UnitFailed { unit_id, source } => {
                assert_eq!(unit_id, "page-1");
                assert!(matches!(source, UnitError::FallbackExhausted { .. }));
            }
            other => panic!("expected UnitFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_conversion_still_returns_result() {
        let cfg = fast().build().unwrap();
        let converter = Converter::new(cfg, backends(vec![ScriptedBackend::ok("A", "x")])).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = converter
            .convert_document("doc", Arc::new(BlankRenderer(2)), &cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.summary.cancelled_units, 2);
        assert_eq!(result.content, "");
    }

    struct TwoBlocksPerPage;

    #[async_trait]
    impl LayoutSegmenter for TwoBlocksPerPage {
        async fn segment(
            &self,
            _renderer: Arc<dyn PageRenderer>,
            page_indices: &[usize],
        ) -> Result<Vec<Block>, Pdf2MdError> {
            Ok(page_indices
                .iter()
                .flat_map(|&page_index| {
                    [BlockType::Title, BlockType::Formula]
                        .into_iter()
                        .enumerate()
                        .map(move |(i, block_type)| Block {
                            id: format!("p{}-b{i}", page_index + 1),
                            block_type,
                            page_index,
                            bbox: BoundingBox::FULL_PAGE,
                        })
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn block_mode_routes_each_block() {
        let cfg = fast()
            .block_processing(true)
            .routing_rule(RoutingRule::new(BlockType::Formula, ["math"]).specialized())
            .page_separator(PageSeparator::Comment)
            .build()
            .unwrap();
        let set = backends(vec![
            ScriptedBackend::ok("prose", "# Heading"),
            ScriptedBackend::ok("math", "$$x^2$$"),
        ]);
        let converter = Converter::new(cfg, set)
            .unwrap()
            .with_segmenter(Arc::new(TwoBlocksPerPage));

        let result = converter
            .convert_document("doc", Arc::new(BlankRenderer(1)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_units, 2);
        assert_eq!(result.units[1].block_type, Some(BlockType::Formula));
        assert_eq!(
            result.content,
            "<!-- page 1 -->\n\n# Heading\n\n[formula] $$x^2$$\n"
        );
        assert_eq!(result.summary.backend_usage.get("math"), Some(&1));
    }

    #[tokio::test]
    async fn write_markdown_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.md");

        write_markdown(&path, "first\n").await.unwrap();
        write_markdown(&path, "second\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
        assert!(!path.with_extension("md.tmp").exists());
    }
}
