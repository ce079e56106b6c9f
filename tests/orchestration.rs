//! Orchestration tests through the public API.
//!
//! Backends and the renderer are in-memory fakes, so these run without
//! pdfium or network access.

use async_trait::async_trait;
use hybrid_pdf2md::{
    BackendError, BackendRegistry, BackendSet, BackendSpec, Block, BlockType, BoundingBox,
    CancellationToken, ConversionConfig, ConversionOutcome, Converter, DocumentMetadata,
    Extraction, LayoutSegmenter, MergePolicy, OcrBackend, PageRenderer, PageSeparator,
    Pdf2MdError, RenderError, RenderedImage, RoutingRule, SpecializedVariant, UnitError,
    UnitErrorPolicy, UnitMetadata, UnitStatus,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct Pages(usize);

impl PageRenderer for Pages {
    fn page_count(&self) -> usize {
        self.0
    }

    fn render(&self, _page_index: usize, _dpi: u32) -> Result<RenderedImage, RenderError> {
        Ok(RenderedImage {
            png: vec![0x89, b'P', b'N', b'G'],
            width: 10,
            height: 10,
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
            page_count: self.0,
            ..Default::default()
        }
    }
}

/// Answers `"<name> p<page>"`, fails on the listed pages, and records
/// how many calls were in flight at once.
struct PageEcho {
    name: String,
    fail_pages: HashSet<usize>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl PageEcho {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_pages: HashSet::new(),
            delay: Duration::from_millis(5),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, pages: &[usize]) -> Self {
        self.fail_pages = pages.iter().copied().collect();
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn answer(&self, meta: &UnitMetadata, text: String) -> Result<Extraction, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_pages.contains(&meta.page_num) {
            return Err(BackendError::BadRequest {
                detail: format!("cannot read page {}", meta.page_num),
            });
        }
        Ok(Extraction {
            content: text,
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

#[async_trait]
impl OcrBackend for PageEcho {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generic_extract(
        &self,
        _image: &RenderedImage,
        meta: &UnitMetadata,
    ) -> Result<Extraction, BackendError> {
        let text = format!("{} p{}", self.name, meta.page_num);
        self.answer(meta, text).await
    }

    async fn specialized_extract(
        &self,
        _image: &RenderedImage,
        meta: &UnitMetadata,
        variant: SpecializedVariant,
    ) -> Result<Extraction, BackendError> {
        let text = format!("{} {variant} p{}", self.name, meta.page_num);
        self.answer(meta, text).await
    }
}

/// Backend that always gives the same answer.
struct Fixed {
    name: String,
    text: String,
}

#[async_trait]
impl OcrBackend for Fixed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generic_extract(
        &self,
        _image: &RenderedImage,
        _meta: &UnitMetadata,
    ) -> Result<Extraction, BackendError> {
        Ok(Extraction::text(self.text.clone()))
    }
}

fn fixed(name: &str, text: &str) -> Arc<dyn OcrBackend> {
    Arc::new(Fixed {
        name: name.to_string(),
        text: text.to_string(),
    })
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_retries() -> hybrid_pdf2md::ConversionConfigBuilder {
    ConversionConfig::builder()
        .max_retries(1)
        .initial_delay_ms(1)
        .max_delay_ms(2)
}

async fn run(
    config: ConversionConfig,
    backends: BackendSet,
    pages: usize,
) -> Result<hybrid_pdf2md::ConversionResult, Pdf2MdError> {
    Converter::new(config, backends)?
        .convert_document("test-doc", Arc::new(Pages(pages)), &CancellationToken::new())
        .await
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_page_becomes_placeholder_and_order_is_kept() {
    init_tracing();
    let backend = Arc::new(PageEcho::new("A").failing_on(&[3]));
    let config = fast_retries()
        .max_workers(2)
        .on_unit_error(UnitErrorPolicy::Placeholder)
        .page_separator(PageSeparator::HorizontalRule)
        .build()
        .unwrap();

    let result = run(config, BackendSet::new().with(backend.clone()).unwrap(), 5)
        .await
        .unwrap();

    assert_eq!(result.total_units, 5);
    assert_eq!(result.successful_units, 4);
    assert_eq!(result.outcome(), ConversionOutcome::Degraded);

    let statuses: Vec<UnitStatus> = result.units.iter().map(|u| u.status).collect();
    assert_eq!(
        statuses,
        vec![
            UnitStatus::Success,
            UnitStatus::Success,
            UnitStatus::Placeholder,
            UnitStatus::Success,
            UnitStatus::Success,
        ]
    );
    let sequences: Vec<usize> = result.units.iter().map(|u| u.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

    let sections: Vec<&str> = result.content.trim_end().split("\n\n---\n\n").collect();
    assert_eq!(sections.len(), 5);
    assert_eq!(sections[0], "A p1");
    assert!(sections[2].starts_with("> [!WARNING]\n> page 3 could not be converted"));
    assert_eq!(sections[4], "A p5");

    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    // Bad requests are not retried.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    assert_eq!(result.summary.total_input_tokens, 400);
}

#[tokio::test]
async fn worker_limit_is_respected_under_load() {
    let backend = Arc::new(PageEcho::new("A").with_delay(Duration::from_millis(20)));
    let config = fast_retries().max_workers(3).build().unwrap();

    let result = run(config, BackendSet::new().with(backend.clone()).unwrap(), 12)
        .await
        .unwrap();

    assert_eq!(result.outcome(), ConversionOutcome::Complete);
    let peak = backend.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeds max_workers");
    for (i, unit) in result.units.iter().enumerate() {
        assert_eq!(unit.content, format!("A p{}\n", i + 1));
    }
}

#[tokio::test]
async fn fallback_backend_serves_pages_the_primary_cannot() {
    init_tracing();
    let primary = Arc::new(PageEcho::new("primary").failing_on(&[2]));
    let secondary = Arc::new(PageEcho::new("secondary"));
    let config = fast_retries()
        .backend_priority(["primary", "secondary"])
        .build()
        .unwrap();
    let set = BackendSet::new()
        .with(secondary.clone())
        .unwrap()
        .with(primary.clone())
        .unwrap();

    let result = run(config, set, 3).await.unwrap();

    assert_eq!(result.outcome(), ConversionOutcome::Complete);
    let used: Vec<Option<&str>> = result
        .units
        .iter()
        .map(|u| u.backend_used.as_deref())
        .collect();
    assert_eq!(
        used,
        vec![Some("primary"), Some("secondary"), Some("primary")]
    );
    assert_eq!(result.summary.backend_usage.get("primary"), Some(&2));
    assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn raise_policy_aborts_with_the_failing_unit() {
    let backend = Arc::new(PageEcho::new("A").failing_on(&[2]));
    let config = fast_retries()
        .max_workers(1)
        .on_unit_error(UnitErrorPolicy::Raise)
        .build()
        .unwrap();

    let err = run(config, BackendSet::new().with(backend.clone()).unwrap(), 6)
        .await
        .unwrap_err();

    match err {
        Pdf2MdError::UnitFailed { unit_id, source } => {
            assert_eq!(unit_id, "page-2");
            assert!(matches!(source, UnitError::FallbackExhausted { .. }));
        }
        other => panic!("expected UnitFailed, got {other:?}"),
    }
    // With one worker, nothing after page 2 is dispatched.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skip_policy_leaves_gap_without_marker() {
    let backend = Arc::new(PageEcho::new("A").failing_on(&[1]));
    let config = fast_retries()
        .on_unit_error(UnitErrorPolicy::Skip)
        .page_separator(PageSeparator::Comment)
        .build()
        .unwrap();

    let result = run(config, BackendSet::new().with(backend).unwrap(), 2)
        .await
        .unwrap();

    assert_eq!(result.content, "<!-- page 2 -->\n\nA p2\n");
    assert_eq!(result.units[0].status, UnitStatus::Skipped);
    assert!(result.units[0].error.is_some());
    assert_eq!(result.summary.skipped_units, 1);
}

#[tokio::test]
async fn vote_across_page_candidates_picks_majority() {
    let set = BackendSet::new()
        .with(fixed("a", "The quick brown fox."))
        .unwrap()
        .with(fixed("b", "the quick  brown fox!"))
        .unwrap()
        .with(fixed("c", "Something else entirely"))
        .unwrap();
    let config = fast_retries()
        .page_candidates(3)
        .merge_policy(MergePolicy::Vote { threshold: 0.9 })
        .build()
        .unwrap();

    let result = run(config, set, 1).await.unwrap();

    let unit = &result.units[0];
    assert_eq!(unit.status, UnitStatus::Success);
    assert_eq!(unit.candidates, 3);
    assert_eq!(unit.backend_used.as_deref(), Some("a"));
    assert_eq!(unit.content, "The quick brown fox.\n");
}

#[tokio::test]
async fn prefer_backend_wins_when_it_succeeds() {
    let set = BackendSet::new()
        .with(fixed("a", "from a"))
        .unwrap()
        .with(fixed("b", "from b"))
        .unwrap();
    let config = fast_retries()
        .page_candidates(2)
        .merge_policy(MergePolicy::PreferBackend {
            backend: "b".into(),
        })
        .build()
        .unwrap();

    let result = run(config, set, 1).await.unwrap();
    assert_eq!(result.content, "from b\n");
}

struct TableThenText;

#[async_trait]
impl LayoutSegmenter for TableThenText {
    async fn segment(
        &self,
        _renderer: Arc<dyn PageRenderer>,
        page_indices: &[usize],
    ) -> Result<Vec<Block>, Pdf2MdError> {
        let mut blocks = Vec::new();
        for &page_index in page_indices {
            for (i, block_type) in [BlockType::Table, BlockType::Text].into_iter().enumerate() {
                blocks.push(Block {
                    id: format!("p{}-b{i}", page_index + 1),
                    block_type,
                    page_index,
                    bbox: BoundingBox {
                        x: 0.0,
                        y: 0.5 * i as f32,
                        width: 1.0,
                        height: 0.5,
                    },
                });
            }
        }
        Ok(blocks)
    }
}

#[tokio::test]
async fn blocks_are_routed_by_type() {
    init_tracing();
    let tables = Arc::new(PageEcho::new("tables"));
    let prose = Arc::new(PageEcho::new("prose"));
    let config = fast_retries()
        .block_processing(true)
        .backend_priority(["prose"])
        .routing_rule(RoutingRule::new(BlockType::Table, ["tables"]).specialized())
        .page_separator(PageSeparator::HorizontalRule)
        .build()
        .unwrap();
    let set = BackendSet::new()
        .with(prose.clone())
        .unwrap()
        .with(tables.clone())
        .unwrap();

    let result = Converter::new(config, set)
        .unwrap()
        .with_segmenter(Arc::new(TableThenText))
        .convert_document("doc", Arc::new(Pages(2)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.total_units, 4);
    assert_eq!(
        result.content,
        "tables table p1\n\nprose p1\n\n---\n\ntables table p2\n\nprose p2\n"
    );
    assert_eq!(result.units[0].block_type, Some(BlockType::Table));
    assert_eq!(result.units[0].unit_id, "p1-b0");
    assert_eq!(tables.calls.load(Ordering::SeqCst), 2);
    assert_eq!(prose.calls.load(Ordering::SeqCst), 2);
}

/// Registered but reporting itself unavailable.
struct Offline(&'static str);

#[async_trait]
impl OcrBackend for Offline {
    fn name(&self) -> &str {
        self.0
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn generic_extract(
        &self,
        _image: &RenderedImage,
        _meta: &UnitMetadata,
    ) -> Result<Extraction, BackendError> {
        panic!("unavailable backend must not be called")
    }
}

#[tokio::test]
async fn strict_rule_without_available_backend_fails_the_block_only() {
    let config = fast_retries()
        .block_processing(true)
        .routing_rule(RoutingRule::new(BlockType::Table, ["tables"]).strict())
        .on_unit_error(UnitErrorPolicy::Skip)
        .build()
        .unwrap();
    let set = BackendSet::new()
        .with(fixed("prose", "body"))
        .unwrap()
        .with(Arc::new(Offline("tables")))
        .unwrap();
    let converter = Converter::new(config, set)
        .unwrap()
        .with_segmenter(Arc::new(TableThenText));

    let result = converter
        .convert_document("doc", Arc::new(Pages(1)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome(), ConversionOutcome::Degraded);
    assert_eq!(result.units[0].status, UnitStatus::Skipped);
    assert!(matches!(
        result.units[0].error,
        Some(UnitError::Routing { .. })
    ));
    assert_eq!(result.content, "body\n");
}

#[tokio::test]
async fn lenient_rule_falls_back_to_default_route() {
    let config = fast_retries()
        .block_processing(true)
        .routing_rule(RoutingRule::new(BlockType::Table, ["tables"]).specialized())
        .build()
        .unwrap();
    let set = BackendSet::new()
        .with(fixed("prose", "body"))
        .unwrap()
        .with(Arc::new(Offline("tables")))
        .unwrap();
    let converter = Converter::new(config, set)
        .unwrap()
        .with_segmenter(Arc::new(TableThenText));

    let result = converter
        .convert_document("doc", Arc::new(Pages(1)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome(), ConversionOutcome::Complete);
    assert_eq!(result.summary.backend_usage.get("prose"), Some(&2));
}

#[tokio::test]
async fn cancellation_returns_partial_result() {
    let backend = Arc::new(PageEcho::new("slow").with_delay(Duration::from_secs(30)));
    let config = fast_retries().max_workers(2).build().unwrap();
    let converter = Converter::new(config, BackendSet::new().with(backend).unwrap()).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        converter.convert_document("doc", Arc::new(Pages(4)), &cancel),
    )
    .await
    .expect("cancellation must stop the run promptly")
    .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.summary.cancelled_units, 4);
    assert!(result
        .units
        .iter()
        .all(|u| u.status == UnitStatus::Cancelled));
}

/// Records the spec each constructor receives.
struct Recording {
    seen: Mutex<Vec<BackendSpec>>,
}

#[test]
fn custom_registry_kind_builds_declared_backends() {
    let recording = Arc::new(Recording {
        seen: Mutex::new(Vec::new()),
    });
    let mut registry = BackendRegistry::new();
    let sink = Arc::clone(&recording);
    registry.register(
        "fixed",
        Arc::new(
            move |spec: &BackendSpec| -> Result<Arc<dyn OcrBackend>, Pdf2MdError> {
                sink.seen.lock().unwrap().push(spec.clone());
                Ok(fixed(&spec.name, "x"))
            },
        ),
    );

    let mut spec = BackendSpec::vlm("one", "none", "none");
    spec.kind = "fixed".into();
    let config = ConversionConfig::builder()
        .backend(spec)
        .system_prompt("be terse")
        .build()
        .unwrap();

    let converter = Converter::with_registry(config, &registry).unwrap();
    assert_eq!(converter.backends().names(), vec!["one"]);

    let seen = recording.seen.lock().unwrap();
    assert_eq!(seen[0].system_prompt.as_deref(), Some("be terse"));
}

#[test]
fn unknown_kind_is_a_configuration_error() {
    let mut spec = BackendSpec::vlm("one", "none", "none");
    spec.kind = "mystery".into();
    let config = ConversionConfig::builder().backend(spec).build().unwrap();

    let err = Converter::with_registry(config, &BackendRegistry::new())
        .err()
        .unwrap();
    assert!(matches!(err, Pdf2MdError::BackendNotConfigured { .. }));
}
