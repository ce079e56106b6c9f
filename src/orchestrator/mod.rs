//! Hybrid OCR orchestration.
//!
//! ```text
//! units ─► scheduler (≤ max_workers in flight, ordered fan-in)
//!            │
//!            ├─ render (spawn_blocking)
//!            ├─ route       page: backend priority │ block: routing rules
//!            ├─ candidates  1: fallback chain      │ k>1: k backends, each retried,
//!            │                                     │      then the rest as a chain
//!            ├─ merge       prefer_first │ prefer_backend │ vote │ llm_arbitrate
//!            └─ on_unit_error  skip │ placeholder │ raise
//!  ◄─ Vec<UnitResult> in input order
//! ```
//!
//! Unit processing never returns an error: every failure ends up as a
//! [`UnitResult`] status. Under `raise` the first unrecoverable unit cancels
//! the rest of the run and the converter turns it into a fatal error.

pub mod assemble;
pub mod fallback;
pub mod merge;
pub mod retry;
pub mod router;
pub mod scheduler;

use crate::backend::BackendSet;
use crate::config::{ConversionConfig, UnitErrorPolicy};
use crate::error::{BackendFailure, MergeError, UnitError};
use crate::output::{BackendCandidate, UnitResult, UnitStatus};
use crate::pipeline::postprocess;
use crate::pipeline::render::{PageRenderer, RenderedImage};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::unit::{UnitKind, WorkUnit};
use fallback::CallContext;
use merge::{Accepted, MergePolicy};
use retry::RetryPolicy;
use router::{BlockRouter, Route};
use scheduler::Interruption;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives work units through rendering, backends and merging.
///
/// Holds no per-document state; one instance can run many documents.
pub struct Orchestrator {
    backends: Arc<BackendSet>,
    router: BlockRouter,
    merge_policy: MergePolicy,
    retry: RetryPolicy,
    priority: Vec<String>,
    page_candidates: usize,
    max_workers: usize,
    on_unit_error: UnitErrorPolicy,
    postprocess: bool,
    progress: ProgressCallback,
}

/// Outcome of the backend stage for one unit, before the error policy.
struct Extracted {
    accepted: Result<Accepted, UnitError>,
    candidates: usize,
    input_tokens: usize,
    output_tokens: usize,
}

impl Extracted {
    fn failed(error: UnitError) -> Self {
        Self {
            accepted: Err(error),
            candidates: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    fn from_candidates(candidates: &[BackendCandidate], accepted: Result<Accepted, UnitError>) -> Self {
        let extra = accepted.as_ref().map_or((0, 0), |a| (a.input_tokens, a.output_tokens));
        Self {
            candidates: candidates.len(),
            input_tokens: candidates.iter().map(|c| c.input_tokens).sum::<usize>() + extra.0,
            output_tokens: candidates.iter().map(|c| c.output_tokens).sum::<usize>() + extra.1,
            accepted,
        }
    }
}

impl Orchestrator {
    pub fn new(config: &ConversionConfig, backends: Arc<BackendSet>) -> Self {
        Self {
            backends,
            router: BlockRouter::new(config.routing_rules.clone()),
            merge_policy: config.merge_policy.clone(),
            retry: config.retry_policy(),
            priority: config.backend_priority.clone(),
            page_candidates: config.page_candidates.max(1),
            max_workers: config.max_workers.max(1),
            on_unit_error: config.on_unit_error,
            postprocess: config.postprocess,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        }
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Process every unit and return one result per unit, in input order.
    ///
    /// Cancelling `cancel` stops pending backend calls and leaves units that
    /// have not started as [`UnitStatus::Cancelled`].
    pub async fn run(
        &self,
        units: Vec<WorkUnit>,
        renderer: Arc<dyn PageRenderer>,
        cancel: &CancellationToken,
    ) -> Vec<UnitResult> {
        let total = units.len();
        let run_token = cancel.child_token();
        self.progress.on_conversion_start(total);

        let renderer = &renderer;
        let token = &run_token;
        let indexed: Vec<(usize, WorkUnit)> = units.into_iter().enumerate().collect();
        let results = scheduler::run_ordered(
            indexed,
            self.max_workers,
            token,
            move |(index, unit)| {
                self.process_unit(unit, index + 1, total, Arc::clone(renderer), token)
            },
            |(index, unit): &(usize, WorkUnit), why| self.interrupted(unit, index + 1, total, why),
        )
        .await;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        self.progress.on_conversion_complete(total, succeeded);
        results
    }

    async fn process_unit(
        &self,
        unit: WorkUnit,
        position: usize,
        total: usize,
        renderer: Arc<dyn PageRenderer>,
        token: &CancellationToken,
    ) -> UnitResult {
        let start = Instant::now();
        let unit_id = unit.id();
        self.progress.on_unit_start(&unit_id, position, total);

        let extracted = self.extract(&unit, renderer, token).await;
        let mut result = base_result(&unit);
        result.candidates = extracted.candidates;
        result.input_tokens = extracted.input_tokens;
        result.output_tokens = extracted.output_tokens;

        match extracted.accepted {
            Ok(accepted) => {
                result.content = if self.postprocess {
                    postprocess::clean_markdown(&accepted.content)
                } else {
                    accepted.content
                };
                result.status = UnitStatus::Success;
                self.progress.on_unit_complete(
                    &unit_id,
                    position,
                    total,
                    &accepted.backend,
                    result.content.len(),
                );
                result.backend_used = Some(accepted.backend);
            }
            Err(UnitError::Cancelled) => {
                debug!("{}: cancelled", unit_id);
                result.status = UnitStatus::Cancelled;
                result.error = Some(UnitError::Cancelled);
            }
            Err(err) => {
                self.progress
                    .on_unit_error(&unit_id, position, total, &err.to_string());
                match self.on_unit_error {
                    UnitErrorPolicy::Skip => {
                        warn!("{} failed, skipping: {}", unit.label(), err);
                        result.status = UnitStatus::Skipped;
                    }
                    UnitErrorPolicy::Placeholder => {
                        warn!("{} failed, inserting placeholder: {}", unit.label(), err);
                        result.status = UnitStatus::Placeholder;
                        result.content = assemble::placeholder(&unit.label(), &err);
                    }
                    UnitErrorPolicy::Raise => {
                        error!("{} failed, aborting conversion: {}", unit.label(), err);
                        result.status = UnitStatus::Error;
                        token.cancel();
                    }
                }
                result.error = Some(err);
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "{}: {:?} in {}ms ({} candidate(s))",
            unit_id, result.status, result.duration_ms, result.candidates
        );
        result
    }

    async fn extract(
        &self,
        unit: &WorkUnit,
        renderer: Arc<dyn PageRenderer>,
        token: &CancellationToken,
    ) -> Extracted {
        let image = match render_unit(unit, renderer).await {
            Ok(image) => image,
            Err(e) => return Extracted::failed(e),
        };

        let available = self.backends.available_names(&self.priority);
        let route = match &unit.kind {
            UnitKind::Page => Route {
                max_candidates: self.page_candidates.clamp(1, available.len().max(1)),
                ..Route::generic(&available)
            },
            UnitKind::Block(block) => match self.router.route(block, &available) {
                Ok(route) => route,
                Err(e) => return Extracted::failed(e),
            },
        };
        let route = self.with_preferred_candidate(route);

        let meta = unit.metadata();
        let ctx = CallContext {
            backends: &self.backends,
            policy: &self.retry,
            cancel: token,
            image: &image,
            meta: &meta,
        };

        if route.is_multi_candidate() {
            self.collect_and_merge(&ctx, &route).await
        } else {
            let candidate = fallback::run_chain(&ctx, &route.backends, route.operation).await;
            let accepted = match &candidate.error {
                Some(err) => Err(err.clone()),
                None => merge::prefer_first(std::slice::from_ref(&candidate))
                    .map(Accepted::from_candidate)
                    .map_err(UnitError::from),
            };
            Extracted::from_candidates(std::slice::from_ref(&candidate), accepted)
        }
    }

    async fn collect_and_merge(&self, ctx: &CallContext<'_>, route: &Route) -> Extracted {
        let (invoked, reserve) = route.backends.split_at(route.max_candidates);
        debug!(
            "{}: collecting candidates from {:?} ({})",
            ctx.meta.unit_id, invoked, route.operation
        );
        let mut candidates: Vec<BackendCandidate> = futures::future::join_all(
            invoked
                .iter()
                .map(|name| fallback::invoke(ctx, name, route.operation)),
        )
        .await;

        let accepted = match merge::merge(&self.merge_policy, &candidates, ctx).await {
            Ok(accepted) => {
                info!(
                    "{}: {} of {} candidates succeeded, accepted '{}'",
                    ctx.meta.unit_id,
                    candidates.iter().filter(|c| c.is_success()).count(),
                    candidates.len(),
                    accepted.backend
                );
                Ok(accepted)
            }
            Err(_) if ctx.cancel.is_cancelled() => Err(UnitError::Cancelled),
            Err(e @ MergeError::NoSuccessfulCandidates { .. }) if !reserve.is_empty() => {
                warn!(
                    "{}: {}; falling back to {:?}",
                    ctx.meta.unit_id, e, reserve
                );
                let last = fallback::run_chain(ctx, reserve, route.operation).await;
                let accepted = match &last.error {
                    None => Ok(Accepted::from_candidate(&last)),
                    Some(UnitError::Cancelled) => Err(UnitError::Cancelled),
                    Some(err) => Err(exhausted(&candidates, err)),
                };
                candidates.push(last);
                accepted
            }
            Err(e) => Err(UnitError::Merge(e)),
        };
        Extracted::from_candidates(&candidates, accepted)
    }

    /// Under `prefer_backend`, pull the preferred backend into the invoked
    /// candidates when priority order would leave it in the reserve.
    fn with_preferred_candidate(&self, mut route: Route) -> Route {
        let MergePolicy::PreferBackend { backend } = &self.merge_policy else {
            return route;
        };
        if !route.is_multi_candidate() {
            return route;
        }
        if let Some(pos) = route.backends.iter().position(|n| n == backend) {
            if pos >= route.max_candidates {
                let name = route.backends.remove(pos);
                route.backends.insert(route.max_candidates - 1, name);
            }
        }
        route
    }

    fn interrupted(&self, unit: &WorkUnit, position: usize, total: usize, why: Interruption) -> UnitResult {
        let mut result = base_result(unit);
        match why {
            Interruption::Cancelled => {
                result.status = UnitStatus::Cancelled;
                result.error = Some(UnitError::Cancelled);
            }
            Interruption::Panicked(detail) => {
                let err = UnitError::TaskPanicked { detail };
                self.progress
                    .on_unit_error(&unit.id(), position, total, &err.to_string());
                result.status = UnitStatus::Error;
                result.error = Some(err);
            }
        }
        result
    }
}

/// Every failure along the route: the candidates first, then the reserve chain.
fn exhausted(candidates: &[BackendCandidate], reserve_error: &UnitError) -> UnitError {
    let mut failures: Vec<BackendFailure> = candidates
        .iter()
        .filter_map(|c| match &c.error {
            Some(UnitError::Backend {
                backend,
                attempts,
                error,
            }) => Some(BackendFailure {
                backend: backend.clone(),
                attempts: *attempts,
                error: error.clone(),
            }),
            _ => None,
        })
        .collect();
    if let UnitError::FallbackExhausted { failures: rest } = reserve_error {
        failures.extend(rest.iter().cloned());
    }
    UnitError::FallbackExhausted { failures }
}

fn base_result(unit: &WorkUnit) -> UnitResult {
    UnitResult {
        unit_id: unit.id(),
        sequence: unit.sequence,
        page_index: unit.page_index,
        block_type: unit.block_type().cloned(),
        content: String::new(),
        status: UnitStatus::Error,
        backend_used: None,
        error: None,
        candidates: 0,
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: 0,
    }
}

/// Rasterise the unit on the blocking pool.
async fn render_unit(unit: &WorkUnit, renderer: Arc<dyn PageRenderer>) -> Result<RenderedImage, UnitError> {
    let (page_index, dpi) = (unit.page_index, unit.dpi);
    let region = match &unit.kind {
        UnitKind::Page => None,
        UnitKind::Block(block) => Some(block.bbox),
    };

    let joined = tokio::task::spawn_blocking(move || match region {
        None => renderer.render(page_index, dpi),
        Some(bbox) => renderer.render_region(page_index, bbox, dpi),
    })
    .await;

    match joined {
        Ok(Ok(image)) => Ok(image),
        Ok(Err(e)) => Err(UnitError::Rendering {
            detail: e.to_string(),
        }),
        Err(e) => Err(UnitError::Rendering {
            detail: format!("render task failed: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::backend::SpecializedVariant;
    use crate::error::BackendError;
    use crate::layout::{Block, BlockType, BoundingBox};
    use crate::orchestrator::router::RoutingRule;
    use crate::pipeline::render::RenderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeRenderer {
        pages: usize,
        broken_page: Option<usize>,
    }

    impl PageRenderer for FakeRenderer {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn render(&self, page_index: usize, _dpi: u32) -> Result<RenderedImage, RenderError> {
            if Some(page_index) == self.broken_page {
                return Err(RenderError::Decode("truncated stream".into()));
            }
            Ok(RenderedImage {
                png: vec![page_index as u8],
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
    }

    fn renderer(pages: usize) -> Arc<dyn PageRenderer> {
        Arc::new(FakeRenderer {
            pages,
            broken_page: None,
        })
    }

    fn pages(n: usize) -> Vec<WorkUnit> {
        let doc: Arc<str> = Arc::from("doc");
        (0..n).map(|i| WorkUnit::page(doc.clone(), i, i, 150)).collect()
    }

    fn set(backends: Vec<Arc<ScriptedBackend>>) -> Arc<BackendSet> {
        let mut set = BackendSet::new();
        for b in backends {
            set.insert(b).unwrap();
        }
        Arc::new(set)
    }

    fn config() -> ConversionConfig {
        ConversionConfig::builder()
            .max_retries(0)
            .initial_delay_ms(1)
            .max_delay_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn pages_succeed_in_order() {
        let orch = Orchestrator::new(&config(), set(vec![Arc::new(ScriptedBackend::ok("A", "text"))]));
        let results = orch
            .run(pages(3), renderer(3), &CancellationToken::new())
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["page-1", "page-2", "page-3"]);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(results[0].backend_used.as_deref(), Some("A"));
        assert_eq!(results[0].content, "text\n");
    }

    #[tokio::test]
    async fn rendering_failure_becomes_placeholder() {
        let orch = Orchestrator::new(&config(), set(vec![Arc::new(ScriptedBackend::ok("A", "x"))]));
        let renderer: Arc<dyn PageRenderer> = Arc::new(FakeRenderer {
            pages: 2,
            broken_page: Some(1),
        });
        let results = orch.run(pages(2), renderer, &CancellationToken::new()).await;

        assert_eq!(results[1].status, UnitStatus::Placeholder);
        assert!(matches!(results[1].error, Some(UnitError::Rendering { .. })));
        assert!(results[1].content.starts_with("> [!WARNING]\n> page 2"));
    }

    #[tokio::test]
    async fn skip_policy_leaves_content_empty() {
        let mut cfg = config();
        cfg.on_unit_error = UnitErrorPolicy::Skip;
        let orch = Orchestrator::new(
            &cfg,
            set(vec![Arc::new(ScriptedBackend::failing(
                "A",
                BackendError::Auth {
                    detail: "no key".into(),
                },
            ))]),
        );
        let results = orch.run(pages(1), renderer(1), &CancellationToken::new()).await;
        assert_eq!(results[0].status, UnitStatus::Skipped);
        assert!(results[0].content.is_empty());
        assert!(matches!(
            results[0].error,
            Some(UnitError::FallbackExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn raise_policy_stops_remaining_units() {
        let mut cfg = config();
        cfg.on_unit_error = UnitErrorPolicy::Raise;
        cfg.max_workers = 1;
        // The scripted failure is served first.
        let a = Arc::new(
            ScriptedBackend::ok("A", "fine").then(Err(BackendError::BadRequest {
                detail: "rejected".into(),
            })),
        );
        let orch = Orchestrator::new(&cfg, set(vec![a.clone()]));
        let cancel = CancellationToken::new();
        let results = orch.run(pages(3), renderer(3), &cancel).await;

        assert_eq!(results[0].status, UnitStatus::Error);
        assert_eq!(results[1].status, UnitStatus::Cancelled);
        assert_eq!(results[2].status, UnitStatus::Cancelled);
        assert_eq!(a.call_count(), 1);
        assert!(!cancel.is_cancelled(), "caller's token is untouched");
    }

    #[tokio::test]
    async fn page_candidates_are_merged() {
        let mut cfg = config();
        cfg.page_candidates = 3;
        cfg.merge_policy = MergePolicy::Vote { threshold: 0.9 };
        let orch = Orchestrator::new(
            &cfg,
            set(vec![
                Arc::new(ScriptedBackend::ok("A", "y")),
                Arc::new(ScriptedBackend::ok("B", "x")),
                Arc::new(ScriptedBackend::ok("C", "x")),
            ]),
        );
        let results = orch.run(pages(1), renderer(1), &CancellationToken::new()).await;

        assert_eq!(results[0].content, "x\n");
        assert_eq!(results[0].backend_used.as_deref(), Some("B"));
        assert_eq!(results[0].candidates, 3);
    }

    #[tokio::test]
    async fn all_candidates_failing_is_a_merge_error() {
        let mut cfg = config();
        cfg.page_candidates = 2;
        let err = BackendError::InvalidResponse {
            detail: "empty".into(),
        };
        let orch = Orchestrator::new(
            &cfg,
            set(vec![
                Arc::new(ScriptedBackend::failing("A", err.clone())),
                Arc::new(ScriptedBackend::failing("B", err)),
            ]),
        );
        let results = orch.run(pages(1), renderer(1), &CancellationToken::new()).await;
        assert_eq!(
            results[0].error,
            Some(UnitError::Merge(MergeError::NoSuccessfulCandidates { attempted: 2 }))
        );
    }

    #[tokio::test]
    async fn failed_candidates_fall_back_to_remaining_backends() {
        let mut cfg = config();
        cfg.page_candidates = 2;
        let refused = BackendError::Connection {
            detail: "refused".into(),
        };
        let c = Arc::new(ScriptedBackend::ok("C", "works"));
        let orch = Orchestrator::new(
            &cfg,
            set(vec![
                Arc::new(ScriptedBackend::failing("A", refused.clone())),
                Arc::new(ScriptedBackend::failing("B", refused)),
                c.clone(),
            ]),
        );
        let results = orch.run(pages(1), renderer(1), &CancellationToken::new()).await;

        assert_eq!(results[0].status, UnitStatus::Success);
        assert_eq!(results[0].backend_used.as_deref(), Some("C"));
        assert_eq!(results[0].content, "works\n");
        assert_eq!(results[0].candidates, 3);
        assert_eq!(c.call_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_route_lists_every_backend() {
        let mut cfg = config();
        cfg.page_candidates = 2;
        let err = BackendError::Auth {
            detail: "no key".into(),
        };
        let orch = Orchestrator::new(
            &cfg,
            set(vec![
                Arc::new(ScriptedBackend::failing("A", err.clone())),
                Arc::new(ScriptedBackend::failing("B", err.clone())),
                Arc::new(ScriptedBackend::failing("C", err)),
            ]),
        );
        let results = orch.run(pages(1), renderer(1), &CancellationToken::new()).await;

        assert_eq!(results[0].status, UnitStatus::Placeholder);
        let Some(UnitError::FallbackExhausted { failures }) = &results[0].error else {
            panic!("expected an exhausted chain, got {:?}", results[0].error);
        };
        let tried: Vec<&str> = failures.iter().map(|f| f.backend.as_str()).collect();
        assert_eq!(tried, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn preferred_backend_is_always_a_candidate() {
        let mut cfg = config();
        cfg.page_candidates = 2;
        cfg.merge_policy = MergePolicy::PreferBackend {
            backend: "C".into(),
        };
        let a = Arc::new(ScriptedBackend::ok("A", "from a"));
        let b = Arc::new(ScriptedBackend::ok("B", "from b"));
        let c = Arc::new(ScriptedBackend::ok("C", "from c"));
        let orch = Orchestrator::new(&cfg, set(vec![a.clone(), b.clone(), c.clone()]));
        let results = orch.run(pages(1), renderer(1), &CancellationToken::new()).await;

        assert_eq!(results[0].backend_used.as_deref(), Some("C"));
        assert_eq!(results[0].content, "from c\n");
        assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 0, 1));
    }

    #[tokio::test]
    async fn table_blocks_use_specialised_route() {
        let mut cfg = config();
        cfg.routing_rules = vec![RoutingRule::new(BlockType::Table, ["T"]).specialized()];
        let orch = Orchestrator::new(
            &cfg,
            set(vec![
                Arc::new(ScriptedBackend::ok("G", "prose")),
                Arc::new(ScriptedBackend::ok("T", "| a |")),
            ]),
        );
        let doc: Arc<str> = Arc::from("doc");
        let block = |id: &str, block_type| Block {
            id: id.into(),
            block_type,
            page_index: 0,
            bbox: BoundingBox::FULL_PAGE,
        };
        let units = vec![
            WorkUnit::block(doc.clone(), 0, block("p1-b0", BlockType::Text), 150),
            WorkUnit::block(doc.clone(), 1, block("p1-b1", BlockType::Table), 150),
        ];
        let results = orch.run(units, renderer(1), &CancellationToken::new()).await;

        assert_eq!(results[0].backend_used.as_deref(), Some("G"));
        assert_eq!(results[1].backend_used.as_deref(), Some("T"));
        assert_eq!(
            results[1].content,
            format!("[{}] | a |\n", SpecializedVariant::Table)
        );
    }

    #[tokio::test]
    async fn progress_events_cover_every_unit() {
        #[derive(Default)]
        struct Recorder {
            started: AtomicUsize,
            completed: AtomicUsize,
            errors: Mutex<Vec<String>>,
            finished: Mutex<Option<(usize, usize)>>,
        }
        impl crate::progress::ConversionProgressCallback for Recorder {
            fn on_unit_start(&self, _id: &str, _pos: usize, _total: usize) {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
            fn on_unit_complete(&self, _id: &str, _pos: usize, _total: usize, _b: &str, _len: usize) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            fn on_unit_error(&self, id: &str, _pos: usize, _total: usize, _e: &str) {
                self.errors.lock().unwrap().push(id.to_string());
            }
            fn on_conversion_complete(&self, total: usize, ok: usize) {
                *self.finished.lock().unwrap() = Some((total, ok));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let mut cfg = config();
        cfg.progress_callback = Some(recorder.clone());
        let backend = ScriptedBackend::ok("A", "ok")
            .then(Ok("ok".into()))
            .then(Ok("ok".into()))
            .then(Err(BackendError::Auth {
                detail: "revoked".into(),
            }));
        cfg.max_workers = 1;
        let orch = Orchestrator::new(&cfg, set(vec![Arc::new(backend)]));
        orch.run(pages(3), renderer(3), &CancellationToken::new()).await;

        assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 2);
        assert_eq!(*recorder.errors.lock().unwrap(), vec!["page-3".to_string()]);
        assert_eq!(*recorder.finished.lock().unwrap(), Some((3, 2)));
    }
}
