//! Backend protocol, the backend set and the kind → constructor registry.
//!
//! A backend is one remote OCR/VLM service behind the [`OcrBackend`] trait.
//! Backends are addressed by a stable `name` in routing rules, priority
//! lists and merge policies; [`BackendSet`] owns the constructed instances
//! and [`BackendRegistry`] maps a backend *kind* (e.g. `"vlm"`) to the code
//! that builds it. The registry is an ordinary value passed around
//! explicitly, so adding a backend kind means registering a constructor, not
//! mutating shared state.

pub mod vlm;

use crate::error::{BackendError, Pdf2MdError};
use crate::output::Extraction;
use crate::pipeline::render::RenderedImage;
use crate::unit::UnitMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use vlm::VlmBackend;

/// Specialised extraction variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecializedVariant {
    /// Table → GFM pipe table (HTML when cells span).
    Table,
    /// Formula → LaTeX.
    Formula,
}

impl fmt::Display for SpecializedVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecializedVariant::Table => f.write_str("table"),
            SpecializedVariant::Formula => f.write_str("formula"),
        }
    }
}

/// Which backend operation a unit is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Generic,
    Specialized(SpecializedVariant),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Generic => f.write_str("generic"),
            Operation::Specialized(v) => write!(f, "specialized:{v}"),
        }
    }
}

/// One remote OCR service.
///
/// Implementations return a typed [`BackendError`] and never retry on their
/// own; retries, timeouts and fallback are applied by the orchestrator.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Stable identifier used in routing and merge configuration.
    fn name(&self) -> &str;

    /// Cheap connectivity/config check. Must not perform network I/O.
    fn is_available(&self) -> bool {
        true
    }

    /// Whole-page (or block-as-page) extraction to Markdown.
    async fn generic_extract(
        &self,
        image: &RenderedImage,
        meta: &UnitMetadata,
    ) -> Result<Extraction, BackendError>;

    /// Specialised extraction such as table structure or formula markup.
    async fn specialized_extract(
        &self,
        image: &RenderedImage,
        meta: &UnitMetadata,
        variant: SpecializedVariant,
    ) -> Result<Extraction, BackendError> {
        let _ = (image, meta);
        Err(BackendError::Unsupported {
            operation: format!("specialized:{variant}"),
        })
    }

    /// Pick or synthesise a final answer from competing candidates.
    async fn arbitrate(
        &self,
        image: &RenderedImage,
        meta: &UnitMetadata,
        candidates: &[String],
    ) -> Result<Extraction, BackendError> {
        let _ = (image, meta, candidates);
        Err(BackendError::Unsupported {
            operation: "arbitrate".to_string(),
        })
    }
}

/// Dispatch `operation` to the matching trait method.
pub async fn run_operation(
    backend: &dyn OcrBackend,
    operation: Operation,
    image: &RenderedImage,
    meta: &UnitMetadata,
) -> Result<Extraction, BackendError> {
    match operation {
        Operation::Generic => backend.generic_extract(image, meta).await,
        Operation::Specialized(variant) => backend.specialized_extract(image, meta, variant).await,
    }
}

/// Declarative description of a backend to construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub name: String,
    /// Registry kind. Default: `"vlm"`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Provider name understood by the kind, e.g. `openai`, `ollama`.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_kind() -> String {
    "vlm".to_string()
}

impl BackendSpec {
    pub fn vlm(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            provider: Some(provider.into()),
            model: Some(model.into()),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }

    /// Parse the CLI shorthand `name=provider:model` (model optional).
    pub fn parse_shorthand(s: &str) -> Result<Self, Pdf2MdError> {
        let (name, rest) = s.split_once('=').ok_or_else(|| {
            Pdf2MdError::InvalidConfig(format!("backend '{s}' must look like name=provider:model"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Pdf2MdError::InvalidConfig(format!("backend '{s}' has an empty name")));
        }
        let (provider, model) = match rest.split_once(':') {
            Some((p, m)) => (p.trim(), Some(m.trim().to_string())),
            None => (rest.trim(), None),
        };
        Ok(Self {
            name: name.to_string(),
            kind: default_kind(),
            provider: Some(provider.to_string()),
            model: model.filter(|m| !m.is_empty()),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        })
    }
}

/// Ordered, name-unique set of constructed backends.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: Vec<Arc<dyn OcrBackend>>,
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend; names must be unique.
    pub fn insert(&mut self, backend: Arc<dyn OcrBackend>) -> Result<(), Pdf2MdError> {
        if self.get(backend.name()).is_some() {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "backend '{}' is registered twice",
                backend.name()
            )));
        }
        self.backends.push(backend);
        Ok(())
    }

    pub fn with(mut self, backend: Arc<dyn OcrBackend>) -> Result<Self, Pdf2MdError> {
        self.insert(backend)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn OcrBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Names of available backends, ordered by `priority` first and
    /// registration order for the rest.
    pub fn available_names(&self, priority: &[String]) -> Vec<String> {
        let mut ordered: Vec<String> = priority
            .iter()
            .filter(|n| self.get(n).is_some_and(|b| b.is_available()))
            .cloned()
            .collect();
        for backend in &self.backends {
            let name = backend.name();
            if backend.is_available() && !ordered.iter().any(|n| n == name) {
                ordered.push(name.to_string());
            }
        }
        ordered
    }
}

/// Constructor for one backend kind.
pub type BackendConstructor =
    Arc<dyn Fn(&BackendSpec) -> Result<Arc<dyn OcrBackend>, Pdf2MdError> + Send + Sync>;

/// Explicit kind → constructor map.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `vlm` kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("vlm", Arc::new(|spec: &BackendSpec| {
            VlmBackend::from_spec(spec).map(|b| Arc::new(b) as Arc<dyn OcrBackend>)
        }));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, constructor: BackendConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct every spec, preserving declaration order.
    pub fn build(&self, specs: &[BackendSpec]) -> Result<BackendSet, Pdf2MdError> {
        let mut set = BackendSet::new();
        for spec in specs {
            let ctor = self.constructors.get(&spec.kind).ok_or_else(|| {
                Pdf2MdError::BackendNotConfigured {
                    backend: spec.name.clone(),
                    hint: format!(
                        "unknown backend kind '{}' (known: {})",
                        spec.kind,
                        self.kinds().join(", ")
                    ),
                }
            })?;
            let backend = ctor(spec)?;
            debug!("Constructed backend '{}' (kind {})", spec.name, spec.kind);
            set.insert(backend)?;
        }
        Ok(set)
    }
}
