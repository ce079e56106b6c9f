//! Vision-language-model backend built on `edgequake-llm`.
//!
//! One [`VlmBackend`] wraps one configured provider/model pair. Every
//! operation is a single chat completion: a system prompt selected by the
//! operation, then a user turn carrying the page or region image as a base64
//! PNG. Provider failures are classified into [`BackendError`] so the retry
//! executor can tell a 429 from a bad API key.

use super::{OcrBackend, SpecializedVariant};
use crate::backend::BackendSpec;
use crate::error::{BackendError, Pdf2MdError};
use crate::output::Extraction;
use crate::pipeline::encode::to_image_data;
use crate::pipeline::render::RenderedImage;
use crate::prompts;
use crate::unit::UnitMetadata;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A backend that sends images to a vision LLM.
#[derive(Clone)]
pub struct VlmBackend {
    name: String,
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    system_prompt: Option<String>,
}

impl fmt::Debug for VlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmBackend")
            .field("name", &self.name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl VlmBackend {
    /// Wrap a pre-built provider. Temperature 0.1, 4096 max tokens.
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            temperature: 0.1,
            max_tokens: 4096,
            system_prompt: None,
        }
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    /// Override the generic page prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Build from a declarative spec; reads the provider's API key from the environment.
    pub fn from_spec(spec: &BackendSpec) -> Result<Self, Pdf2MdError> {
        let provider_name = spec.provider.as_deref().ok_or_else(|| {
            Pdf2MdError::BackendNotConfigured {
                backend: spec.name.clone(),
                hint: "a vlm backend needs `provider` (e.g. openai, anthropic, gemini, ollama)"
                    .to_string(),
            }
        })?;
        let model = spec.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let provider = create_provider(&spec.name, provider_name, model)?;

        let mut backend = Self::new(spec.name.clone(), provider);
        if let Some(t) = spec.temperature {
            backend = backend.with_temperature(t);
        }
        if let Some(n) = spec.max_tokens {
            backend = backend.with_max_tokens(n);
        }
        if let Some(ref p) = spec.system_prompt {
            backend = backend.with_system_prompt(p.clone());
        }
        Ok(backend)
    }

    /// Auto-detect a provider from the environment, most specific first:
    ///
    /// 1. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set,
    /// 2. OpenAI when `OPENAI_API_KEY` is present,
    /// 3. whatever [`ProviderFactory::from_env`] finds.
    pub fn from_env(name: impl Into<String>, model: Option<&str>) -> Result<Self, Pdf2MdError> {
        let name = name.into();

        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                let provider = create_provider(&name, &prov, model.unwrap_or(&env_model))?;
                return Ok(Self::new(name, provider));
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            let provider = create_provider(&name, "openai", model.unwrap_or(DEFAULT_MODEL))?;
            return Ok(Self::new(name, provider));
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| Pdf2MdError::BackendNotConfigured {
                backend: name.clone(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment.\n\
                     Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or declare backends explicitly.\n\
                     Error: {e}"
                ),
            })?;
        Ok(Self::new(name, provider))
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
        image: &RenderedImage,
        meta: &UnitMetadata,
    ) -> Result<Extraction, BackendError> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(user_text, vec![to_image_data(image)]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "{} [{}]: {} input tokens, {} output tokens",
            meta.unit_id, self.name, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(BackendError::InvalidResponse {
                detail: "model returned empty content".to_string(),
            });
        }

        Ok(Extraction {
            content: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

#[async_trait]
impl OcrBackend for VlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generic_extract(
        &self,
        image: &RenderedImage,
        meta: &UnitMetadata,
    ) -> Result<Extraction, BackendError> {
        let system = self
            .system_prompt
            .as_deref()
            .unwrap_or(prompts::PAGE_SYSTEM_PROMPT);
        self.complete(system, "", image, meta).await
    }

    async fn specialized_extract(
        &self,
        image: &RenderedImage,
        meta: &UnitMetadata,
        variant: SpecializedVariant,
    ) -> Result<Extraction, BackendError> {
        let system = match variant {
            SpecializedVariant::Table => prompts::TABLE_SYSTEM_PROMPT,
            SpecializedVariant::Formula => prompts::FORMULA_SYSTEM_PROMPT,
        };
        self.complete(system, "", image, meta).await
    }

    async fn arbitrate(
        &self,
        image: &RenderedImage,
        meta: &UnitMetadata,
        candidates: &[String],
    ) -> Result<Extraction, BackendError> {
        let user = prompts::arbitration_request(candidates);
        self.complete(prompts::ARBITRATION_SYSTEM_PROMPT, &user, image, meta)
            .await
    }
}

fn create_provider(
    backend: &str,
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2MdError::BackendNotConfigured {
            backend: backend.to_string(),
            hint: format!("provider '{provider_name}': {e}"),
        }
    })
}

static RE_RETRY_AFTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry[-_ ]?after\D{0,8}(\d+)").unwrap());

static RE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

/// Map a provider error message onto the backend error taxonomy.
///
/// Providers surface HTTP status codes and vendor phrases inconsistently,
/// so classification works on the rendered message. Anything unrecognised
/// is treated as a retryable server error.
pub fn classify_provider_error(message: &str) -> BackendError {
    let lower = message.to_lowercase();
    let status = RE_STATUS
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok());
    let detail = message.to_string();

    if status == Some(429)
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
    {
        let retry_after_secs = RE_RETRY_AFTER
            .captures(message)
            .and_then(|c| c[1].parse::<u64>().ok());
        return BackendError::RateLimited { retry_after_secs };
    }
    if matches!(status, Some(401) | Some(403))
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        return BackendError::Auth { detail };
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return BackendError::Timeout { secs: 0 };
    }
    if matches!(status, Some(400) | Some(404) | Some(413) | Some(422))
        || lower.contains("bad request")
        || lower.contains("invalid request")
    {
        return BackendError::BadRequest { detail };
    }
    if lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("dns")
        || lower.contains("network")
    {
        return BackendError::Connection { detail };
    }
    BackendError::Server { detail }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_with_hint() {
        let e = classify_provider_error("HTTP 429 Too Many Requests: retry-after: 12");
        assert_eq!(
            e,
            BackendError::RateLimited {
                retry_after_secs: Some(12)
            }
        );
    }

    #[test]
    fn classifies_rate_limit_without_hint() {
        let e = classify_provider_error("Rate limit exceeded for model");
        assert_eq!(
            e,
            BackendError::RateLimited {
                retry_after_secs: None
            }
        );
    }

    #[test]
    fn classifies_auth() {
        assert!(matches!(
            classify_provider_error("API error 401: Incorrect API key provided"),
            BackendError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("Unauthorized"),
            BackendError::Auth { .. }
        ));
    }

    #[test]
    fn classifies_bad_request_as_fatal() {
        let e = classify_provider_error("400 Bad Request: image too large");
        assert!(matches!(e, BackendError::BadRequest { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn classifies_connection_and_timeout_as_retryable() {
        let e = classify_provider_error("error sending request: connection refused");
        assert!(matches!(e, BackendError::Connection { .. }));
        assert!(e.is_retryable());
        assert!(classify_provider_error("request timed out").is_retryable());
    }

    #[test]
    fn unknown_errors_default_to_server() {
        let e = classify_provider_error("503 upstream overloaded");
        assert!(matches!(e, BackendError::Server { .. }));
        assert!(e.is_retryable());
    }
}
