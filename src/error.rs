//! Error types for the hybrid-pdf2md library.
//!
//! Four error types map onto four distinct scopes:
//!
//! * [`Pdf2MdError`] — **Fatal**: the conversion cannot proceed at all
//!   (bad input file, invalid configuration, renderer unavailable, or a unit
//!   failed while `on_unit_error = raise`). Returned as `Err(Pdf2MdError)`
//!   from the top-level `convert*` functions.
//!
//! * [`UnitError`] — **Non-fatal**: one page or block could not be
//!   extracted. Stored in [`crate::output::UnitResult`] so callers can
//!   inspect partial success rather than losing the whole document.
//!
//! * [`BackendError`] — the typed failure of a single backend call. The retry
//!   executor and the fallback chain branch on [`BackendError::is_retryable`].
//!
//! * [`MergeError`] — no candidate survived for a multi-backend unit.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the hybrid-pdf2md library.
///
/// Unit-level failures use [`UnitError`] and are stored in
/// [`crate::output::UnitResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// The layout segmenter could not analyse the document.
    #[error("Layout segmentation failed: {0}")]
    SegmentationFailed(String),

    // ── Backend errors ────────────────────────────────────────────────────
    /// A backend could not be constructed (missing API key, unknown kind).
    #[error("Backend '{backend}' is not configured.\n{hint}")]
    BackendNotConfigured { backend: String, hint: String },

    // ── Outcome errors ────────────────────────────────────────────────────
    /// `on_unit_error = raise` and a unit exhausted its fallback chain.
    #[error("Conversion aborted: unit {unit_id} failed: {source}")]
    UnitFailed {
        unit_id: String,
        #[source]
        source: UnitError,
    },

    /// Every unit failed; output would be empty.
    #[error("All {total} units failed.\nFirst error: {first_error}")]
    AllUnitsFailed { total: usize, first_error: String },

    /// Some units succeeded but at least one degraded.
    ///
    /// Returned by [`crate::output::ConversionResult::into_result`] when
    /// the caller wants to treat any unit failure as an error.
    #[error("{failed}/{total} units failed during conversion")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read a configuration file.
    #[error("Failed to read config file '{path}': {detail}")]
    ConfigFile { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration or input validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of one call against one backend.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendError {
    /// Network-level failure (DNS, refused, reset).
    #[error("connection failed: {detail}")]
    Connection { detail: String },

    /// The call exceeded the per-call timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429 or an explicit quota signal.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// 5xx-equivalent failure on the remote side.
    #[error("server error: {detail}")]
    Server { detail: String },

    /// 401/403 — the credentials are wrong or missing.
    #[error("authentication failed: {detail}")]
    Auth { detail: String },

    /// The request was rejected as malformed.
    #[error("bad request: {detail}")]
    BadRequest { detail: String },

    /// The backend answered but the content is unusable.
    #[error("invalid response: {detail}")]
    InvalidResponse { detail: String },

    /// The backend does not implement the requested operation.
    #[error("operation '{operation}' is not supported")]
    Unsupported { operation: String },

    /// The backend is not registered or reports itself unavailable.
    #[error("backend unavailable: {detail}")]
    Unavailable { detail: String },

    /// The conversion was cancelled while the call was pending.
    #[error("cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether the retry executor should try the same backend again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Connection { .. }
                | BackendError::Timeout { .. }
                | BackendError::RateLimited { .. }
                | BackendError::Server { .. }
        )
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// One backend's failure inside an exhausted fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: String,
    pub attempts: u32,
    pub error: BackendError,
}

/// No candidate is available to merge.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum MergeError {
    #[error("no successful candidates to merge ({attempted} attempted)")]
    NoSuccessfulCandidates { attempted: usize },

    /// The off-runtime vote task did not finish.
    #[error("vote aborted: {detail}")]
    Aborted { detail: String },
}

/// A non-fatal error for a single work unit.
///
/// Stored alongside [`crate::output::UnitResult`] when a unit fails.
/// The overall conversion continues unless `on_unit_error = raise`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum UnitError {
    /// The page or region could not be rasterised. Never retried.
    #[error("rendering failed: {detail}")]
    Rendering { detail: String },

    /// A single backend failed (used on per-backend candidates).
    #[error("backend '{backend}' failed after {attempts} attempt(s): {error}")]
    Backend {
        backend: String,
        attempts: u32,
        error: BackendError,
    },

    /// Every backend in the chain failed.
    #[error("all backends failed: {}", format_failures(.failures))]
    FallbackExhausted { failures: Vec<BackendFailure> },

    /// No usable backend for this block type.
    #[error("no usable backend for block type '{block_type}'")]
    Routing { block_type: String },

    /// Candidates were collected but none could be accepted.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The unit was never started or was interrupted by cancellation.
    #[error("cancelled before completion")]
    Cancelled,

    /// The unit task panicked; the rest of the batch is unaffected.
    #[error("unit task panicked: {detail}")]
    TaskPanicked { detail: String },
}

fn format_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends were tried".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({})", f.backend, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
