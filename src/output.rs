//! Output types: candidates, per-unit results and the document-level result.

use crate::error::{Pdf2MdError, UnitError};
use crate::layout::BlockType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text produced by one successful backend call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Extraction {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Success,
    Error,
}

/// One backend's attempt at producing content for one unit.
///
/// A list of candidates is ordered by invocation, not by quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCandidate {
    /// Backend that served the request (the last one tried on failure).
    pub backend_name: String,
    pub status: CandidateStatus,
    pub content: String,
    pub error: Option<UnitError>,
    pub latency_ms: u64,
    pub score: Option<f64>,
    /// Tokens consumed by every call behind this candidate, failures included.
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl BackendCandidate {
    pub fn success(backend: impl Into<String>, extraction: Extraction, latency_ms: u64) -> Self {
        Self {
            backend_name: backend.into(),
            status: CandidateStatus::Success,
            content: extraction.content,
            error: None,
            latency_ms,
            score: None,
            input_tokens: extraction.input_tokens,
            output_tokens: extraction.output_tokens,
        }
    }

    pub fn failure(backend: impl Into<String>, error: UnitError, latency_ms: u64) -> Self {
        Self {
            backend_name: backend.into(),
            status: CandidateStatus::Error,
            content: String::new(),
            error: Some(error),
            latency_ms,
            score: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CandidateStatus::Success
    }
}

/// Final status of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    /// Failed; a visible marker stands in for the content.
    Placeholder,
    /// Failed; omitted from the assembled content.
    Skipped,
    /// Failed under `on_unit_error = raise`, or the task panicked.
    Error,
    /// Never started, or interrupted, because the conversion was cancelled.
    Cancelled,
}

/// The accepted outcome for one unit. Exactly one exists per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: String,
    pub sequence: usize,
    /// 0-based page index the unit belongs to.
    pub page_index: usize,
    pub block_type: Option<BlockType>,
    pub content: String,
    pub status: UnitStatus,
    pub backend_used: Option<String>,
    pub error: Option<UnitError>,
    /// Number of candidates collected for the unit.
    pub candidates: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

impl UnitResult {
    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Success
    }
}

/// Document metadata extracted from the PDF info dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Per-status counts and backend usage for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub successful_units: usize,
    pub placeholder_units: usize,
    pub skipped_units: usize,
    pub failed_units: usize,
    pub cancelled_units: usize,
    /// Backend name → units it actually served.
    pub backend_usage: BTreeMap<String, usize>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub duration_ms: u64,
}

/// How a conversion went overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Every unit succeeded.
    Complete,
    /// At least one unit succeeded and at least one did not.
    Degraded,
    /// No unit succeeded.
    Failed,
}

/// The document-level output. Built once per conversion, owned by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub doc_id: String,
    /// Results ordered by `sequence`.
    pub units: Vec<UnitResult>,
    pub content: String,
    pub total_units: usize,
    pub successful_units: usize,
    pub summary: ConversionSummary,
    pub metadata: DocumentMetadata,
    /// The caller cancelled before every unit finished.
    pub cancelled: bool,
}

impl ConversionResult {
    pub fn outcome(&self) -> ConversionOutcome {
        if self.total_units > 0 && self.successful_units == self.total_units {
            ConversionOutcome::Complete
        } else if self.successful_units > 0 {
            ConversionOutcome::Degraded
        } else {
            ConversionOutcome::Failed
        }
    }

    /// Treat any non-successful unit as an error.
    pub fn into_result(self) -> Result<Self, Pdf2MdError> {
        match self.outcome() {
            ConversionOutcome::Complete => Ok(self),
            ConversionOutcome::Degraded => Err(Pdf2MdError::PartialFailure {
                success: self.successful_units,
                failed: self.total_units - self.successful_units,
                total: self.total_units,
            }),
            ConversionOutcome::Failed => {
                let first_error = self
                    .units
                    .iter()
                    .find_map(|u| u.error.as_ref())
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no units to convert".to_string());
                Err(Pdf2MdError::AllUnitsFailed {
                    total: self.total_units,
                    first_error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(successful: usize, total: usize) -> ConversionResult {
        ConversionResult {
            doc_id: "doc".into(),
            units: Vec::new(),
            content: String::new(),
            total_units: total,
            successful_units: successful,
            summary: ConversionSummary::default(),
            metadata: DocumentMetadata::default(),
            cancelled: false,
        }
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(result_with(3, 3).outcome(), ConversionOutcome::Complete);
        assert_eq!(result_with(2, 3).outcome(), ConversionOutcome::Degraded);
        assert_eq!(result_with(0, 3).outcome(), ConversionOutcome::Failed);
        assert_eq!(result_with(0, 0).outcome(), ConversionOutcome::Failed);
    }

    #[test]
    fn into_result_reports_partial_failure() {
        let err = result_with(4, 5).into_result().unwrap_err();
        assert!(matches!(
            err,
            Pdf2MdError::PartialFailure {
                success: 4,
                failed: 1,
                total: 5
            }
        ));
    }

    #[test]
    fn unit_status_serialises_snake_case() {
        let json = serde_json::to_string(&UnitStatus::Placeholder).unwrap();
        assert_eq!(json, "\"placeholder\"");
    }
}
