//! Result assembler: ordered unit results → one Markdown document + summary.
//!
//! Pure functions. Writing the document anywhere is the caller's job.

use crate::config::PageSeparator;
use crate::error::UnitError;
use crate::output::{ConversionSummary, UnitResult, UnitStatus};

/// Visible marker standing in for a unit that could not be converted.
///
/// Rendered as a GitHub alert so it survives any Markdown viewer:
///
/// ```text
/// > [!WARNING]
/// > page 3 could not be converted: all backends failed: …
/// ```
pub fn placeholder(label: &str, error: &UnitError) -> String {
    let reason = error.to_string().replace(['\r', '\n'], " ");
    format!("> [!WARNING]\n> {label} could not be converted: {reason}")
}

/// Join unit contents in the given order.
///
/// Only units that carry content (`success` and `placeholder`) are emitted.
/// `separator` decides what goes before each page's first unit; units on the
/// same page are separated by a blank line. The result ends with exactly one
/// newline, or is empty when nothing was emitted.
pub fn assemble(units: &[UnitResult], separator: &PageSeparator) -> String {
    let mut out = String::new();
    let mut current_page: Option<usize> = None;

    for unit in units {
        if !matches!(unit.status, UnitStatus::Success | UnitStatus::Placeholder) {
            continue;
        }
        let content = unit.content.trim();
        if content.is_empty() {
            continue;
        }

        match current_page {
            Some(page) if page == unit.page_index => out.push_str("\n\n"),
            _ => out.push_str(&separator.boundary(unit.page_index + 1, current_page.is_none())),
        }
        current_page = Some(unit.page_index);
        out.push_str(content);
    }

    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Count units by status and tally which backend served each success.
///
/// `duration_ms` is left at zero for the caller to fill in.
pub fn summarize(units: &[UnitResult]) -> ConversionSummary {
    let mut summary = ConversionSummary::default();

    for unit in units {
        match unit.status {
            UnitStatus::Success => summary.successful_units += 1,
            UnitStatus::Placeholder => summary.placeholder_units += 1,
            UnitStatus::Skipped => summary.skipped_units += 1,
            UnitStatus::Error => summary.failed_units += 1,
            UnitStatus::Cancelled => summary.cancelled_units += 1,
        }
        if unit.status == UnitStatus::Success {
            if let Some(backend) = &unit.backend_used {
                *summary.backend_usage.entry(backend.clone()).or_default() += 1;
            }
        }
        summary.total_input_tokens += unit.input_tokens as u64;
        summary.total_output_tokens += unit.output_tokens as u64;
    }

    summary
}
