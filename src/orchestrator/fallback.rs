//! Fallback chain: try backends in order until one produces content.
//!
//! Each backend gets its own run of the retry executor. A backend whose
//! retries are exhausted, that fails fatally (bad key, bad request, unusable
//! response), or that is missing or unavailable is recorded as a
//! [`BackendFailure`] and the chain moves on. Fatal errors only disqualify the
//! backend that raised them.

use super::retry::{self, RetryPolicy};
use crate::backend::{run_operation, BackendSet, Operation};
use crate::error::{BackendError, BackendFailure, UnitError};
use crate::output::{BackendCandidate, Extraction};
use crate::pipeline::render::RenderedImage;
use crate::unit::UnitMetadata;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a backend call for one unit needs.
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub backends: &'a BackendSet,
    pub policy: &'a RetryPolicy,
    pub cancel: &'a CancellationToken,
    pub image: &'a RenderedImage,
    pub meta: &'a UnitMetadata,
}

/// One backend, with retries. Failure details are kept for chain reports.
async fn attempt_backend(
    ctx: &CallContext<'_>,
    name: &str,
    operation: Operation,
) -> Result<Extraction, BackendFailure> {
    let failure = |attempts, error| BackendFailure {
        backend: name.to_string(),
        attempts,
        error,
    };

    let Some(backend) = ctx.backends.get(name) else {
        return Err(failure(
            0,
            BackendError::Unavailable {
                detail: format!("backend '{name}' is not registered"),
            },
        ));
    };
    if !backend.is_available() {
        return Err(failure(
            0,
            BackendError::Unavailable {
                detail: format!("backend '{name}' reports itself unavailable"),
            },
        ));
    }

    let label = format!("{} [{}]", ctx.meta.unit_id, name);
    debug!("{}: {} operation", label, operation);
    let outcome = retry::execute(ctx.policy, &label, ctx.cancel, || {
        run_operation(backend.as_ref(), operation, ctx.image, ctx.meta)
    })
    .await;

    outcome.result.map_err(|e| failure(outcome.attempts, e))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Run a single backend and wrap the outcome as a candidate.
///
/// Used when several backends are queried for the same unit and each
/// produces its own candidate for the merger.
pub async fn invoke(ctx: &CallContext<'_>, name: &str, operation: Operation) -> BackendCandidate {
    let start = Instant::now();
    match attempt_backend(ctx, name, operation).await {
        Ok(extraction) => {
            debug!("{}: candidate from '{}'", ctx.meta.unit_id, name);
            BackendCandidate::success(name, extraction, elapsed_ms(start))
        }
        Err(f) if f.error == BackendError::Cancelled => {
            BackendCandidate::failure(name, UnitError::Cancelled, elapsed_ms(start))
        }
        Err(f) => {
            warn!("{}: backend '{}' failed — {}", ctx.meta.unit_id, name, f.error);
            let error = UnitError::Backend {
                backend: f.backend,
                attempts: f.attempts,
                error: f.error,
            };
            BackendCandidate::failure(name, error, elapsed_ms(start))
        }
    }
}

/// Try `order` front to back; return the first success.
///
/// On total failure the candidate carries [`UnitError::FallbackExhausted`]
/// listing every backend's failure, and `backend_name` is the last backend
/// tried. Cancellation stops the chain immediately.
pub async fn run_chain(
    ctx: &CallContext<'_>,
    order: &[String],
    operation: Operation,
) -> BackendCandidate {
    let start = Instant::now();
    let mut failures: Vec<BackendFailure> = Vec::new();

    for (position, name) in order.iter().enumerate() {
        match attempt_backend(ctx, name, operation).await {
            Ok(extraction) => {
                info!(
                    "{} served by backend '{}'{}",
                    ctx.meta.unit_id,
                    name,
                    if position > 0 { " (fallback)" } else { "" }
                );
                return BackendCandidate::success(name.as_str(), extraction, elapsed_ms(start));
            }
            Err(f) if f.error == BackendError::Cancelled => {
                return BackendCandidate::failure(name.as_str(), UnitError::Cancelled, elapsed_ms(start));
            }
            Err(f) => {
                if let Some(next) = order.get(position + 1) {
                    warn!(
                        "{}: backend '{}' failed — {}; falling back to '{}'",
                        ctx.meta.unit_id, name, f.error, next
                    );
                } else {
                    warn!(
                        "{}: backend '{}' failed — {}; no backends left",
                        ctx.meta.unit_id, name, f.error
                    );
                }
                failures.push(f);
            }
        }
    }

    let last = order.last().map(String::as_str).unwrap_or("none");
    BackendCandidate::failure(
        last,
        UnitError::FallbackExhausted { failures },
        elapsed_ms(start),
    )
}
