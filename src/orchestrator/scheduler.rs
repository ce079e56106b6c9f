//! Concurrency scheduler: bounded fan-out, ordered fan-in.
//!
//! At most `max_workers` unit tasks are polled at once through
//! `buffer_unordered`. Each task is tagged with its input position and its
//! result lands in that slot, so the output order is the input order no
//! matter which unit finishes first. A panicking task is caught and turned
//! into a result by the caller-supplied `interrupted` function; the rest of
//! the batch carries on. Once the token is cancelled, units that have not
//! started yet are not processed at all.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Why a unit did not produce a normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// The conversion was cancelled before the unit started.
    Cancelled,
    /// The unit task panicked with this message.
    Panicked(String),
}

/// Run `process` over `units` with at most `max_workers` in flight.
///
/// Returns exactly one result per unit, in input order.
pub async fn run_ordered<U, R, P, Fut, I>(
    units: Vec<U>,
    max_workers: usize,
    cancel: &CancellationToken,
    process: P,
    interrupted: I,
) -> Vec<R>
where
    U: Clone,
    P: Fn(U) -> Fut,
    Fut: Future<Output = R>,
    I: Fn(&U, Interruption) -> R,
{
    let total = units.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = max_workers.clamp(1, total);
    debug!("Scheduling {} units on {} workers", total, workers);

    let process = &process;
    let interrupted = &interrupted;

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    let mut results = stream::iter(units.into_iter().enumerate())
        .map(|(position, unit)| async move {
            if cancel.is_cancelled() {
                return (position, interrupted(&unit, Interruption::Cancelled));
            }
            let outcome = AssertUnwindSafe(process(unit.clone())).catch_unwind().await;
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Unit task {} panicked: {}", position, message);
                    interrupted(&unit, Interruption::Panicked(message))
                }
            };
            (position, result)
        })
        .buffer_unordered(workers);

    while let Some((position, result)) = results.next().await {
        slots[position] = Some(result);
    }

    slots.into_iter().flatten().collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
