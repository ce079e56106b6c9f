//! Progress-callback trait for per-unit conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator processes each page or block. Callers can
//! forward them to a channel, a WebSocket or a terminal progress bar without
//! the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use hybrid_pdf2md::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, unit_id: &str, position: usize, total: usize, backend: &str, _len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{unit_id} ({position}/{total}) served by {backend}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each unit.
///
/// Up to `max_workers` units are in flight at once, so `on_unit_*` methods
/// may be called concurrently from different tasks. Protect shared state with
/// `Mutex` or atomics. Every method defaults to a no-op.
///
/// `position` is the unit's 1-indexed place in document order.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, before any unit is dispatched.
    fn on_conversion_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called when a unit is picked up by a worker.
    fn on_unit_start(&self, unit_id: &str, position: usize, total_units: usize) {
        let _ = (unit_id, position, total_units);
    }

    /// Called when a unit produced accepted content.
    ///
    /// * `backend`     — the backend whose content was accepted
    /// * `content_len` — byte length of the accepted Markdown
    fn on_unit_complete(
        &self,
        unit_id: &str,
        position: usize,
        total_units: usize,
        backend: &str,
        content_len: usize,
    ) {
        let _ = (unit_id, position, total_units, backend, content_len);
    }

    /// Called when a unit failed after retries, fallback and merging.
    fn on_unit_error(&self, unit_id: &str, position: usize, total_units: usize, error: &str) {
        let _ = (unit_id, position, total_units, error);
    }

    /// Called once after every unit has a result (including cancelled ones).
    fn on_conversion_complete(&self, total_units: usize, success_count: usize) {
        let _ = (total_units, success_count);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
