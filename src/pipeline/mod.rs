//! Collaborators around the orchestration core.
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ (backends) ──▶ postprocess
//! (URL/path)  (pdfium)  (base64)                  (cleanup)
//! ```
//!
//! 1. [`input`]  — canonicalise a path, URL or byte buffer to a local PDF
//! 2. [`render`] — rasterise pages and regions; blocking, called through
//!    `spawn_blocking`
//! 3. [`encode`] — PNG-encode images and wrap them for multimodal requests
//! 4. [`postprocess`] — deterministic cleanup of accepted unit content

pub mod encode;
pub mod input;
pub mod postprocess;
pub mod render;
