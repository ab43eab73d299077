//! Pipeline stages for ZPL-to-PDF conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and the network or PDF backends can be swapped without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ segment ──▶ render ──▶ assemble
//! (text/zip)  (units)   (HTTP/retry) (merge + store)
//! ```
//!
//! 1. [`input`]    — decode pasted text, a plain upload or a ZIP member
//! 2. [`segment`]  — split the markup into independently renderable units,
//!    keeping graphics downloads together with the labels that recall them
//! 3. [`render`]   — one unit → one PDF page, with the per-unit retry policy;
//!    [`labelary`] is the production backend
//! 4. [`assemble`] — merge pages in order (pdfium, `spawn_blocking`) and store
//!    the result atomically

pub mod assemble;
pub mod input;
pub mod labelary;
pub mod render;
pub mod segment;
