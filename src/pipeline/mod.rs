//! Pipeline stages for handwritten-form extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm/router ──▶ parse
//! (kind)    (pages)    (base64)   (VLM text)     (fields)
//! ```
//!
//! 1. [`input`]  — decide PNG / JPEG / PDF from name, content type or bytes
//! 2. [`render`] — decode images, rasterise PDFs; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`] — compress and base64-wrap each page for the request body
//! 4. [`llm`]    — pick a backend and drive it with timeout and retry; the
//!    only stage with network I/O, together with [`router`]
//! 5. [`parse`]  — recover label/value fields from whatever the model said

pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
pub mod router;
