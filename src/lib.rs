//! # edgequake-form2json
//!
//! Extract label/value fields from photographed or scanned handwritten
//! forms using Vision Language Models (VLMs).
//!
//! ## Pipeline Overview
//!
//! ```text
//! PNG / JPEG / PDF
//!  │
//!  ├─ 1. Detect     extension → content type → magic bytes
//!  ├─ 2. Normalize  decode image or rasterise PDF pages (spawn_blocking)
//!  ├─ 3. Encode     JPEG/PNG → base64
//!  ├─ 4. Extract    one VLM call per page, bounded concurrency + retry
//!  ├─ 5. Parse      strict JSON → embedded JSON → `label: value` lines → raw text
//!  └─ 6. Store      one SQLite record per upload, addressed by task id
//! ```
//!
//! Without any credential the pipeline runs in **demo mode**: no network call
//! is made and every upload stores the same fixed payload
//! ([`StructuredPayload::demo`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_form2json::{ExtractionConfig, FormPipeline, RecordStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential read from HUGGINGFACE_API_KEY / HF_TOKEN, demo mode otherwise.
//!     let config = ExtractionConfig::from_env();
//!     let store = RecordStore::open("form2json-data/records.db".as_ref())?;
//!     let pipeline = FormPipeline::new(config, store)?;
//!
//!     let receipt = pipeline.upload_file("intake-form.jpg").await?;
//!     let record = pipeline.result(&receipt.task_id)?;
//!     for field in &record.raw_json.fields {
//!         println!("{}: {}", field.label, field.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `form2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! PDF uploads need a pdfium shared library, found through `PDFIUM_LIB_PATH`
//! or the system library path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifacts;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifacts::ArtifactStore;
pub use config::{ExtractionConfig, ExtractionConfigBuilder, ImageEncoding};
pub use error::{ErrorClass, ExtractError, FormError};
pub use extract::{FormPipeline, Upload};
pub use output::{Field, Record, StructuredPayload, UploadReceipt, UploadTask};
pub use pipeline::llm::{resolve_extractor, DemoClient, FieldExtractor};
pub use pipeline::parse::{parse_fields, ParseStrategy, ParsedFields};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::RecordStore;
