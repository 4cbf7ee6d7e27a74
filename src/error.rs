//! Error types for the edgequake-form2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FormError`] — **Fatal** for one call: the upload is rejected (bad
//!   input), the model is unreachable, or a store operation targets a record
//!   that does not exist. Returned as `Err(FormError)` from the pipeline and
//!   store APIs. No partial record is ever written when one is returned from
//!   an upload.
//!
//! * [`ExtractError`] — raised by a single extraction call for a single page.
//!   The orchestrator decides what it means: [`ExtractError::NoCredential`]
//!   switches the whole task into demo mode, everything else aborts the task
//!   as [`FormError::ExtractionUnavailable`].

use std::path::PathBuf;
use thiserror::Error;

/// Broad classification of a [`FormError`], used by callers that need to
/// map failures to a status code or exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller sent something we cannot process.
    Client,
    /// The addressed record does not exist.
    NotFound,
    /// Our fault or a dependency's fault; the caller did nothing wrong.
    Server,
}

/// All fatal errors returned by the edgequake-form2json library.
#[derive(Debug, Error)]
pub enum FormError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Declared or sniffed format is not PNG, JPEG or PDF.
    #[error("Unsupported format '{format}'. Allowed: .png, .jpg, .jpeg, .pdf")]
    UnsupportedFormat { format: String },

    /// Bytes could not be decoded or rasterised.
    #[error("Corrupt {format} input: {detail}")]
    CorruptInput { format: String, detail: String },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The remote model failed for one page; the whole task is aborted.
    #[error("Extraction unavailable on page {page}: {detail}")]
    ExtractionUnavailable { page: usize, detail: String },

    /// A named provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// A record already exists for this task id.
    #[error("A record already exists for task '{task_id}'")]
    DuplicateTask { task_id: String },

    /// No record with this id.
    #[error("Record {id} not found")]
    NotFound { id: i64 },

    /// No record for this task id.
    #[error("No result for task '{task_id}'")]
    TaskNotFound { task_id: String },

    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store lock was poisoned by a panicking thread.
    #[error("Record store lock poisoned")]
    LockPoisoned,

    /// A stored row could not be decoded back into a record.
    #[error("Record {id} is corrupt: {detail}")]
    CorruptRecord { id: i64, detail: String },

    /// A schema migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read or write a file under the data directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide to enable PDF uploads."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FormError {
    /// Classify the error as a client, not-found or server failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            FormError::UnsupportedFormat { .. }
            | FormError::CorruptInput { .. }
            | FormError::FileNotFound { .. }
            | FormError::InvalidConfig(_) => ErrorClass::Client,
            FormError::NotFound { .. } | FormError::TaskNotFound { .. } => ErrorClass::NotFound,
            _ => ErrorClass::Server,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FormError::Io {
            path: path.into(),
            source,
        }
    }
}

/// An error from a single extraction call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    /// No API credential is configured. Not a failure: selects demo mode.
    #[error("No API credential configured")]
    NoCredential,

    /// The call exceeded the configured timeout.
    #[error("Model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or body-read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// The service answered 2xx but the body carried no usable text.
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

impl ExtractError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::Timeout { .. } | ExtractError::Transport(_) => true,
            ExtractError::Http { status, .. } => *status == 429 || *status >= 500,
            ExtractError::NoCredential | ExtractError::MalformedResponse(_) => false,
        }
    }
}
