//! Upload orchestration: one upload in, one stored record out.
//!
//! ```text
//! detect ─▶ normalize ─▶ credential? ─┬─ no  ─▶ demo payload ──────────────┐
//!                                     └─ yes ─▶ encode ─▶ extract+parse ─▶ merge
//!                                                                            │
//!                          receipt ◀─ commit artifacts ◀─ store.create ◀─ stage
//! ```
//!
//! The record insert is the last fallible step and happens without an await
//! point. Dropping the upload future before it completes therefore never
//! leaves a record behind, and the staged artifacts are removed by their
//! drop guard.

use crate::artifacts::ArtifactStore;
use crate::config::{ExtractionConfig, ImageEncoding};
use crate::error::{ExtractError, FormError};
use crate::output::{Field, Record, StructuredPayload, UploadReceipt, UploadTask};
use crate::pipeline::encode::{encode_page, EncodedImage};
use crate::pipeline::input::detect_kind;
use crate::pipeline::llm::{resolve_extractor, FieldExtractor};
use crate::pipeline::parse::{merge_pages, parse_fields, RAW_TEXT_LABEL};
use crate::pipeline::render::{normalize, PageImage};
use crate::store::RecordStore;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// One uploaded file.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Client-supplied file name; only its extension is used.
    pub filename: Option<String>,
    /// Declared MIME type, if any.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk, keeping its name for format detection.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, FormError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FormError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                FormError::io(path, e)
            }
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self {
            filename,
            content_type: None,
            bytes,
        })
    }
}

/// Drives uploads through normalisation, extraction, parsing and storage.
///
/// Cheap to share behind an `Arc`; uploads may run concurrently.
pub struct FormPipeline {
    extractor: Arc<dyn FieldExtractor>,
    store: RecordStore,
    artifacts: Option<ArtifactStore>,
    config: ExtractionConfig,
}

impl FormPipeline {
    /// Build a pipeline with the backend selected from `config`.
    pub fn new(config: ExtractionConfig, store: RecordStore) -> Result<Self, FormError> {
        let extractor = resolve_extractor(&config)?;
        Ok(Self::with_extractor(config, store, extractor))
    }

    /// Build a pipeline around an explicit backend.
    pub fn with_extractor(
        config: ExtractionConfig,
        store: RecordStore,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self {
            extractor,
            store,
            artifacts: None,
            config,
        }
    }

    /// Also keep the upload and result JSON on disk.
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// True when uploads will store the demo payload.
    pub fn is_demo(&self) -> bool {
        matches!(
            self.extractor.check_credential(),
            Err(ExtractError::NoCredential)
        )
    }

    /// Process one upload and store its record.
    ///
    /// # Errors
    /// - [`FormError::UnsupportedFormat`] / [`FormError::CorruptInput`] — bad input
    /// - [`FormError::ExtractionUnavailable`] — the model failed on some page
    /// - store and I/O errors
    ///
    /// No record exists for the task on any error.
    pub async fn upload(&self, upload: Upload) -> Result<UploadReceipt, FormError> {
        let task = UploadTask::new();
        let span = info_span!("task", task_id = %task.task_id);
        self.run(task, upload).instrument(span).await
    }

    /// Read `path` and process it as one upload.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<UploadReceipt, FormError> {
        let upload = Upload::from_path(path).await?;
        self.upload(upload).await
    }

    /// The record produced by `task_id`.
    pub fn result(&self, task_id: &str) -> Result<Record, FormError> {
        self.store.get_by_task(task_id)
    }

    async fn run(&self, task: UploadTask, upload: Upload) -> Result<UploadReceipt, FormError> {
        let start = Instant::now();
        let kind = detect_kind(
            upload.filename.as_deref(),
            upload.content_type.as_deref(),
            &upload.bytes,
        )?;
        info!("Upload accepted: {} ({} bytes)", kind, upload.bytes.len());

        let pages = normalize(kind, &upload.bytes, self.config.max_rendered_pixels).await?;
        let page_count = pages.len();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_task_start(&task.task_id, page_count);
        }

        let (payload, demo) = match self.extractor.check_credential() {
            Err(ExtractError::NoCredential) => {
                info!("No credential configured; storing demo payload");
                (StructuredPayload::demo(), true)
            }
            Err(e) => {
                return Err(FormError::ExtractionUnavailable {
                    page: 1,
                    detail: e.to_string(),
                })
            }
            Ok(()) => {
                let encoded = encode_pages(pages, self.config.image_encoding).await?;
                let fields = self.extract_pages(&encoded).await?;
                (StructuredPayload::new(fields), false)
            }
        };

        // Every stored record carries at least one field.
        let payload = if payload.is_empty() {
            StructuredPayload::new(vec![Field::new(RAW_TEXT_LABEL, "")])
        } else {
            payload
        };

        let staged = match &self.artifacts {
            Some(artifacts) => Some(artifacts.stage(
                &task.task_id,
                kind.extension(),
                &upload.bytes,
                &payload,
            )?),
            None => None,
        };

        let record = self.store.create(&task.task_id, &payload).map_err(|e| {
            if let FormError::DuplicateTask { .. } = e {
                error!("Task id collision: {}", e);
            }
            e
        })?;

        if let Some(staged) = staged {
            staged.commit();
        }
        if let Some(cb) = &self.config.progress_callback {
            cb.on_task_complete(&task.task_id, record.raw_json.len());
        }

        info!(
            "Stored record {} ({} pages, {} fields{}) in {:?}",
            record.id,
            page_count,
            record.raw_json.len(),
            if demo { ", demo" } else { "" },
            start.elapsed()
        );

        Ok(UploadReceipt {
            task_id: task.task_id,
            record_id: record.id,
            page_count,
            field_count: record.raw_json.len(),
            demo,
        })
    }

    /// Extract and parse every page, merging fields in page order.
    ///
    /// Pages run with bounded concurrency; the first failing page aborts
    /// the rest.
    pub async fn extract_pages(&self, pages: &[EncodedImage]) -> Result<Vec<Field>, FormError> {
        let total = pages.len();
        let concurrency = self.config.concurrency.max(1);
        let cb = self.config.progress_callback.clone();

        let page_futures: Vec<_> = pages.iter().map(|page| {
            let extractor = Arc::clone(&self.extractor);
            let cb = cb.clone();
            async move {
                if let Some(cb) = &cb {
                    cb.on_page_start(page.page_num, total);
                }
                match extractor.extract(page).await {
                    Ok(text) => {
                        let parsed = parse_fields(&text);
                        debug!(
                            "Page {}/{}: {} fields via {:?}",
                            page.page_num,
                            total,
                            parsed.fields.len(),
                            parsed.strategy
                        );
                        if let Some(cb) = &cb {
                            cb.on_page_complete(page.page_num, total, parsed.fields.len());
                        }
                        Ok((page.page_num, parsed.fields))
                    }
                    Err(e) => {
                        warn!("Page {}/{} failed: {}", page.page_num, total, e);
                        if let Some(cb) = &cb {
                            cb.on_page_error(page.page_num, total, &e.to_string());
                        }
                        Err(FormError::ExtractionUnavailable {
                            page: page.page_num,
                            detail: e.to_string(),
                        })
                    }
                }
            }
        }).collect();

        let per_page: Vec<(usize, Vec<Field>)> = stream::iter(page_futures)
        .buffered(concurrency)
        .try_collect()
        .await?;

        Ok(merge_pages(per_page, self.config.label_pages))
    }
}

/// Encode normalised pages off the async runtime.
async fn encode_pages(
    pages: Vec<PageImage>,
    encoding: ImageEncoding,
) -> Result<Vec<EncodedImage>, FormError> {
    tokio::task::spawn_blocking(move || {
        pages
            .iter()
            .map(|p| {
                encode_page(p.page_num, &p.image, encoding).map_err(|e| {
                    FormError::Internal(format!("encoding page {}: {}", p.page_num, e))
                })
            })
            .collect()
    })
    .await
    .map_err(|e| FormError::Internal(format!("Encode task panicked: {}", e)))?
}
