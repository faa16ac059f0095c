//! Batch coordination: run one request's files through inference, in order,
//! with per-file failure isolation.
//!
//! The coordinator owns the batch lifecycle: it stamps the batch identifier
//! once per request, materialises the batch directory, walks the uploads in
//! input order, and records exactly one outcome per file. A failed file —
//! bad image, exhausted retries, backend outage — is captured as that file's
//! error and the loop moves on; nothing a single file does can abort the
//! batch or disturb its neighbours' indices.
//!
//! Each upload is staged as a transient working copy
//! ([`tempfile::NamedTempFile`]) so the executor sees a real path. The handle
//! is scoped to the file's processing; drop removes the copy on every exit
//! path, success or failure.

use crate::config::{ExtractConfig, ExtractOptions};
use crate::error::ExtractError;
use crate::executor::InferenceExecutor;
use crate::store::OutputStore;
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// One uploaded file, in upload order.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Outcome of one file's inference attempt: exactly one variant, fixed once
/// the attempt completes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    /// Extracted text.
    Text(String),
    /// Error message for a failed file.
    Error(String),
}

/// Per-file result, in upload order.
///
/// Serialises to the wire shape `{"filename", "text" | "error", "saved_as"}`.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub filename: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
    pub saved_as: Option<PathBuf>,
}

impl FileResult {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, FileOutcome::Text(_))
    }
}

/// Aggregate result of one batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// Batch identifier (`YYYYMMDD_HHMMSS`).
    pub batch_id: String,
    /// One entry per input file, input order preserved.
    pub results: Vec<FileResult>,
    /// The batch directory, present only when persistence was requested.
    pub batch_dir: Option<PathBuf>,
}

/// Drives [`InferenceExecutor`] across a batch and writes through
/// [`OutputStore`].
pub struct BatchCoordinator {
    executor: Arc<InferenceExecutor>,
    store: OutputStore,
    config: ExtractConfig,
}

impl BatchCoordinator {
    pub fn new(executor: Arc<InferenceExecutor>, store: OutputStore, config: ExtractConfig) -> Self {
        Self {
            executor,
            store,
            config,
        }
    }

    /// Process one batch of uploads.
    ///
    /// The returned result list always has exactly `files.len()` entries in
    /// input order. Only infrastructure failures (the batch directory cannot
    /// be created) surface as `Err`; per-file failures are data.
    pub async fn process(
        &self,
        files: Vec<UploadedFile>,
        options: &ExtractOptions,
    ) -> Result<BatchOutcome, ExtractError> {
        let batch_id = OutputStore::batch_id(&Local::now());
        let batch_dir = self.store.ensure_batch_dir(&batch_id)?;
        info!("Batch {batch_id}: {} file(s)", files.len());

        let total = files.len();
        let mut results = Vec::with_capacity(total);
        for (idx, file) in files.into_iter().enumerate() {
            let index = idx + 1;
            info!("Processing {} ({index}/{total})", file.filename);
            results.push(self.process_file(file, index, &batch_dir, options).await);
        }

        Ok(BatchOutcome {
            batch_id,
            results,
            batch_dir: options.persist.then_some(batch_dir),
        })
    }

    /// Run one file end to end. Never fails the batch: every error becomes
    /// the file's recorded outcome.
    async fn process_file(
        &self,
        file: UploadedFile,
        index: usize,
        batch_dir: &std::path::Path,
        options: &ExtractOptions,
    ) -> FileResult {
        let filename = file.filename.clone();
        match self.infer_one(&file, options).await {
            Ok(text) => {
                let saved_as = if options.persist {
                    match self
                        .store
                        .write_text(batch_dir, index, &filename, &text)
                        .await
                    {
                        Ok(path) => Some(path),
                        Err(e) => {
                            warn!("{filename}: extracted but not saved: {e}");
                            return FileResult {
                                filename,
                                outcome: FileOutcome::Error(e.to_string()),
                                saved_as: None,
                            };
                        }
                    }
                } else {
                    None
                };
                FileResult {
                    filename,
                    outcome: FileOutcome::Text(text),
                    saved_as,
                }
            }
            Err(detail) => {
                warn!("{filename}: {detail}");
                FileResult {
                    filename,
                    outcome: FileOutcome::Error(detail),
                    saved_as: None,
                }
            }
        }
    }

    /// Stage the upload as a working copy and run inference on it.
    ///
    /// The `NamedTempFile` handle guarantees removal of the copy when this
    /// function returns, whichever path it returns by.
    async fn infer_one(
        &self,
        file: &UploadedFile,
        options: &ExtractOptions,
    ) -> Result<String, String> {
        let working = tempfile::NamedTempFile::new().map_err(|e| {
            ExtractError::WorkingCopyFailed {
                filename: file.filename.clone(),
                source: e,
            }
            .to_string()
        })?;
        tokio::fs::write(working.path(), &file.bytes)
            .await
            .map_err(|e| {
                ExtractError::WorkingCopyFailed {
                    filename: file.filename.clone(),
                    source: e,
                }
                .to_string()
            })?;

        self.executor
            .infer(
                working.path(),
                &options.prompt,
                self.config.max_new_tokens,
                options.preprocess,
            )
            .await
            .map_err(|e| e.to_string())
    }
}
