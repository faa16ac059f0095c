//! Error types for the scanbatch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the batch pipeline cannot proceed at all
//!   (output directory cannot be created, invalid configuration). Returned as
//!   `Err(ExtractError)` from the top-level coordinator entry points.
//!
//! * [`InferError`] — **Per-call**: one file's inference attempt failed.
//!   The [`ResourceExhausted`](InferError::ResourceExhausted) variant is the
//!   only retryable one; the executor consumes it in a bounded retry loop
//!   with a shrinking generation budget. Everything else is terminal for the
//!   call and is recorded as that file's error without aborting the batch.
//!
//! The separation lets the coordinator guarantee its core contract: a batch
//! request never fails wholesale because of one bad file — the response
//! always enumerates one outcome per input.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the scanbatch pipeline.
///
/// Per-file failures use [`InferError`] and are recorded in
/// [`crate::batch::FileResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Could not create the batch directory under the output root.
    #[error("Failed to create batch directory '{path}': {source}")]
    BatchDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write an extracted-text output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not stage a transient working copy of an upload.
    #[error("Failed to stage working copy for '{filename}': {source}")]
    WorkingCopyFailed {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome taxonomy for a single inference call.
///
/// Only [`ResourceExhausted`](InferError::ResourceExhausted) is retryable:
/// the accelerator could not satisfy the requested generation budget, and a
/// smaller budget may fit. Malformed images and backend failures are not
/// retried — repeating them cannot change the outcome.
#[derive(Debug, Clone, Error)]
pub enum InferError {
    /// The accelerator cannot complete generation at the current token budget.
    #[error("Model resource exhausted at a {budget}-token generation budget")]
    ResourceExhausted { budget: u32 },

    /// The input image could not be read or decoded.
    #[error("Cannot read image '{path}': {detail}")]
    BadImage { path: PathBuf, detail: String },

    /// The model backend failed in a non-resource way (network, protocol,
    /// malformed response).
    #[error("Model backend error: {detail}")]
    Backend { detail: String },
}

impl InferError {
    /// Whether the executor's retry loop may re-attempt after this error.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, InferError::ResourceExhausted { .. })
    }
}
