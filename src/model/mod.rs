//! The model seam: a staged vision-language-model interface.
//!
//! The executor's state machine (`Preprocess → BuildInputs → Generate →
//! Decode`) is mirrored one-to-one by the [`VisionModel`] trait, with each
//! stage *consuming* the previous stage's buffer by value. That ownership
//! transfer is the staged-release discipline: when a stage returns, its input
//! buffer has already been dropped, so peak resource usage is bounded to
//! roughly one stage's working set rather than the sum of all stages.
//!
//! ## Why a trait here?
//!
//! Model loading, tokenizer setup, and the resize heuristics are deployment
//! concerns, not pipeline concerns. Putting them behind `Arc<dyn VisionModel>`
//! keeps the retry/ordering logic testable with a scripted double and lets
//! the same pipeline front an in-process model or a remote accelerator
//! ([`HttpVisionModel`](http::HttpVisionModel)) without change.

pub mod http;

use crate::config::PreprocessMode;
use crate::error::InferError;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::Path;

/// A vision-language model, one method per pipeline stage.
///
/// Implementations must be `Send + Sync`; the executor serializes calls
/// process-wide, but the handle itself is shared across request handlers.
///
/// Only [`generate`](Self::generate) and [`decode`](Self::decode) may fail
/// with [`InferError::ResourceExhausted`]; the executor retries those with a
/// reduced budget. Every other error is terminal for the call.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Load and prepare the image at `path` according to `mode`.
    async fn preprocess(
        &self,
        path: &Path,
        mode: PreprocessMode,
    ) -> Result<PreparedImage, InferError>;

    /// Combine the prepared image and the prompt into model inputs.
    /// Consumes (and thereby releases) the prepared image.
    async fn build_inputs(
        &self,
        prepared: PreparedImage,
        prompt: &str,
    ) -> Result<ModelInputs, InferError>;

    /// Run generation with at most `max_new_tokens` new tokens.
    /// Consumes the inputs; the returned [`Generation`] is the raw model
    /// output before decoding.
    async fn generate(
        &self,
        inputs: ModelInputs,
        max_new_tokens: u32,
    ) -> Result<Generation, InferError>;

    /// Decode the raw generation into text. The result covers exactly the
    /// newly generated portion — prompt tokens are excluded.
    async fn decode(&self, generation: Generation) -> Result<String, InferError>;
}

/// Output of the preprocess stage: a decoded, mode-adjusted image.
pub struct PreparedImage {
    image: DynamicImage,
    mode: PreprocessMode,
}

impl PreparedImage {
    pub fn new(image: DynamicImage, mode: PreprocessMode) -> Self {
        Self { image, mode }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn mode(&self) -> PreprocessMode {
        self.mode
    }
}

/// Output of the build-inputs stage: the assembled model request payload.
///
/// For the HTTP backend this is the chat-completion request body; an
/// in-process backend would carry tensors here instead. Either way the
/// payload is opaque to the executor.
pub struct ModelInputs {
    body: serde_json::Value,
}

impl ModelInputs {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn into_body(self) -> serde_json::Value {
        self.body
    }
}

/// Output of the generate stage: the raw, undecoded model response.
pub struct Generation {
    raw: serde_json::Value,
}

impl Generation {
    pub fn new(raw: serde_json::Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}
