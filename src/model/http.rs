//! HTTP-backed vision model: fronts an OpenAI-compatible inference endpoint.
//!
//! The accelerator in this deployment shape lives behind a single-node model
//! server (vLLM, TGI, or similar) speaking the `/v1/chat/completions`
//! protocol. Each stage maps onto the wire naturally: preprocess decodes the
//! uploaded image, build-inputs produces the chat payload with the image as a
//! base64 data URI, generate performs the POST with `max_tokens` set to the
//! current budget, and decode extracts the first choice's message content.
//!
//! ## Why PNG?
//!
//! Lossless compression preserves text crispness. JPEG artefacts on scanned
//! text confuse vision models and degrade extraction accuracy.
//!
//! ## Exhaustion signal
//!
//! The original accelerator error is an in-process out-of-memory; over HTTP
//! the only signal is the response. A 507, or a failed response whose body
//! mentions accelerator memory exhaustion, is mapped to
//! [`InferError::ResourceExhausted`] so the executor's budget-halving retry
//! kicks in. Everything else is terminal.

use crate::config::PreprocessMode;
use crate::error::{ExtractError, InferError};
use crate::model::{Generation, ModelInputs, PreparedImage, VisionModel};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde_json::json;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Longest edge, in pixels, that document-mode preprocessing allows through.
/// Oversized scans are downscaled proportionally before encoding.
const DOC_MAX_EDGE: u32 = 2200;

/// A [`VisionModel`] backed by an OpenAI-compatible vision endpoint.
pub struct HttpVisionModel {
    client: reqwest::Client,
    completions_url: String,
    model: String,
}

impl HttpVisionModel {
    /// Create a model handle for `endpoint` (e.g. `http://localhost:8008`)
    /// serving `model`.
    pub fn new(
        endpoint: impl AsRef<str>,
        model: impl Into<String>,
    ) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExtractError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            completions_url: format!(
                "{}/v1/chat/completions",
                endpoint.as_ref().trim_end_matches('/')
            ),
            model: model.into(),
        })
    }
}

#[async_trait]
impl VisionModel for HttpVisionModel {
    async fn preprocess(
        &self,
        path: &Path,
        mode: PreprocessMode,
    ) -> Result<PreparedImage, InferError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| InferError::BadImage {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        // Content-sniffed decode: uploads routinely carry wrong extensions.
        let decoded = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| InferError::BadImage {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?
            .decode()
            .map_err(|e| InferError::BadImage {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let image = match mode {
            PreprocessMode::Plain => decoded,
            PreprocessMode::Document => normalise_document(decoded),
        };

        debug!(
            "Preprocessed {} → {}x{} px ({:?})",
            path.display(),
            image.width(),
            image.height(),
            mode
        );

        Ok(PreparedImage::new(
            DynamicImage::ImageRgb8(image.to_rgb8()),
            mode,
        ))
    }

    async fn build_inputs(
        &self,
        prepared: PreparedImage,
        prompt: &str,
    ) -> Result<ModelInputs, InferError> {
        let mut buf = Vec::new();
        prepared
            .image()
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| InferError::Backend {
                detail: format!("PNG encode failed: {e}"),
            })?;

        let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(&buf));
        debug!("Encoded image → {} bytes base64", data_uri.len());

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": data_uri } },
                    { "type": "text", "text": prompt },
                ],
            }],
            // Transcription is deterministic work; never sample.
            "temperature": 0.0,
        });

        // `prepared` (the pixel buffer) drops here, before generate allocates.
        Ok(ModelInputs::new(body))
    }

    async fn generate(
        &self,
        inputs: ModelInputs,
        max_new_tokens: u32,
    ) -> Result<Generation, InferError> {
        let mut body = inputs.into_body();
        body["max_tokens"] = json!(max_new_tokens);

        let response = self
            .client
            .post(&self.completions_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferError::Backend {
                detail: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if exhaustion_signal(status.as_u16(), &text) {
                return Err(InferError::ResourceExhausted {
                    budget: max_new_tokens,
                });
            }
            return Err(InferError::Backend {
                detail: format!("HTTP {}: {}", status.as_u16(), snippet(&text)),
            });
        }

        let raw = response.json().await.map_err(|e| InferError::Backend {
            detail: format!("invalid response body: {e}"),
        })?;
        Ok(Generation::new(raw))
    }

    async fn decode(&self, generation: Generation) -> Result<String, InferError> {
        // Chat-completion responses contain only newly generated tokens, so
        // the prompt-exclusion contract holds by construction here.
        let content = generation
            .raw()
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| InferError::Backend {
                detail: "malformed completion: missing choices[0].message.content".into(),
            })?;
        Ok(content.trim().to_string())
    }
}

/// Document-mode normalisation: cap the longest edge so oversized flatbed
/// scans do not dominate the accelerator's pixel budget.
fn normalise_document(image: DynamicImage) -> DynamicImage {
    if image.width().max(image.height()) > DOC_MAX_EDGE {
        image.resize(DOC_MAX_EDGE, DOC_MAX_EDGE, image::imageops::FilterType::Triangle)
    } else {
        image
    }
}

/// Whether a failed backend response indicates accelerator memory exhaustion
/// (retryable with a smaller budget) rather than a terminal error.
fn exhaustion_signal(status: u16, body: &str) -> bool {
    if status == 507 {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("cuda error")
        || lower.contains("kv cache")
}

/// First 200 chars of an error body, for readable error messages.
fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    body[..end].trim()
}
