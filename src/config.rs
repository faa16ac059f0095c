//! Configuration types for the batch extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ExtractConfig`], built via
//! its [`ExtractConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across the server state, serialise it for
//! logging, and diff two runs to understand why their outputs differ.
//!
//! Per-request choices (prompt, preprocessing mode, persistence) live in
//! [`ExtractOptions`], which the transport layer builds from form fields and
//! the config's defaults.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default user prompt sent with every image unless the request overrides it.
pub const DEFAULT_PROMPT: &str = "Extract the text content from this image.";

/// Configuration for the extraction pipeline.
///
/// Built via [`ExtractConfig::builder()`] or using
/// [`ExtractConfig::default()`].
///
/// # Example
/// ```rust
/// use scanbatch::ExtractConfig;
///
/// let config = ExtractConfig::builder()
///     .output_root("./ocr_output")
///     .max_new_tokens(6000)
///     .max_attempts(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Root directory under which per-batch output directories are created.
    /// Default: `./ocr_output`.
    pub output_root: PathBuf,

    /// Default prompt for requests that do not supply one.
    pub default_prompt: String,

    /// Initial generation-token budget per inference call. Default: 6000.
    ///
    /// Dense document pages routinely produce several thousand output tokens;
    /// 6000 covers full-page deeds and contracts. Under resource exhaustion
    /// the executor halves this per retry, never below
    /// [`budget_floor`](Self::budget_floor).
    pub max_new_tokens: u32,

    /// Maximum inference attempts per file. Default: 2.
    ///
    /// One retry catches the common case where a long page blows the
    /// accelerator's memory at full budget but fits at half. More attempts
    /// rarely help: if half the budget still does not fit, the page needs
    /// operator attention, not a third try.
    pub max_attempts: u32,

    /// Lower bound for the shrinking generation budget. Default: 2000.
    ///
    /// Below ~2000 tokens a dense page truncates mid-sentence, which is worse
    /// than an explicit failure the caller can see and reroute.
    pub budget_floor: u32,

    /// Fixed wait between retry attempts, in milliseconds. Default: 2000.
    ///
    /// Gives the accelerator time to actually release the failed attempt's
    /// allocations before the smaller retry lands.
    pub retry_backoff_ms: u64,

    /// Default preprocessing mode for requests that do not specify one.
    pub preprocess: PreprocessMode,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./ocr_output"),
            default_prompt: DEFAULT_PROMPT.to_string(),
            max_new_tokens: 6000,
            max_attempts: 2,
            budget_floor: 2000,
            retry_backoff_ms: 2000,
            preprocess: PreprocessMode::default(),
        }
    }
}

impl ExtractConfig {
    /// Create a new builder for `ExtractConfig`.
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractConfig`].
#[derive(Debug)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn default_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.default_prompt = prompt.into();
        self
    }

    pub fn max_new_tokens(mut self, n: u32) -> Self {
        self.config.max_new_tokens = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn budget_floor(mut self, n: u32) -> Self {
        self.config.budget_floor = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn preprocess(mut self, mode: PreprocessMode) -> Self {
        self.config.preprocess = mode;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractConfig, ExtractError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.budget_floor > c.max_new_tokens {
            return Err(ExtractError::InvalidConfig(format!(
                "budget_floor ({}) exceeds max_new_tokens ({})",
                c.budget_floor, c.max_new_tokens
            )));
        }
        if c.default_prompt.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "default_prompt must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How the input image is prepared before it reaches the model.
///
/// The actual resize/DPI heuristics live behind the
/// [`VisionModel`](crate::model::VisionModel) seam; this enum only names the
/// mode the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    /// Decode the image as uploaded. (default)
    #[default]
    Plain,
    /// Document-oriented preprocessing: render/normalise the page at a fixed
    /// target DPI before inference. Helps with scans whose embedded
    /// resolution metadata is wrong.
    Document,
}

/// Per-request extraction options, resolved from form fields and config
/// defaults by the transport layer.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Prompt sent with every image in the batch.
    pub prompt: String,
    /// Preprocessing mode for every image in the batch.
    pub preprocess: PreprocessMode,
    /// Whether extracted text is persisted into the batch directory.
    pub persist: bool,
}

impl ExtractOptions {
    /// Options for a request that specified nothing, from config defaults.
    /// Persistence defaults to on, matching the request surface.
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            prompt: config.default_prompt.clone(),
            preprocess: config.preprocess,
            persist: true,
        }
    }
}
