//! # scanbatch
//!
//! Batch OCR service for document images: resilient vision-language-model
//! inference, timestamped batch outputs, and an offline batch compiler.
//!
//! ## Why this crate?
//!
//! Document OCR against a single local accelerator has an awkward failure
//! mode: a dense page can exhaust the accelerator's memory mid-generation,
//! and the naive response — fail the whole upload batch — throws away every
//! healthy page along with the one bad one. This crate treats exhaustion as
//! a first-class, retryable outcome (shrink the generation budget, back off,
//! try again, bounded) and isolates every file's failure to that file, so a
//! batch request always returns one outcome per input.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads (ordered)
//!  │
//!  ├─ 1. Coordinate  stamp batch id, stage working copies, walk in order
//!  ├─ 2. Infer       Preprocess → BuildInputs → Generate → Decode,
//!  │                 serialized process-wide, bounded retry on exhaustion
//!  ├─ 3. Store       <root>/<YYYYMMDD_HHMMSS>/<NNN>_<stem>.txt
//!  └─ 4. Compile     (offline, later) one combined document per batch
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanbatch::{
//!     BatchCoordinator, ExtractConfig, ExtractOptions, HttpVisionModel,
//!     InferenceExecutor, OutputStore, UploadedFile,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractConfig::default();
//!     let model = Arc::new(HttpVisionModel::new("http://localhost:8008", "dots-ocr")?);
//!     let executor = Arc::new(InferenceExecutor::new(model, &config));
//!     let store = OutputStore::new(&config.output_root);
//!     let coordinator = BatchCoordinator::new(executor, store, config.clone());
//!
//!     let files = vec![UploadedFile {
//!         filename: "deed.png".into(),
//!         bytes: std::fs::read("deed.png")?,
//!     }];
//!     let outcome = coordinator
//!         .process(files, &ExtractOptions::from_config(&config))
//!         .await?;
//!     for r in &outcome.results {
//!         println!("{}: ok={}", r.filename, r.is_ok());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanbatch-server` and `scanbatch-compile` binaries (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scanbatch = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchCoordinator, BatchOutcome, FileOutcome, FileResult, UploadedFile};
pub use compiler::{compile_all, compile_batch, discover_batches, BatchStatus, CompileReport};
pub use config::{ExtractConfig, ExtractConfigBuilder, ExtractOptions, PreprocessMode, DEFAULT_PROMPT};
pub use error::{ExtractError, InferError};
pub use executor::InferenceExecutor;
pub use model::http::HttpVisionModel;
pub use model::VisionModel;
pub use store::OutputStore;
