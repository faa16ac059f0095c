//! Integration tests for the batch pipeline: coordinator + executor + store
//! against a scripted model.
//!
//! The fake model reads each working copy's bytes as a directive
//! (`TEXT:…`, `OOM_ONCE:…`, `OOM_ALWAYS`, `BADIMG`, `BACKEND`), which lets
//! one test batch mix healthy and failing files exactly like a real upload
//! set would.

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use scanbatch::model::{Generation, ModelInputs, PreparedImage, VisionModel};
use scanbatch::{
    BatchCoordinator, ExtractConfig, ExtractOptions, FileOutcome, InferenceExecutor, InferError,
    OutputStore, PreprocessMode, UploadedFile,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Scripted model ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeModel {
    /// Directive of the file currently in flight. Safe because the executor
    /// serializes calls.
    current: Mutex<Option<String>>,
    /// Generate attempts seen per directive (drives OOM_ONCE).
    attempts: Mutex<HashMap<String, u32>>,
    /// Budgets offered to generate, in call order.
    budgets: Mutex<Vec<u32>>,
    /// Working-copy paths observed, for cleanup assertions.
    seen_paths: Mutex<Vec<PathBuf>>,
}

impl FakeModel {
    fn budgets(&self) -> Vec<u32> {
        self.budgets.lock().unwrap().clone()
    }

    fn seen_paths(&self) -> Vec<PathBuf> {
        self.seen_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionModel for FakeModel {
    async fn preprocess(
        &self,
        path: &Path,
        mode: PreprocessMode,
    ) -> Result<PreparedImage, InferError> {
        self.seen_paths.lock().unwrap().push(path.to_path_buf());
        let directive = std::fs::read_to_string(path).map_err(|e| InferError::BadImage {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        if directive == "BADIMG" {
            return Err(InferError::BadImage {
                path: path.to_path_buf(),
                detail: "unsupported image format".into(),
            });
        }
        *self.current.lock().unwrap() = Some(directive);
        Ok(PreparedImage::new(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]))),
            mode,
        ))
    }

    async fn build_inputs(
        &self,
        _prepared: PreparedImage,
        prompt: &str,
    ) -> Result<ModelInputs, InferError> {
        Ok(ModelInputs::new(json!({ "prompt": prompt })))
    }

    async fn generate(
        &self,
        _inputs: ModelInputs,
        max_new_tokens: u32,
    ) -> Result<Generation, InferError> {
        self.budgets.lock().unwrap().push(max_new_tokens);
        let directive = self.current.lock().unwrap().clone().unwrap();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(directive.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if directive == "OOM_ALWAYS" {
            return Err(InferError::ResourceExhausted {
                budget: max_new_tokens,
            });
        }
        if directive == "BACKEND" {
            return Err(InferError::Backend {
                detail: "connection reset by peer".into(),
            });
        }
        if let Some(payload) = directive.strip_prefix("OOM_ONCE:") {
            if attempt == 1 {
                return Err(InferError::ResourceExhausted {
                    budget: max_new_tokens,
                });
            }
            return Ok(Generation::new(json!({ "text": payload })));
        }
        let payload = directive.strip_prefix("TEXT:").unwrap_or(&directive);
        Ok(Generation::new(json!({ "text": payload })))
    }

    async fn decode(&self, generation: Generation) -> Result<String, InferError> {
        Ok(generation.raw()["text"].as_str().unwrap().to_string())
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Fixture {
    _root: tempfile::TempDir,
    root_path: PathBuf,
    model: Arc<FakeModel>,
    coordinator: BatchCoordinator,
    options: ExtractOptions,
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().expect("tempdir");
    let config = ExtractConfig::builder()
        .output_root(root.path())
        .retry_backoff_ms(0)
        .build()
        .expect("valid config");

    let model = Arc::new(FakeModel::default());
    let executor = Arc::new(InferenceExecutor::new(
        Arc::clone(&model) as Arc<dyn VisionModel>,
        &config,
    ));
    let store = OutputStore::new(&config.output_root);
    let options = ExtractOptions::from_config(&config);
    let coordinator = BatchCoordinator::new(executor, store, config);

    Fixture {
        root_path: root.path().to_path_buf(),
        _root: root,
        model,
        coordinator,
        options,
    }
}

fn upload(name: &str, directive: &str) -> UploadedFile {
    UploadedFile {
        filename: name.to_string(),
        bytes: directive.as_bytes().to_vec(),
    }
}

/// Names of regular files inside the batch directory, sorted.
fn batch_files(batch_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(batch_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Ordering and isolation ───────────────────────────────────────────────────

#[tokio::test]
async fn k_files_in_k_results_out_in_order() {
    let fx = fixture();
    let files = vec![
        upload("alpha.png", "TEXT:first page"),
        upload("broken.png", "BADIMG"),
        upload("gamma.png", "TEXT:third page"),
    ];

    let outcome = fx.coordinator.process(files, &fx.options).await.unwrap();

    assert_eq!(outcome.results.len(), 3);
    let names: Vec<&str> = outcome.results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["alpha.png", "broken.png", "gamma.png"]);

    assert!(outcome.results[0].is_ok());
    assert!(!outcome.results[1].is_ok(), "bad image must fail alone");
    assert!(outcome.results[2].is_ok(), "a bad neighbour must not leak");
}

#[tokio::test]
async fn saved_prefixes_match_upload_indices_with_no_gaps_reused() {
    let fx = fixture();
    let files = vec![
        upload("a.png", "TEXT:A"),
        upload("b.png", "BACKEND"),
        upload("c.png", "TEXT:C"),
    ];

    let outcome = fx.coordinator.process(files, &fx.options).await.unwrap();
    let batch_dir = outcome.batch_dir.as_ref().expect("persisted batch");

    // The failed file's index is consumed, not reassigned: outputs keep
    // their 1-based upload index even around gaps.
    assert_eq!(batch_files(batch_dir), vec!["001_a.txt", "003_c.txt"]);
    assert_eq!(
        outcome.results[0].saved_as.as_ref().unwrap(),
        &batch_dir.join("001_a.txt")
    );
    assert!(outcome.results[1].saved_as.is_none());
    assert_eq!(
        std::fs::read_to_string(batch_dir.join("003_c.txt")).unwrap(),
        "C"
    );
}

#[tokio::test]
async fn empty_batch_yields_empty_results() {
    let fx = fixture();
    let outcome = fx.coordinator.process(vec![], &fx.options).await.unwrap();
    assert!(outcome.results.is_empty());
    assert!(outcome.batch_dir.as_ref().unwrap().is_dir());
}

// ── Retry policy observed through the whole pipeline ─────────────────────────

#[tokio::test]
async fn exhaustion_then_success_recovers_at_half_budget() {
    let fx = fixture();
    let files = vec![upload("dense.png", "OOM_ONCE:recovered")];

    let outcome = fx.coordinator.process(files, &fx.options).await.unwrap();

    assert!(outcome.results[0].is_ok());
    assert_eq!(fx.model.budgets(), vec![6000, 3000]);
    let batch_dir = outcome.batch_dir.as_ref().unwrap();
    assert_eq!(
        std::fs::read_to_string(batch_dir.join("001_dense.txt")).unwrap(),
        "recovered"
    );
}

#[tokio::test]
async fn exhausted_retries_write_no_output_file() {
    let fx = fixture();
    let files = vec![upload("huge.png", "OOM_ALWAYS")];

    let outcome = fx.coordinator.process(files, &fx.options).await.unwrap();

    match &outcome.results[0].outcome {
        FileOutcome::Error(msg) => assert!(msg.contains("exhausted"), "got: {msg}"),
        FileOutcome::Text(_) => panic!("exhausted file must not succeed"),
    }
    assert_eq!(fx.model.budgets(), vec![6000, 3000], "attempt limit is 2");

    let batch_dir = outcome.batch_dir.as_ref().unwrap();
    assert!(
        batch_files(batch_dir).is_empty(),
        "no output may exist for a terminally failed input"
    );
}

// ── Persistence switch and cleanup ───────────────────────────────────────────

#[tokio::test]
async fn persist_off_returns_text_but_no_paths() {
    let fx = fixture();
    let mut options = fx.options.clone();
    options.persist = false;

    let outcome = fx
        .coordinator
        .process(vec![upload("a.png", "TEXT:A")], &options)
        .await
        .unwrap();

    assert!(outcome.batch_dir.is_none());
    assert!(outcome.results[0].is_ok());
    assert!(outcome.results[0].saved_as.is_none());

    // The batch directory is still stamped (same id scheme), just unused.
    let dirs: Vec<_> = std::fs::read_dir(&fx.root_path).unwrap().flatten().collect();
    assert_eq!(dirs.len(), 1);
    assert!(batch_files(&dirs[0].path()).is_empty());
}

#[tokio::test]
async fn working_copies_are_removed_on_every_path() {
    let fx = fixture();
    let files = vec![
        upload("ok.png", "TEXT:fine"),
        upload("bad.png", "BADIMG"),
        upload("oom.png", "OOM_ALWAYS"),
    ];

    fx.coordinator.process(files, &fx.options).await.unwrap();

    let seen = fx.model.seen_paths();
    assert!(!seen.is_empty());
    for path in seen {
        assert!(
            !path.exists(),
            "working copy {} must be removed after processing",
            path.display()
        );
    }
}
