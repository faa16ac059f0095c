//! Inference execution: drive one document through the model with bounded
//! retry on resource exhaustion.
//!
//! ## Retry Strategy
//!
//! Accelerator memory exhaustion is budget-sensitive: a page that cannot be
//! generated at 6000 tokens frequently fits at 3000. On
//! [`InferError::ResourceExhausted`] the executor halves the generation
//! budget (never below the configured floor), waits a fixed backoff so the
//! accelerator can actually release the failed attempt's allocations, and
//! restarts the whole stage machine from the top. Attempts are bounded
//! (default 2); once the limit is reached the exhaustion is returned as the
//! call's terminal failure. Non-resource errors are never retried.
//!
//! ## The gate
//!
//! The model is a single exclusive resource: concurrent generation calls
//! would trample shared accelerator state and break the assumption that one
//! attempt's buffers are freed before the next allocates. All `infer` calls
//! therefore serialize on a process-wide `tokio::sync::Mutex`, which hands
//! the gate to waiters in arrival order. The gate is held for the full call,
//! retries included.

use crate::config::{ExtractConfig, PreprocessMode};
use crate::error::InferError;
use crate::model::VisionModel;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Serializing, retrying front-end to a [`VisionModel`].
///
/// Construct one per process and share it behind an `Arc`; the embedded gate
/// is what makes the accelerator exclusive.
pub struct InferenceExecutor {
    model: Arc<dyn VisionModel>,
    gate: Mutex<()>,
    max_attempts: u32,
    budget_floor: u32,
    backoff: Duration,
}

impl InferenceExecutor {
    /// Create an executor over `model` with the retry policy from `config`.
    pub fn new(model: Arc<dyn VisionModel>, config: &ExtractConfig) -> Self {
        Self {
            model,
            gate: Mutex::new(()),
            max_attempts: config.max_attempts,
            budget_floor: config.budget_floor,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Extract text from the image at `image_path`.
    ///
    /// Runs `Preprocess → BuildInputs → Generate → Decode`, retrying from the
    /// top with a halved budget on resource exhaustion. Returns the trimmed
    /// text of the newly generated portion on success.
    pub async fn infer(
        &self,
        image_path: &Path,
        prompt: &str,
        max_new_tokens: u32,
        mode: PreprocessMode,
    ) -> Result<String, InferError> {
        let _gate = self.gate.lock().await;

        let mut budget = max_new_tokens;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_stages(image_path, prompt, budget, mode).await {
                Ok(text) => {
                    debug!(
                        "Inference succeeded on attempt {attempt} ({} chars)",
                        text.len()
                    );
                    return Ok(text);
                }
                Err(err) if err.is_resource_exhausted() && attempt < self.max_attempts => {
                    budget = (budget / 2).max(self.budget_floor);
                    warn!(
                        "Resource exhausted (attempt {attempt}/{}); retrying with a {budget}-token budget",
                        self.max_attempts
                    );
                    sleep(self.backoff).await;
                }
                Err(err) => {
                    warn!("Inference failed terminally on attempt {attempt}: {err}");
                    return Err(err);
                }
            }
        }
    }

    /// One pass of the stage machine. Each stage consumes the previous
    /// stage's buffer, so by the time `generate` runs, the pixel data is
    /// gone, and by `decode`, the request payload is gone.
    async fn run_stages(
        &self,
        image_path: &Path,
        prompt: &str,
        budget: u32,
        mode: PreprocessMode,
    ) -> Result<String, InferError> {
        let prepared = self.model.preprocess(image_path, mode).await?;
        let inputs = self.model.build_inputs(prepared, prompt).await?;
        let generation = self.model.generate(inputs, budget).await?;
        let text = self.model.decode(generation).await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Generation, ModelInputs, PreparedImage};
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted model: each `generate` call pops the next planned outcome and
    /// records the budget it was offered.
    struct ScriptedModel {
        plan: StdMutex<VecDeque<Result<String, InferError>>>,
        budgets: StdMutex<Vec<u32>>,
        fail_preprocess: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        generate_delay: Duration,
    }

    impl ScriptedModel {
        fn new(plan: Vec<Result<String, InferError>>) -> Self {
            Self {
                plan: StdMutex::new(plan.into()),
                budgets: StdMutex::new(Vec::new()),
                fail_preprocess: false,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                generate_delay: Duration::ZERO,
            }
        }

        fn budgets(&self) -> Vec<u32> {
            self.budgets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn preprocess(
            &self,
            path: &Path,
            mode: PreprocessMode,
        ) -> Result<PreparedImage, InferError> {
            if self.fail_preprocess {
                return Err(InferError::BadImage {
                    path: path.to_path_buf(),
                    detail: "scripted decode failure".into(),
                });
            }
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
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.generate_delay.is_zero() {
                sleep(self.generate_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.budgets.lock().unwrap().push(max_new_tokens);
            let next = self
                .plan
                .lock()
                .unwrap()
                .pop_front()
                .expect("generate called more times than planned");
            next.map(|text| Generation::new(json!({ "text": text })))
        }

        async fn decode(&self, generation: Generation) -> Result<String, InferError> {
            Ok(generation.raw()["text"].as_str().unwrap().to_string())
        }
    }

    fn executor(model: Arc<ScriptedModel>, max_attempts: u32) -> InferenceExecutor {
        let config = ExtractConfig::builder()
            .max_attempts(max_attempts)
            .retry_backoff_ms(0)
            .build()
            .unwrap();
        InferenceExecutor::new(model, &config)
    }

    #[tokio::test]
    async fn exhaustion_then_success_halves_budget() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(InferError::ResourceExhausted { budget: 6000 }),
            Ok("  recovered text  ".into()),
        ]));
        let exec = executor(Arc::clone(&model), 2);

        let text = exec
            .infer(Path::new("page.png"), "extract", 6000, PreprocessMode::Plain)
            .await
            .unwrap();

        assert_eq!(text, "recovered text");
        assert_eq!(model.budgets(), vec![6000, 3000]);
    }

    #[tokio::test]
    async fn halved_budget_never_drops_below_floor() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(InferError::ResourceExhausted { budget: 3000 }),
            Ok("ok".into()),
        ]));
        let exec = executor(Arc::clone(&model), 2);

        exec.infer(Path::new("page.png"), "extract", 3000, PreprocessMode::Plain)
            .await
            .unwrap();

        // max(2000, 3000/2) = 2000, not 1500
        assert_eq!(model.budgets(), vec![3000, 2000]);
    }

    #[tokio::test]
    async fn exhaustion_on_every_attempt_is_terminal() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(InferError::ResourceExhausted { budget: 6000 }),
            Err(InferError::ResourceExhausted { budget: 3000 }),
        ]));
        let exec = executor(Arc::clone(&model), 2);

        let err = exec
            .infer(Path::new("page.png"), "extract", 6000, PreprocessMode::Plain)
            .await
            .unwrap_err();

        assert!(err.is_resource_exhausted());
        assert_eq!(model.budgets().len(), 2, "exactly the attempt limit");
    }

    #[tokio::test]
    async fn bad_image_is_not_retried() {
        let mut inner = ScriptedModel::new(vec![]);
        inner.fail_preprocess = true;
        let model = Arc::new(inner);
        let exec = executor(Arc::clone(&model), 2);

        let err = exec
            .infer(Path::new("junk.bin"), "extract", 6000, PreprocessMode::Plain)
            .await
            .unwrap_err();

        assert!(matches!(err, InferError::BadImage { .. }));
        assert!(model.budgets().is_empty(), "generate must never run");
    }

    #[tokio::test]
    async fn backend_error_is_not_retried() {
        let model = Arc::new(ScriptedModel::new(vec![Err(InferError::Backend {
            detail: "connection reset".into(),
        })]));
        let exec = executor(Arc::clone(&model), 3);

        let err = exec
            .infer(Path::new("page.png"), "extract", 6000, PreprocessMode::Plain)
            .await
            .unwrap_err();

        assert!(matches!(err, InferError::Backend { .. }));
        assert_eq!(model.budgets().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gate_serializes_concurrent_calls() {
        let mut inner = ScriptedModel::new(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]);
        inner.generate_delay = Duration::from_millis(20);
        let model = Arc::new(inner);
        let exec = Arc::new(executor(Arc::clone(&model), 1));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let exec = Arc::clone(&exec);
            handles.push(tokio::spawn(async move {
                exec.infer(Path::new("page.png"), "extract", 6000, PreprocessMode::Plain)
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(
            model.max_in_flight.load(Ordering::SeqCst),
            1,
            "at most one generation may be in flight"
        );
    }
}
