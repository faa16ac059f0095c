//! Server binary for scanbatch.
//!
//! A thin shim over the library crate that maps CLI flags to the pipeline
//! config, wires the model backend, and serves the HTTP surface.

use anyhow::{Context, Result};
use clap::Parser;
use scanbatch::server::{self, AppState, DEFAULT_ALLOWED_ORIGINS};
use scanbatch::{
    BatchCoordinator, ExtractConfig, HttpVisionModel, InferenceExecutor, OutputStore,
    PreprocessMode,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve against a local model backend with defaults
  scanbatch-server

  # Custom backend, output root, and frontend origin
  scanbatch-server --endpoint http://gpu-node:8008 --model dots-ocr \
                   --output-root /srv/ocr_output \
                   --allow-origin https://docs.example.com

  # Tighter retry policy for a small accelerator
  scanbatch-server --max-new-tokens 4000 --budget-floor 1000 --max-attempts 3

ENVIRONMENT VARIABLES:
  SCANBATCH_ENDPOINT      Model backend base URL
  SCANBATCH_MODEL         Model identifier sent to the backend
  SCANBATCH_OUTPUT_ROOT   Root directory for batch outputs

NOTES:
  Inference calls are serialized process-wide: the accelerator is a single
  exclusive resource, and overlapping requests queue in arrival order.
"#;

/// Batch OCR server: accepts document-image uploads, extracts text through a
/// vision-language model, and persists per-batch outputs.
#[derive(Parser, Debug)]
#[command(
    name = "scanbatch-server",
    version,
    about = "Batch OCR server for document images",
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "SCANBATCH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "SCANBATCH_PORT", default_value_t = 8000)]
    port: u16,

    /// Model backend base URL (OpenAI-compatible vision endpoint).
    #[arg(long, env = "SCANBATCH_ENDPOINT", default_value = "http://localhost:8008")]
    endpoint: String,

    /// Model identifier sent to the backend.
    #[arg(long, env = "SCANBATCH_MODEL", default_value = "dots-ocr")]
    model: String,

    /// Root directory for batch outputs.
    #[arg(long, env = "SCANBATCH_OUTPUT_ROOT", default_value = "./ocr_output")]
    output_root: PathBuf,

    /// Default prompt for requests that do not supply one.
    #[arg(long, env = "SCANBATCH_PROMPT")]
    prompt: Option<String>,

    /// Initial generation-token budget per inference call.
    #[arg(long, env = "SCANBATCH_MAX_NEW_TOKENS", default_value_t = 6000)]
    max_new_tokens: u32,

    /// Inference attempts per file before the exhaustion is terminal.
    #[arg(long, env = "SCANBATCH_MAX_ATTEMPTS", default_value_t = 2)]
    max_attempts: u32,

    /// Lower bound for the shrinking generation budget.
    #[arg(long, env = "SCANBATCH_BUDGET_FLOOR", default_value_t = 2000)]
    budget_floor: u32,

    /// Fixed wait between retry attempts, in milliseconds.
    #[arg(long, env = "SCANBATCH_BACKOFF_MS", default_value_t = 2000)]
    backoff_ms: u64,

    /// Default to document-oriented preprocessing when a request does not
    /// choose a mode.
    #[arg(long, env = "SCANBATCH_DOCUMENT_PREPROCESS")]
    document_preprocess: bool,

    /// CORS origin to allow (repeatable). Defaults to the dev frontends.
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANBATCH_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let mut builder = ExtractConfig::builder()
        .output_root(&cli.output_root)
        .max_new_tokens(cli.max_new_tokens)
        .max_attempts(cli.max_attempts)
        .budget_floor(cli.budget_floor)
        .retry_backoff_ms(cli.backoff_ms)
        .preprocess(if cli.document_preprocess {
            PreprocessMode::Document
        } else {
            PreprocessMode::Plain
        });
    if let Some(ref prompt) = cli.prompt {
        builder = builder.default_prompt(prompt);
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Wire the pipeline ────────────────────────────────────────────────
    // The model handle is created once at startup and shared for the life of
    // the process; the executor's gate is the only access path to it.
    let model = Arc::new(
        HttpVisionModel::new(&cli.endpoint, cli.model.clone())
            .context("Failed to construct model backend client")?,
    );
    let executor = Arc::new(InferenceExecutor::new(model, &config));
    let store = OutputStore::new(&config.output_root);
    let coordinator = Arc::new(BatchCoordinator::new(executor, store, config.clone()));

    let origins: Vec<String> = if cli.allow_origins.is_empty() {
        DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
    } else {
        cli.allow_origins.clone()
    };

    let state = AppState {
        coordinator,
        config: Arc::new(config),
    };
    let app = server::router(state, &origins);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.host, cli.port))?;

    server::serve(addr, app).await.context("Server failed")?;
    Ok(())
}
