//! HTTP surface: the batch-extraction endpoint and the health probe.
//!
//! A thin transport layer over [`BatchCoordinator`] — multipart parsing and
//! wire-shape mapping only, no pipeline logic. The browser frontend uploads
//! an ordered sequence of `files` parts plus optional scalar fields; field
//! order in the multipart body *is* upload order and is preserved verbatim
//! into the coordinator call.
//!
//! Routes:
//! - `GET  /`        — health probe
//! - `POST /extract` — multipart batch extraction

use crate::batch::{BatchCoordinator, FileResult, UploadedFile};
use crate::config::{ExtractConfig, ExtractOptions, PreprocessMode};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body. Batches of full-page scans run large; the
/// axum default (2 MB) would reject a single flatbed scan.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Origins allowed by default: the dev frontends this service is built for.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] =
    &["http://localhost:5173", "http://localhost:3000"];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BatchCoordinator>,
    pub config: Arc<ExtractConfig>,
}

/// Wire shape of a batch-extraction response.
#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub results: Vec<FileResult>,
    pub batch_folder: Option<PathBuf>,
    pub total_processed: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

/// Build the application router with CORS for `allowed_origins`.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/extract", post(extract))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, app: Router) -> std::io::Result<()> {
    info!("scanbatch server listening on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Online",
        message: "scanbatch server is running",
    })
}

/// `POST /extract`: parse the multipart request, run the batch, map the
/// outcome onto the wire shape. Per-file failures are inside `results`;
/// only transport-level problems produce non-200 responses.
async fn extract(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractResponse>, (StatusCode, String)> {
    let mut files: Vec<UploadedFile> = Vec::new();
    let mut prompt: Option<String> = None;
    let mut document_preprocess: Option<bool> = None;
    let mut save_to_disk: Option<bool> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("failed to read upload '{filename}': {e}"),
                    )
                })?;
                files.push(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            "prompt" => prompt = Some(field_text(field, "prompt").await?),
            "document_preprocess" => {
                document_preprocess =
                    Some(parse_bool(&field_text(field, "document_preprocess").await?)
                        .map_err(bad_field("document_preprocess"))?);
            }
            "save_to_disk" => {
                save_to_disk = Some(parse_bool(&field_text(field, "save_to_disk").await?)
                    .map_err(bad_field("save_to_disk"))?);
            }
            other => warn!("Ignoring unknown multipart field '{other}'"),
        }
    }

    let options = ExtractOptions {
        prompt: prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| state.config.default_prompt.clone()),
        preprocess: match document_preprocess {
            Some(true) => PreprocessMode::Document,
            Some(false) => PreprocessMode::Plain,
            None => state.config.preprocess,
        },
        persist: save_to_disk.unwrap_or(true),
    };

    let outcome = state
        .coordinator
        .process(files, &options)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let total_processed = outcome.results.len();
    Ok(Json(ExtractResponse {
        results: outcome.results,
        batch_folder: outcome.batch_dir,
        total_processed,
    }))
}

async fn field_text(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, (StatusCode, String)> {
    field.text().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("failed to read field '{name}': {e}"),
        )
    })
}

fn bad_field(name: &'static str) -> impl Fn(String) -> (StatusCode, String) {
    move |detail| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid value for '{name}': {detail}"),
        )
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("true").unwrap(), true);
        assert_eq!(parse_bool(" False ").unwrap(), false);
        assert_eq!(parse_bool("1").unwrap(), true);
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn health_response_shape() {
        let v = serde_json::to_value(HealthResponse {
            status: "Online",
            message: "scanbatch server is running",
        })
        .unwrap();
        assert_eq!(v["status"], "Online");
    }

    #[test]
    fn cors_layer_tolerates_bad_origins() {
        // Must not panic; the bad entry is dropped with a warning.
        let _ = cors_layer(&["http://localhost:5173".into(), "not a url\u{0}".into()]);
    }
}
