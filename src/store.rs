//! Output store: the filesystem layout contract for batches and text files.
//!
//! Everything downstream — the response payload's `saved_as` paths, the
//! offline compiler's ordering guarantee — leans on this layout:
//!
//! ```text
//! <root>/<YYYYMMDD_HHMMSS>/<NNN>_<stem>.txt
//! <root>/<YYYYMMDD_HHMMSS>/<YYYYMMDD_HHMMSS>_combined.txt
//! ```
//!
//! The zero-padded, 1-based `NNN` prefix is what makes lexicographic
//! filename order equal upload order, so the ordering contract is encoded in
//! the names themselves rather than in any side metadata. Directory creation
//! is idempotent and file writes fully replace prior content; a rerun with
//! the same batch id and index overwrites cleanly.

use crate::error::ExtractError;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Control characters and path separators are stripped from upload stems so a
/// hostile filename can never escape its batch directory.
static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x1f/\\]").unwrap());

/// Handle to the output root; all batch paths derive from here.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Batch identifier for a request arriving at `now`: second resolution,
    /// `YYYYMMDD_HHMMSS`. Two requests in the same second share an id (and
    /// therefore a directory); creation stays idempotent so that is a merge,
    /// not an error.
    pub fn batch_id(now: &DateTime<Local>) -> String {
        now.format("%Y%m%d_%H%M%S").to_string()
    }

    /// Create (or reuse) the directory for `batch_id` and return its path.
    pub fn ensure_batch_dir(&self, batch_id: &str) -> Result<PathBuf, ExtractError> {
        let dir = self.root.join(batch_id);
        std::fs::create_dir_all(&dir).map_err(|e| ExtractError::BatchDirFailed {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Output filename for the `index`-th upload (1-based): `NNN_<stem>.txt`.
    pub fn output_file_name(index: usize, filename: &str) -> String {
        format!("{:03}_{}.txt", index, sanitised_stem(filename))
    }

    /// Combined-document filename for a batch: `<batch_id>_combined.txt`.
    pub fn combined_file_name(batch_id: &str) -> String {
        format!("{batch_id}_combined.txt")
    }

    /// Write `text` as the `index`-th output of the batch at `batch_dir`,
    /// fully replacing any prior file at that path.
    pub async fn write_text(
        &self,
        batch_dir: &Path,
        index: usize,
        filename: &str,
        text: &str,
    ) -> Result<PathBuf, ExtractError> {
        let path = batch_dir.join(Self::output_file_name(index, filename));
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| ExtractError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        debug!("Saved {} ({} bytes)", path.display(), text.len());
        Ok(path)
    }
}

/// Extension-free, directory-free, control-character-free stem of an
/// uploaded filename. Falls back to `"file"` when nothing survives.
fn sanitised_stem(filename: &str) -> String {
    let last = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(last);
    let clean = RE_UNSAFE.replace_all(stem, "").trim().to_string();
    if clean.is_empty() {
        "file".to_string()
    } else {
        clean
    }
}
