//! Offline batch compiler: merge each batch's per-file outputs into one
//! annotated combined document.
//!
//! The compiler is a separate, single-threaded tool with no runtime
//! dependency on the server. It scans the immediate subdirectories of the
//! output root (one level only), treats each as a batch, and merges that
//! batch's `.txt` files — excluding any previously generated combined file —
//! in lexicographic filename order. Because per-file names carry a
//! zero-padded 1-based index prefix, lexicographic order *is* upload order;
//! the compiler's ordering guarantee is inherited from
//! [`OutputStore`](crate::store::OutputStore) naming, and tested as a
//! contract rather than assumed.
//!
//! A batch with no text files is skipped with a warning (neither compiled
//! nor errored). An unreadable file becomes an inline error marker and the
//! batch still compiles. The combined file is published atomically (temp
//! file + rename) so a failed write never leaves a partial document under
//! the final name.
//!
//! Each run returns a fresh, immutable [`CompileReport`]; the compiler keeps
//! no running state, so repeated invocations are safe.

use crate::store::OutputStore;
use chrono::Local;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const HEADER_RULE: char = '=';
const FILE_RULE: char = '─';
const RULE_WIDTH: usize = 80;

/// Immutable aggregate of one compiler run.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    /// Batches whose combined document was written.
    pub batches_compiled: usize,
    /// File read errors plus batch write failures, across all batches.
    pub errors: usize,
    /// Per-batch detail, in discovery (sorted) order.
    pub batches: Vec<BatchReport>,
}

/// Outcome for one discovered batch directory.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub name: String,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Combined document written; `file_errors` inputs were replaced by
    /// inline error markers.
    Compiled {
        files: usize,
        file_errors: usize,
        output: PathBuf,
    },
    /// No text files found; nothing written, nothing counted.
    Skipped,
    /// The combined document could not be written.
    Failed { detail: String },
}

/// Find batch directories: the immediate subdirectories of `root`, sorted.
/// A missing or unreadable root yields an empty list.
pub fn discover_batches(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Compile every batch under `root` and return the aggregate report.
pub fn compile_all(root: &Path) -> CompileReport {
    let batch_dirs = discover_batches(root);
    if batch_dirs.is_empty() {
        warn!("No batch folders found under {}", root.display());
    }

    let mut report = CompileReport {
        batches_compiled: 0,
        errors: 0,
        batches: Vec::with_capacity(batch_dirs.len()),
    };

    for dir in batch_dirs {
        let name = batch_name(&dir);
        let status = compile_batch(&dir);
        match &status {
            BatchStatus::Compiled { file_errors, .. } => {
                report.batches_compiled += 1;
                report.errors += file_errors;
            }
            BatchStatus::Failed { .. } => report.errors += 1,
            BatchStatus::Skipped => {}
        }
        report.batches.push(BatchReport { name, status });
    }

    info!(
        "Compilation finished: {} batch(es) compiled, {} error(s)",
        report.batches_compiled, report.errors
    );
    report
}

/// Compile one batch directory into its combined document.
pub fn compile_batch(batch_dir: &Path) -> BatchStatus {
    let name = batch_name(batch_dir);
    let combined_name = OutputStore::combined_file_name(&name);

    let files = list_text_files(batch_dir, &combined_name);
    if files.is_empty() {
        warn!("No .txt files found in {}", batch_dir.display());
        return BatchStatus::Skipped;
    }
    info!("{name}: {} text file(s)", files.len());

    let mut file_errors = 0;
    let entries: Vec<(String, Result<String, String>)> = files
        .iter()
        .map(|path| {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = std::fs::read_to_string(path).map_err(|e| e.to_string());
            if content.is_err() {
                file_errors += 1;
            }
            (file_name, content)
        })
        .collect();

    let generated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let document = render_combined(&name, &generated_at, &entries);

    let output = batch_dir.join(&combined_name);
    match publish(batch_dir, &output, &document) {
        Ok(()) => {
            info!("{name}: compiled into {combined_name}");
            BatchStatus::Compiled {
                files: entries.len(),
                file_errors,
                output,
            }
        }
        Err(detail) => {
            warn!("{name}: failed to write combined file: {detail}");
            BatchStatus::Failed { detail }
        }
    }
}

/// The batch's `.txt` files, combined output excluded, in lexicographic
/// filename order (equals upload order by the naming contract).
fn list_text_files(batch_dir: &Path, combined_name: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(batch_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().is_some_and(|ext| ext == "txt")
                && p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n != combined_name)
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// Render the combined document. Pure so the exact format is testable
/// without touching the filesystem.
fn render_combined(
    batch_name: &str,
    generated_at: &str,
    entries: &[(String, Result<String, String>)],
) -> String {
    let total = entries.len();
    let header_rule: String = HEADER_RULE.to_string().repeat(RULE_WIDTH);
    let file_rule: String = FILE_RULE.to_string().repeat(RULE_WIDTH);

    let mut doc = String::new();
    doc.push_str(&format!("# Combined OCR Output from {batch_name}\n"));
    doc.push_str(&format!("# Generated at: {generated_at}\n"));
    doc.push_str(&format!("# Total files: {total}\n"));
    doc.push_str(&header_rule);
    doc.push_str("\n\n");

    for (i, (file_name, content)) in entries.iter().enumerate() {
        doc.push_str(&format!("\n{file_rule}\n"));
        doc.push_str(&format!("File {}/{total}: {file_name}\n", i + 1));
        doc.push_str(&format!("{file_rule}\n\n"));
        match content {
            Ok(text) => {
                doc.push_str(text);
                doc.push_str("\n\n");
            }
            Err(e) => {
                doc.push_str(&format!("[ERROR reading file {file_name}: {e}]\n\n"));
            }
        }
    }

    doc
}

/// Write-then-publish: the document lands under its final name only via
/// rename, so readers never observe a partial combined file.
fn publish(batch_dir: &Path, output: &Path, document: &str) -> Result<(), String> {
    let mut tmp = tempfile::NamedTempFile::new_in(batch_dir).map_err(|e| e.to_string())?;
    tmp.write_all(document.as_bytes()).map_err(|e| e.to_string())?;
    tmp.persist(output).map_err(|e| e.to_string())?;
    Ok(())
}

fn batch_name(batch_dir: &Path) -> String {
    batch_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| batch_dir.display().to_string())
}
