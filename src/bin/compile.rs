//! Offline compiler binary: merge every batch's text outputs into one
//! combined document per batch.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scanbatch::compiler::{self, BatchStatus};
use scanbatch::CompileReport;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compile every batch under the default output root
  scanbatch-compile

  # Explicit root, machine-readable report
  scanbatch-compile /srv/ocr_output --json

NOTES:
  Batches with no .txt files are skipped. Unreadable files become inline
  [ERROR ...] markers inside the combined document; the batch still counts
  as compiled. Rerunning is safe: each run rebuilds the combined file from
  scratch, and the previous combined file is never treated as an input.
"#;

/// Merge each batch directory's text outputs into `<batch>_combined.txt`.
#[derive(Parser, Debug)]
#[command(
    name = "scanbatch-compile",
    version,
    about = "Compile batch OCR outputs into combined documents",
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Root directory containing batch subdirectories.
    #[arg(env = "SCANBATCH_OUTPUT_ROOT", default_value = "./ocr_output")]
    root: PathBuf,

    /// Print the full report as JSON instead of the human summary.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Library logs go to stderr; the human report owns stdout.
    let filter = if cli.verbose { "debug" } else { "error" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.json {
        let report = compiler::compile_all(&cli.root);
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
        return Ok(());
    }

    let batch_dirs = compiler::discover_batches(&cli.root);
    if batch_dirs.is_empty() {
        if !cli.quiet {
            eprintln!(
                "{} No batch folders found under {}",
                cyan("⚠"),
                bold(&cli.root.display().to_string())
            );
        }
        return Ok(());
    }

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(batch_dirs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} batches",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Compiling");
        bar
    };

    let mut report = CompileReport {
        batches_compiled: 0,
        errors: 0,
        batches: Vec::with_capacity(batch_dirs.len()),
    };

    for dir in batch_dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let status = compiler::compile_batch(&dir);

        match &status {
            BatchStatus::Compiled {
                files, file_errors, ..
            } => {
                report.batches_compiled += 1;
                report.errors += file_errors;
                let note = if *file_errors > 0 {
                    red(&format!("{file_errors} read error(s)"))
                } else {
                    dim(&format!("{files} file(s)"))
                };
                bar.println(format!("  {} {name}  {note}", green("✓")));
            }
            BatchStatus::Skipped => {
                bar.println(format!("  {} {name}  {}", cyan("⚠"), dim("no .txt files")));
            }
            BatchStatus::Failed { detail } => {
                report.errors += 1;
                bar.println(format!("  {} {name}  {}", red("✗"), red(detail)));
            }
        }
        report.batches.push(compiler::BatchReport { name, status });
        bar.inc(1);
    }
    bar.finish_and_clear();

    if !cli.quiet {
        let tick = if report.errors == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{tick} {} batch(es) compiled, {} error(s)",
            bold(&report.batches_compiled.to_string()),
            if report.errors == 0 {
                dim("0")
            } else {
                red(&report.errors.to_string())
            },
        );
    }

    Ok(())
}
