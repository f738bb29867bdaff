//! Run artifact persistence.
//!
//! A completed run is written once, as a pair of files in the output
//! directory:
//!
//! ```text
//! <label>-<YYYYmmdd-HHMMSS>.jsonl           one CaseResult per line, suite order
//! summary-<label>-<YYYYmmdd-HHMMSS>.json    the summary, pretty-printed
//! ```
//!
//! Isolated case failures, when there are any, go to a third file,
//! `errors-<label>-<ts>.json`. Each file is written to a temporary file in
//! the same directory and renamed into place, so a reader never sees a
//! partial artifact.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::orchestrator::RunPayload;
use crate::result::CaseResult;

/// Timestamp format used in artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Errors raised while writing or reading run artifacts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistError {
    /// Filesystem failure.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized.
    #[error("failed to serialize run artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A JSONL line is not a valid case result.
    #[error("invalid result at '{}' line {line}: {source}", path.display())]
    InvalidLine {
        /// File being read.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Paths of the files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifacts {
    /// Per-case results, one JSON object per line.
    pub jsonl_path: PathBuf,
    /// Pretty-printed summary.
    pub summary_path: PathBuf,
    /// Isolated case failures, if any were recorded.
    pub errors_path: Option<PathBuf>,
}

/// Writes `payload` under `out_dir`, stamped with the current local time.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a file cannot be
/// serialized or written.
pub fn save_results(
    payload: &RunPayload,
    out_dir: &Path,
    run_label: &str,
) -> Result<SavedArtifacts, PersistError> {
    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    save_results_at(payload, out_dir, run_label, &timestamp)
}

/// Writes `payload` under `out_dir` using an explicit timestamp.
///
/// # Errors
///
/// Same as [`save_results`].
pub fn save_results_at(
    payload: &RunPayload,
    out_dir: &Path,
    run_label: &str,
    timestamp: &str,
) -> Result<SavedArtifacts, PersistError> {
    fs::create_dir_all(out_dir).map_err(|source| PersistError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let jsonl_path = out_dir.join(format!("{run_label}-{timestamp}.jsonl"));
    let summary_path = out_dir.join(format!("summary-{run_label}-{timestamp}.json"));

    let mut lines = Vec::new();
    for result in &payload.results {
        serde_json::to_writer(&mut lines, result)?;
        lines.push(b'\n');
    }
    write_atomic(out_dir, &jsonl_path, &lines)?;

    let summary = serde_json::to_vec_pretty(&payload.summary)?;
    write_atomic(out_dir, &summary_path, &summary)?;

    let errors_path = if payload.errors.is_empty() {
        None
    } else {
        let path = out_dir.join(format!("errors-{run_label}-{timestamp}.json"));
        write_atomic(out_dir, &path, &serde_json::to_vec_pretty(&payload.errors)?)?;
        Some(path)
    };

    info!(
        results = payload.results.len(),
        jsonl = %jsonl_path.display(),
        summary = %summary_path.display(),
        "run artifacts saved"
    );

    Ok(SavedArtifacts {
        jsonl_path,
        summary_path,
        errors_path,
    })
}

/// Reads a results file written by [`save_results`]. Blank lines are
/// skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is not a valid
/// [`CaseResult`].
pub fn read_results_jsonl(path: &Path) -> Result<Vec<CaseResult>, PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);

    let mut results = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let result = serde_json::from_str(&line).map_err(|source| PersistError::InvalidLine {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        results.push(result);
    }
    Ok(results)
}

/// Derives a filesystem-safe run label from a model label.
///
/// Surrounding whitespace is trimmed, then every character that is not
/// alphanumeric, `-` or `_` becomes `_`. The result is `run-<safe>`, or
/// `run` for an empty model label.
#[must_use]
pub fn run_label_for_model(model: &str) -> String {
    let safe: String = model
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "run".to_string()
    } else {
        format!("run-{safe}")
    }
}

fn write_atomic(dir: &Path, final_path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: final_path.to_path_buf(),
        source,
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.as_file_mut().write_all(bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(final_path).map_err(|e| io_err(e.error))?;
    Ok(())
}
