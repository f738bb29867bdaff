//! Suite loading.
//!
//! A suite is a YAML document with a top-level `cases` sequence. JSON is
//! accepted too, since YAML is a superset. Each descriptor is validated into
//! a [`Case`]; the first malformed descriptor aborts the load before any
//! trial runs.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::case::Case;

/// Maximum suite file size (4 MiB).
pub const MAX_SUITE_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Errors raised while loading a suite.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuiteError {
    /// A case descriptor is missing a required field or has a bad type.
    #[error("malformed case at index {index}: {reason}")]
    MalformedCase {
        /// Position of the descriptor in the suite.
        index: usize,
        /// What was wrong.
        reason: String,
    },

    /// Two descriptors share an id.
    #[error("duplicate case id '{id}' at index {index} (first defined at index {first_index})")]
    DuplicateCaseId {
        /// The repeated id.
        id: String,
        /// Where it was first defined.
        first_index: usize,
        /// Where it was repeated.
        index: usize,
    },

    /// The suite file could not be read.
    #[error("failed to read suite '{}': {source}", path.display())]
    Io {
        /// Suite path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The suite file exceeds [`MAX_SUITE_FILE_SIZE`].
    #[error("suite '{}' exceeds maximum size of {max} bytes", path.display())]
    TooLarge {
        /// Suite path.
        path: PathBuf,
        /// The limit that was exceeded.
        max: u64,
    },

    /// The document is not valid YAML or has the wrong shape.
    #[error("failed to parse suite: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize)]
struct SuiteDocument {
    #[serde(default)]
    cases: Vec<Value>,
}

/// Loads and validates a suite file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is larger than
/// [`MAX_SUITE_FILE_SIZE`], is not a valid suite document, or contains a
/// malformed case.
pub fn load_suite(path: &Path) -> Result<Vec<Case>, SuiteError> {
    let content = read_bounded(path)?;
    let cases = parse_suite(&content)?;
    tracing::debug!(suite = %path.display(), cases = cases.len(), "suite loaded");
    Ok(cases)
}

/// Parses and validates suite text.
///
/// An empty document, or one without a `cases` key, yields zero cases.
///
/// # Errors
///
/// Returns an error if the text is not a valid suite document or contains a
/// malformed or duplicated case.
pub fn parse_suite(content: &str) -> Result<Vec<Case>, SuiteError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: Option<SuiteDocument> = serde_yaml::from_str(content)?;
    let descriptors = document.unwrap_or_default().cases;

    let mut seen: HashMap<String, usize> = HashMap::with_capacity(descriptors.len());
    let mut cases = Vec::with_capacity(descriptors.len());
    for (index, descriptor) in descriptors.iter().enumerate() {
        let case = Case::from_descriptor(index, descriptor)?;
        if let Some(&first_index) = seen.get(case.id()) {
            return Err(SuiteError::DuplicateCaseId {
                id: case.id().to_string(),
                first_index,
                index,
            });
        }
        seen.insert(case.id().to_string(), index);
        cases.push(case);
    }
    Ok(cases)
}

fn read_bounded(path: &Path) -> Result<String, SuiteError> {
    let io_err = |source| SuiteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut content = String::new();
    file.take(MAX_SUITE_FILE_SIZE + 1)
        .read_to_string(&mut content)
        .map_err(io_err)?;

    if content.len() as u64 > MAX_SUITE_FILE_SIZE {
        return Err(SuiteError::TooLarge {
            path: path.to_path_buf(),
            max: MAX_SUITE_FILE_SIZE,
        });
    }
    Ok(content)
}
