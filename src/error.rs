use std::{fmt, path::PathBuf};

/// Failures that stop a run.
///
/// These travel inside `anyhow::Error` like everything else, so callers that care which kind of
/// failure happened can use `err.downcast_ref::<DataError>()` (this sees through any context
/// added on the way up).
///
/// Missing lookups and sparse codes are not errors: they resolve to documented defaults
/// ("Unknown", "Other") or to [`Trend::InsufficientData`](crate::trend::Trend).
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// A concept, dictionary, codelist or extract file is missing.
    #[error("no file at \"{}\"", .0.display())]
    NotFound(PathBuf),
    /// Input didn't have the shape we expect (bad hierarchy entry, bad code, bad column).
    #[error("malformed data: {0}")]
    DataFormat(String),
}

impl DataError {
    pub fn format(msg: impl fmt::Display) -> Self {
        DataError::DataFormat(msg.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound(_))
    }

    pub fn is_data_format(&self) -> bool {
        matches!(self, DataError::DataFormat(_))
    }
}
