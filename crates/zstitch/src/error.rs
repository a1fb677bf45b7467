use std::path::PathBuf;
use zstitch_core::ScanError;

/// Every way a stitching run can fail. All variants are fatal.
#[derive(thiserror::Error, Debug)]
pub enum StitchError {
    /// Inconsistent parameters, detected before any frame is read.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Scans are neither in canonical z order nor in its exact reverse.
    #[error("ordering error: {0}")]
    Ordering(String),

    #[error("scans `{first}` and `{second}` are incompatible: {what}")]
    GeometryMismatch {
        first: String,
        second: String,
        what: String,
    },

    #[error("shape error: {0}")]
    Shape(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("shift estimation failed between `{first}` and `{second}`: {reason}")]
    ShiftEstimation {
        first: String,
        second: String,
        reason: String,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("output {0} already exists and overwrite_results is false")]
    OutputExists(PathBuf),
}

impl StitchError {
    pub(crate) fn mismatch(first: &str, second: &str, what: impl Into<String>) -> Self {
        StitchError::GeometryMismatch {
            first: first.to_string(),
            second: second.to_string(),
            what: what.into(),
        }
    }
}
