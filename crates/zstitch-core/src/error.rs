use crate::FrameError;

/// Errors raised while reading frames or metadata from a scan backend.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("scan {scan}: unknown dataset `{dataset}`")]
    UnknownDataset { scan: String, dataset: String },

    #[error("scan {scan}: slices {start}..{end} out of range for dataset of {len} frames")]
    SliceOutOfRange {
        scan: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("scan {scan}: no projection with frame index {index}")]
    UnknownProjection { scan: String, index: usize },

    #[error("got {frames} frames but {indices} frame indices")]
    IndexCount { frames: usize, indices: usize },

    #[error(
        "reduced frame shape ({ref_height}, {ref_width}) does not match projection shape ({height}, {width})"
    )]
    ReducedShape {
        ref_height: usize,
        ref_width: usize,
        height: usize,
        width: usize,
    },

    #[error("invalid scan description: {0}")]
    Invalid(String),
}
