/// Registration failures. None of them are retried by the stitcher.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("frames differ in shape: ({0}, {1}) vs ({2}, {3})")]
    ShapeMismatch(usize, usize, usize, usize),

    #[error("frames of height {height} cannot hold an overlap of at least {min_overlap} rows")]
    TooSmall { height: usize, min_overlap: usize },

    #[error("input contains non-finite values")]
    NonFinite,

    #[error("correlation surface is flat or empty")]
    FlatSurface,

    #[error("correlation peak {peak:.4} below the accepted minimum {min:.4}")]
    WeakPeak { peak: f64, min: f64 },
}
