//! Dataset references and the on-disk array encoding.

use crate::config::OutputDtype;
use crate::StitchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Scheme of datasets written by [`crate::DirectoryStore`].
pub const RAW_DIR_SCHEME: &str = "raw-dir";
/// Scheme of datasets kept in a [`crate::MemorySink`].
pub const MEMORY_SCHEME: &str = "memory";

/// Reference to a produced dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetUrl {
    pub file_path: PathBuf,
    pub data_path: String,
    pub scheme: String,
}

impl DatasetUrl {
    pub fn new(
        file_path: impl Into<PathBuf>,
        data_path: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            data_path: data_path.into(),
            scheme: scheme.into(),
        }
    }
}

impl fmt::Display for DatasetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}?path={}",
            self.scheme,
            self.file_path.display(),
            self.data_path
        )
    }
}

/// Shape and element type of a stored `(n_projections, height, width)` array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub shape: [usize; 3],
    pub dtype: OutputDtype,
    /// Always `"little"`.
    pub byte_order: String,
}

impl ArrayDescriptor {
    pub fn new(shape: [usize; 3], dtype: OutputDtype) -> Self {
        Self {
            shape,
            dtype,
            byte_order: "little".to_string(),
        }
    }

    /// Bytes taken by one projection.
    pub fn frame_bytes(&self) -> usize {
        self.shape[1] * self.shape[2] * self.dtype.size_of()
    }

    pub fn total_bytes(&self) -> u64 {
        self.shape[0] as u64 * self.frame_bytes() as u64
    }
}

/// Append `values` to `out`, little-endian, as `dtype`.
pub fn encode_values(values: &[f32], dtype: OutputDtype, out: &mut Vec<u8>) {
    out.reserve(values.len() * dtype.size_of());
    match dtype {
        OutputDtype::Float32 => {
            for &v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        OutputDtype::Float64 => {
            for &v in values {
                out.extend_from_slice(&(v as f64).to_le_bytes());
            }
        }
        OutputDtype::Uint16 => {
            for &v in values {
                out.extend_from_slice(&(dtype.cast(v) as u16).to_le_bytes());
            }
        }
    }
}

/// Decode little-endian `dtype` values back to `f32`.
pub fn decode_values(bytes: &[u8], dtype: OutputDtype) -> Result<Vec<f32>, StitchError> {
    let size = dtype.size_of();
    if bytes.len() % size != 0 {
        return Err(StitchError::Shape(format!(
            "{} bytes is not a whole number of {dtype:?} values",
            bytes.len()
        )));
    }
    let values = match dtype {
        OutputDtype::Float32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        OutputDtype::Float64 => bytes
            .chunks_exact(8)
            .map(|b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            })
            .collect(),
        OutputDtype::Uint16 => bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32)
            .collect(),
    };
    Ok(values)
}
