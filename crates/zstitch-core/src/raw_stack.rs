//! Directory-backed scans: a JSON descriptor next to raw little-endian `f32`
//! frame stacks.
//!
//! ```text
//! <dir>/scan.json         RawStackDescriptor
//! <dir>/projections.raw   tomo_n frames, dim_2 x dim_1, row-major
//! <dir>/darks.raw         optional, one frame per entry of `darks`
//! <dir>/flats.raw         optional, one frame per entry of `flats`
//! ```
//!
//! This is the layout used for acquisitions that do not record per-frame
//! rotation angles: unless `rotation_angles` is given, angles are spread
//! evenly over `[0, scan_range]`.

use crate::{Frame, FrameLocation, PixelSize, ReducedFrames, Scan, ScanError, ScanInfo};
use crate::{FieldOfView, Translations};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DESCRIPTOR_FILE: &str = "scan.json";
pub const PROJECTIONS_DATASET: &str = "projections";
const PROJECTIONS_FILE: &str = "projections.raw";
const DARKS_FILE: &str = "darks.raw";
const FLATS_FILE: &str = "flats.raw";

fn default_scan_range() -> f64 {
    360.0
}

/// Content of `scan.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawStackDescriptor {
    pub identifier: String,
    /// Number of projections in `projections.raw`.
    pub tomo_n: usize,
    pub dim_1: usize,
    pub dim_2: usize,
    pub pixel_size: PixelSize,
    /// Angular range covered by the projections, in degrees.
    #[serde(default = "default_scan_range")]
    pub scan_range: f64,
    /// Explicit per-projection angles; derived from `scan_range` when absent.
    #[serde(default)]
    pub rotation_angles: Option<Vec<f64>>,
    /// Acquisition index of the first projection.
    #[serde(default)]
    pub first_index: usize,
    /// Acquisition indices of the frames stored in `darks.raw`.
    #[serde(default)]
    pub darks: Vec<usize>,
    /// Acquisition indices of the frames stored in `flats.raw`.
    #[serde(default)]
    pub flats: Vec<usize>,
    #[serde(default)]
    pub field_of_view: Option<FieldOfView>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub translations: Translations,
    #[serde(default)]
    pub x_flipped: Option<bool>,
    #[serde(default)]
    pub y_flipped: Option<bool>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence_name: Option<String>,
    #[serde(default)]
    pub sample_name: Option<String>,
}

impl RawStackDescriptor {
    pub fn new(identifier: impl Into<String>, tomo_n: usize, dim_1: usize, dim_2: usize) -> Self {
        Self {
            identifier: identifier.into(),
            tomo_n,
            dim_1,
            dim_2,
            pixel_size: PixelSize::square(1.0),
            scan_range: default_scan_range(),
            rotation_angles: None,
            first_index: 0,
            darks: Vec::new(),
            flats: Vec::new(),
            field_of_view: None,
            distance: None,
            energy: None,
            translations: Translations::default(),
            x_flipped: None,
            y_flipped: None,
            start_time: None,
            end_time: None,
            sequence_name: None,
            sample_name: None,
        }
    }

    fn rotation_angles(&self) -> Vec<f64> {
        if let Some(angles) = &self.rotation_angles {
            return angles.clone();
        }
        linspace(0.0, self.scan_range, self.tomo_n)
    }

    fn info(&self) -> ScanInfo {
        ScanInfo {
            dim_1: self.dim_1,
            dim_2: self.dim_2,
            pixel_size: self.pixel_size,
            rotation_angles: self.rotation_angles(),
            field_of_view: self.field_of_view,
            distance: self.distance,
            energy: self.energy,
            translations: self.translations.clone(),
            x_flipped: self.x_flipped,
            y_flipped: self.y_flipped,
            magnification: None,
            start_time: self.start_time,
            end_time: self.end_time,
            sequence_name: self.sequence_name.clone(),
            sample_name: self.sample_name.clone(),
        }
    }
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn frame_bytes(dim_1: usize, dim_2: usize) -> usize {
    dim_1 * dim_2 * std::mem::size_of::<f32>()
}

fn decode_frames(bytes: &[u8], dim_1: usize, dim_2: usize) -> Result<Vec<Frame>, ScanError> {
    bytes
        .chunks_exact(frame_bytes(dim_1, dim_2))
        .map(|chunk| -> Result<Frame, ScanError> {
            let data = chunk
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Ok(Frame::new(dim_1, dim_2, data)?)
        })
        .collect()
}

fn write_stack(path: &Path, frames: &[Frame]) -> Result<(), ScanError> {
    let mut file = File::create(path)?;
    let mut buf = Vec::new();
    for frame in frames {
        buf.clear();
        buf.reserve(frame.data.len() * 4);
        for v in &frame.data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        file.write_all(&buf)?;
    }
    Ok(())
}

fn read_reduced(
    path: &Path,
    indices: &[usize],
    dim_1: usize,
    dim_2: usize,
) -> Result<Option<ReducedFrames>, ScanError> {
    if indices.is_empty() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let frames = decode_frames(&bytes, dim_1, dim_2)?;
    if frames.len() != indices.len() {
        return Err(ScanError::Invalid(format!(
            "{} holds {} frames, descriptor lists {}",
            path.display(),
            frames.len(),
            indices.len()
        )));
    }
    Ok(Some(indices.iter().copied().zip(frames).collect()))
}

/// Scan stored as a raw frame stack in a directory.
#[derive(Debug)]
pub struct RawStackScan {
    root: PathBuf,
    descriptor: RawStackDescriptor,
    info: ScanInfo,
    projections: BTreeMap<usize, FrameLocation>,
    darks: Option<ReducedFrames>,
    flats: Option<ReducedFrames>,
    read_calls: AtomicUsize,
}

impl RawStackScan {
    /// Open the scan stored in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ScanError> {
        let root = dir.as_ref().to_path_buf();
        let raw = fs::read_to_string(root.join(DESCRIPTOR_FILE))?;
        let descriptor: RawStackDescriptor = serde_json::from_str(&raw)?;
        Self::from_descriptor(root, descriptor)
    }

    /// Write `projections` (plus optional reduced darks/flats, matching the
    /// descriptor's index lists) into `dir` and open the result.
    pub fn create(
        dir: impl AsRef<Path>,
        mut descriptor: RawStackDescriptor,
        projections: &[Frame],
        darks: &[Frame],
        flats: &[Frame],
    ) -> Result<Self, ScanError> {
        let root = dir.as_ref().to_path_buf();
        descriptor.tomo_n = projections.len();
        if darks.len() != descriptor.darks.len() || flats.len() != descriptor.flats.len() {
            return Err(ScanError::Invalid(
                "reduced frames do not match the descriptor index lists".to_string(),
            ));
        }
        fs::create_dir_all(&root)?;
        write_stack(&root.join(PROJECTIONS_FILE), projections)?;
        if !darks.is_empty() {
            write_stack(&root.join(DARKS_FILE), darks)?;
        }
        if !flats.is_empty() {
            write_stack(&root.join(FLATS_FILE), flats)?;
        }
        fs::write(
            root.join(DESCRIPTOR_FILE),
            serde_json::to_string_pretty(&descriptor)?,
        )?;
        Self::open(root)
    }

    fn from_descriptor(root: PathBuf, descriptor: RawStackDescriptor) -> Result<Self, ScanError> {
        if descriptor.dim_1 == 0 || descriptor.dim_2 == 0 {
            return Err(ScanError::Invalid(format!(
                "scan {}: empty frame geometry",
                descriptor.identifier
            )));
        }
        if let Some(angles) = &descriptor.rotation_angles {
            if angles.len() != descriptor.tomo_n {
                return Err(ScanError::Invalid(format!(
                    "scan {}: {} rotation angles for {} projections",
                    descriptor.identifier,
                    angles.len(),
                    descriptor.tomo_n
                )));
            }
        }
        let expected = (descriptor.tomo_n * frame_bytes(descriptor.dim_1, descriptor.dim_2)) as u64;
        let actual = fs::metadata(root.join(PROJECTIONS_FILE))?.len();
        if actual != expected {
            return Err(ScanError::Invalid(format!(
                "scan {}: {PROJECTIONS_FILE} holds {actual} bytes, expected {expected}",
                descriptor.identifier
            )));
        }

        let darks = read_reduced(
            &root.join(DARKS_FILE),
            &descriptor.darks,
            descriptor.dim_1,
            descriptor.dim_2,
        )?;
        let flats = read_reduced(
            &root.join(FLATS_FILE),
            &descriptor.flats,
            descriptor.dim_1,
            descriptor.dim_2,
        )?;
        let projections = (0..descriptor.tomo_n)
            .map(|slice| {
                (
                    descriptor.first_index + slice,
                    FrameLocation::new(PROJECTIONS_DATASET, slice),
                )
            })
            .collect();
        Ok(Self {
            root,
            info: descriptor.info(),
            descriptor,
            projections,
            darks,
            flats,
            read_calls: AtomicUsize::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor(&self) -> &RawStackDescriptor {
        &self.descriptor
    }

    /// Number of `read_frames` calls served so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }
}

impl Scan for RawStackScan {
    fn identifier(&self) -> &str {
        &self.descriptor.identifier
    }

    fn info(&self) -> &ScanInfo {
        &self.info
    }

    fn projections(&self) -> &BTreeMap<usize, FrameLocation> {
        &self.projections
    }

    /// One seek and one read per call.
    fn read_frames(&self, dataset: &str, slices: Range<usize>) -> Result<Vec<Frame>, ScanError> {
        if dataset != PROJECTIONS_DATASET {
            return Err(ScanError::UnknownDataset {
                scan: self.descriptor.identifier.clone(),
                dataset: dataset.to_string(),
            });
        }
        if slices.start > slices.end || slices.end > self.descriptor.tomo_n {
            return Err(ScanError::SliceOutOfRange {
                scan: self.descriptor.identifier.clone(),
                start: slices.start,
                end: slices.end,
                len: self.descriptor.tomo_n,
            });
        }
        let stride = frame_bytes(self.descriptor.dim_1, self.descriptor.dim_2);
        let mut file = File::open(self.root.join(PROJECTIONS_FILE))?;
        file.seek(SeekFrom::Start((slices.start * stride) as u64))?;
        let mut bytes = vec![0u8; slices.len() * stride];
        file.read_exact(&mut bytes)?;
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "{}: read slices {}..{} from {}",
            self.descriptor.identifier,
            slices.start,
            slices.end,
            PROJECTIONS_FILE
        );
        decode_frames(&bytes, self.descriptor.dim_1, self.descriptor.dim_2)
    }

    fn reduced_darks(&self) -> Option<&ReducedFrames> {
        self.darks.as_ref()
    }

    fn reduced_flats(&self) -> Option<&ReducedFrames> {
        self.flats.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_includes_both_ends() {
        let v = linspace(0.0, 180.0, 5);
        assert_eq!(v, vec![0.0, 45.0, 90.0, 135.0, 180.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn decode_reads_little_endian_rows() {
        let mut bytes = Vec::new();
        for v in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let frames = decode_frames(&bytes, 3, 1).expect("decode");
        assert_eq!(frames.len(), 2);
        assert_relative_eq!(frames[1].get(0, 2), 6.0);
    }

    #[test]
    fn derived_info_has_no_magnification() {
        let mut d = RawStackDescriptor::new("edf", 4, 2, 2);
        d.scan_range = 180.0;
        let info = d.info();
        assert!(info.magnification.is_none());
        assert_eq!(info.rotation_angles, vec![0.0, 60.0, 120.0, 180.0]);
    }
}
