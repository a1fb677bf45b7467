use crate::{Frame, FrameLocation, ReducedFrames, Scan, ScanError, ScanInfo};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Name of the single dataset exposed by [`MemoryScan`].
pub const MEMORY_DATASET: &str = "data";

/// A scan whose projections are already in memory.
///
/// Projections are stored in dataset [`MEMORY_DATASET`] and keyed by
/// `first_index + slice`. The number of `read_frames` calls is counted so
/// callers can check how well their reads are coalesced.
#[derive(Debug)]
pub struct MemoryScan {
    identifier: String,
    info: ScanInfo,
    frames: Vec<Frame>,
    projections: BTreeMap<usize, FrameLocation>,
    darks: Option<ReducedFrames>,
    flats: Option<ReducedFrames>,
    read_calls: AtomicUsize,
}

impl MemoryScan {
    /// Wrap `frames`. Every frame must be `dim_2 x dim_1`, and recorded angles
    /// (if any) must match the number of frames.
    pub fn new(
        identifier: impl Into<String>,
        info: ScanInfo,
        frames: Vec<Frame>,
    ) -> Result<Self, ScanError> {
        let identifier = identifier.into();
        if let Some(bad) = frames
            .iter()
            .find(|f| f.shape() != (info.dim_2, info.dim_1))
        {
            return Err(ScanError::Invalid(format!(
                "scan {identifier}: frame shape {:?} differs from declared ({}, {})",
                bad.shape(),
                info.dim_2,
                info.dim_1
            )));
        }
        if !info.rotation_angles.is_empty() && info.rotation_angles.len() != frames.len() {
            return Err(ScanError::Invalid(format!(
                "scan {identifier}: {} rotation angles for {} frames",
                info.rotation_angles.len(),
                frames.len()
            )));
        }
        let projections = (0..frames.len())
            .map(|slice| (slice, FrameLocation::new(MEMORY_DATASET, slice)))
            .collect();
        Ok(Self {
            identifier,
            info,
            frames,
            projections,
            darks: None,
            flats: None,
            read_calls: AtomicUsize::new(0),
        })
    }

    /// Shift projection frame indices so they start at `first_index`.
    pub fn with_first_index(mut self, first_index: usize) -> Self {
        self.projections = (0..self.frames.len())
            .map(|slice| (first_index + slice, FrameLocation::new(MEMORY_DATASET, slice)))
            .collect();
        self
    }

    pub fn with_reduced_darks(mut self, darks: ReducedFrames) -> Self {
        self.darks = Some(darks);
        self
    }

    pub fn with_reduced_flats(mut self, flats: ReducedFrames) -> Self {
        self.flats = Some(flats);
        self
    }

    /// Number of `read_frames` calls served so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl Scan for MemoryScan {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn info(&self) -> &ScanInfo {
        &self.info
    }

    fn projections(&self) -> &BTreeMap<usize, FrameLocation> {
        &self.projections
    }

    fn read_frames(&self, dataset: &str, slices: Range<usize>) -> Result<Vec<Frame>, ScanError> {
        if dataset != MEMORY_DATASET {
            return Err(ScanError::UnknownDataset {
                scan: self.identifier.clone(),
                dataset: dataset.to_string(),
            });
        }
        let frames = self
            .frames
            .get(slices.clone())
            .ok_or_else(|| ScanError::SliceOutOfRange {
                scan: self.identifier.clone(),
                start: slices.start,
                end: slices.end,
                len: self.frames.len(),
            })?;
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        Ok(frames.to_vec())
    }

    fn reduced_darks(&self) -> Option<&ReducedFrames> {
        self.darks.as_ref()
    }

    fn reduced_flats(&self) -> Option<&ReducedFrames> {
        self.flats.as_ref()
    }
}
