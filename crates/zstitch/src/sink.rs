//! Destinations for stitched projections.
//!
//! The stitching math only talks to [`OutputSink`]. Store-specific layout
//! (files, links, descriptors) lives in the adapters below.

use crate::io::{self, ArrayDescriptor, DatasetUrl, MEMORY_SCHEME, RAW_DIR_SCHEME};
use crate::metadata::StitchedMetadata;
use crate::provenance::Provenance;
use crate::StitchError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use zstitch_core::Frame;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Stitched frame array, relative to the entry directory.
pub const DATA_FILE: &str = "instrument/detector/data.raw";
/// Shape and dtype of [`DATA_FILE`].
pub const DATA_DESCRIPTOR_FILE: &str = "instrument/detector/data.json";
/// Merged metadata of the entry.
pub const ENTRY_FILE: &str = "entry.json";
pub const PROVENANCE_FILE: &str = "stitching_configuration.json";

/// Receives one stitched dataset.
///
/// Call order: [`allocate`](OutputSink::allocate), then
/// [`write_metadata`](OutputSink::write_metadata), then any number of
/// bands, then [`write_provenance`](OutputSink::write_provenance) and
/// [`finish`](OutputSink::finish).
pub trait OutputSink {
    /// Reserve the full `(n_projections, height, width)` array.
    fn allocate(&mut self, descriptor: &ArrayDescriptor) -> Result<(), StitchError>;

    fn write_metadata(&mut self, metadata: &StitchedMetadata) -> Result<(), StitchError>;

    /// Store `frames` as projections `projections.start..projections.end`.
    fn write_band(&mut self, projections: Range<usize>, frames: &[Frame]) -> Result<(), StitchError>;

    fn write_frame(&mut self, index: usize, frame: &Frame) -> Result<(), StitchError> {
        self.write_band(index..index + 1, std::slice::from_ref(frame))
    }

    fn write_provenance(&mut self, provenance: &Provenance) -> Result<(), StitchError>;

    /// Flush everything. The sink is not written to afterwards.
    fn finish(&mut self) -> Result<(), StitchError> {
        Ok(())
    }

    fn dataset_url(&self) -> DatasetUrl;
}

fn check_band(
    descriptor: Option<&ArrayDescriptor>,
    projections: &Range<usize>,
    frames: &[Frame],
) -> Result<(), StitchError> {
    let d = descriptor.ok_or_else(|| {
        StitchError::Configuration("output written before it was allocated".to_string())
    })?;
    if projections.end > d.shape[0] || projections.len() != frames.len() {
        return Err(StitchError::Shape(format!(
            "cannot write {} frames as projections {projections:?} of {}",
            frames.len(),
            d.shape[0]
        )));
    }
    if let Some(f) = frames.iter().find(|f| f.shape() != (d.shape[1], d.shape[2])) {
        return Err(StitchError::Shape(format!(
            "frame {:?} does not match output frames ({}, {})",
            f.shape(),
            d.shape[1],
            d.shape[2]
        )));
    }
    Ok(())
}

/// What a [`MemorySink`] was asked to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Allocated([usize; 3]),
    Metadata,
    Band(Range<usize>),
    Provenance,
    Finished,
}

/// Keeps the stitched dataset in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    descriptor: Option<ArrayDescriptor>,
    frames: Vec<Frame>,
    metadata: Option<StitchedMetadata>,
    provenance: Option<Provenance>,
    events: Vec<SinkEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor(&self) -> Option<&ArrayDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn metadata(&self) -> Option<&StitchedMetadata> {
        self.metadata.as_ref()
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }
}

impl OutputSink for MemorySink {
    fn allocate(&mut self, descriptor: &ArrayDescriptor) -> Result<(), StitchError> {
        let [n, h, w] = descriptor.shape;
        self.frames = vec![
            Frame {
                width: w,
                height: h,
                data: vec![0.0; h * w],
            };
            n
        ];
        self.descriptor = Some(descriptor.clone());
        self.events.push(SinkEvent::Allocated(descriptor.shape));
        Ok(())
    }

    fn write_metadata(&mut self, metadata: &StitchedMetadata) -> Result<(), StitchError> {
        self.metadata = Some(metadata.clone());
        self.events.push(SinkEvent::Metadata);
        Ok(())
    }

    fn write_band(&mut self, projections: Range<usize>, frames: &[Frame]) -> Result<(), StitchError> {
        check_band(self.descriptor.as_ref(), &projections, frames)?;
        for (slot, frame) in self.frames[projections.clone()].iter_mut().zip(frames) {
            slot.data.copy_from_slice(&frame.data);
        }
        self.events.push(SinkEvent::Band(projections));
        Ok(())
    }

    fn write_provenance(&mut self, provenance: &Provenance) -> Result<(), StitchError> {
        self.provenance = Some(provenance.clone());
        self.events.push(SinkEvent::Provenance);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StitchError> {
        self.events.push(SinkEvent::Finished);
        Ok(())
    }

    fn dataset_url(&self) -> DatasetUrl {
        DatasetUrl::new("", "", MEMORY_SCHEME)
    }
}

/// Content of [`ENTRY_FILE`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryDocument {
    /// Name of the default plot group, always `"data"`.
    pub default: String,
    /// Location of the frame array inside the entry.
    pub data: String,
    pub metadata: StitchedMetadata,
}

fn entry_dir(file_path: &Path, data_path: &str) -> Result<PathBuf, StitchError> {
    let relative = data_path.trim_matches('/');
    if relative.is_empty() {
        return Err(StitchError::Configuration(
            "output data_path must name an entry".to_string(),
        ));
    }
    Ok(file_path.join(relative))
}

/// Writes one entry as a directory tree under `<file_path>/<data_path>`.
#[derive(Debug)]
pub struct DirectoryStore {
    file_path: PathBuf,
    data_path: String,
    entry: PathBuf,
    descriptor: Option<ArrayDescriptor>,
    data: Option<File>,
    buffer: Vec<u8>,
}

impl DirectoryStore {
    /// Prepare an empty entry.
    ///
    /// An existing entry is removed when `overwrite` is set, and is an
    /// [`StitchError::OutputExists`] otherwise.
    pub fn create(
        file_path: impl AsRef<Path>,
        data_path: &str,
        overwrite: bool,
    ) -> Result<Self, StitchError> {
        let file_path = file_path.as_ref().to_path_buf();
        let entry = entry_dir(&file_path, data_path)?;
        if entry.exists() {
            if !overwrite {
                return Err(StitchError::OutputExists(entry));
            }
            log::info!("removing existing entry {}", entry.display());
            fs::remove_dir_all(&entry)?;
        }
        fs::create_dir_all(entry.join("instrument/detector"))?;
        Ok(Self {
            file_path,
            data_path: data_path.to_string(),
            entry,
            descriptor: None,
            data: None,
            buffer: Vec::new(),
        })
    }

    /// Directory holding the entry.
    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

impl OutputSink for DirectoryStore {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(entry = %self.entry.display())))]
    fn allocate(&mut self, descriptor: &ArrayDescriptor) -> Result<(), StitchError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(self.entry.join(DATA_FILE))?;
        file.set_len(descriptor.total_bytes())?;
        fs::write(
            self.entry.join(DATA_DESCRIPTOR_FILE),
            serde_json::to_string_pretty(descriptor)?,
        )?;
        self.data = Some(file);
        self.descriptor = Some(descriptor.clone());
        Ok(())
    }

    fn write_metadata(&mut self, metadata: &StitchedMetadata) -> Result<(), StitchError> {
        let doc = EntryDocument {
            default: "data".to_string(),
            data: DATA_FILE.to_string(),
            metadata: metadata.clone(),
        };
        fs::write(self.entry.join(ENTRY_FILE), serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    fn write_band(&mut self, projections: Range<usize>, frames: &[Frame]) -> Result<(), StitchError> {
        check_band(self.descriptor.as_ref(), &projections, frames)?;
        let (Some(descriptor), Some(file)) = (self.descriptor.as_ref(), self.data.as_mut()) else {
            return Err(StitchError::Configuration(
                "output written before it was allocated".to_string(),
            ));
        };
        self.buffer.clear();
        for frame in frames {
            io::encode_values(&frame.data, descriptor.dtype, &mut self.buffer);
        }
        let offset = projections.start as u64 * descriptor.frame_bytes() as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&self.buffer)?;
        log::debug!(
            "wrote projections {projections:?} ({} bytes) to {}",
            self.buffer.len(),
            self.entry.display()
        );
        Ok(())
    }

    fn write_provenance(&mut self, provenance: &Provenance) -> Result<(), StitchError> {
        fs::write(
            self.entry.join(PROVENANCE_FILE),
            serde_json::to_string_pretty(provenance)?,
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StitchError> {
        if let Some(file) = self.data.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn dataset_url(&self) -> DatasetUrl {
        DatasetUrl::new(&self.file_path, &self.data_path, RAW_DIR_SCHEME)
    }
}

/// Read access to an entry written by [`DirectoryStore`].
#[derive(Debug)]
pub struct StoredDataset {
    entry: PathBuf,
    descriptor: ArrayDescriptor,
}

impl StoredDataset {
    pub fn open(file_path: impl AsRef<Path>, data_path: &str) -> Result<Self, StitchError> {
        let entry = entry_dir(file_path.as_ref(), data_path)?;
        let raw = fs::read_to_string(entry.join(DATA_DESCRIPTOR_FILE))?;
        let descriptor = serde_json::from_str(&raw)?;
        Ok(Self { entry, descriptor })
    }

    pub fn from_url(url: &DatasetUrl) -> Result<Self, StitchError> {
        Self::open(&url.file_path, &url.data_path)
    }

    pub fn descriptor(&self) -> &ArrayDescriptor {
        &self.descriptor
    }

    pub fn entry(&self) -> Result<EntryDocument, StitchError> {
        let raw = fs::read_to_string(self.entry.join(ENTRY_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn provenance(&self) -> Result<Provenance, StitchError> {
        let raw = fs::read_to_string(self.entry.join(PROVENANCE_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn read_frame(&self, index: usize) -> Result<Frame, StitchError> {
        let [n, h, w] = self.descriptor.shape;
        if index >= n {
            return Err(StitchError::Shape(format!(
                "projection {index} out of range for {n} stored frames"
            )));
        }
        let mut file = File::open(self.entry.join(DATA_FILE))?;
        let size = self.descriptor.frame_bytes();
        file.seek(SeekFrom::Start(index as u64 * size as u64))?;
        let mut bytes = vec![0u8; size];
        file.read_exact(&mut bytes)?;
        let data = io::decode_values(&bytes, self.descriptor.dtype)?;
        Ok(Frame {
            width: w,
            height: h,
            data,
        })
    }
}
