//! Z-axis stitching of tomography scans.
//!
//! A z-series is a set of scans of the same sample taken at different
//! heights, each overlapping its neighbour by a band of detector rows. This
//! crate merges them, projection by projection, into one taller stack.
//!
//! ## Quickstart
//!
//! ```no_run
//! use zstitch::core::{RawStackScan, Scan};
//! use zstitch::{z_stitch, ZSeries, ZStitchingConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let top = RawStackScan::open("scans/z_000")?;
//! let bottom = RawStackScan::open("scans/z_001")?;
//! let config = ZStitchingConfig::load_json("stitching.json")?;
//!
//! let outcome = z_stitch(ZSeries::new(vec![&top as &dyn Scan, &bottom]), config)?;
//! println!("wrote {} with shape {:?}", outcome.url, outcome.shape);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `zstitch::core`: frames, the [`core::Scan`] capability and scan backends.
//! - `zstitch::registration`: vertical overlap and horizontal shift estimation.
//! - [`order_scans`], [`validate_series`]: canonical order and compatibility checks.
//! - [`ShiftEstimator`]: resolves `auto` per-pair shifts.
//! - [`OverlapKernel`], [`get_overlap_areas`]: blending of one overlap band.
//! - [`stitch_frames`], [`z_stitch_raw_frames`], [`FrameStitcher`]: frame composition.
//! - [`BatchLoader`], [`ZStitcher`]: the end-to-end run.

pub use zstitch_core as core;
pub use zstitch_registration as registration;

mod batch;
mod composition;
mod config;
mod diagnostics;
mod error;
pub mod io;
mod metadata;
mod orchestrator;
mod order;
mod overlap;
mod provenance;
mod shifts;
pub mod sink;
mod stitch;
mod validate;

pub use batch::{bunches, BatchLoader};
pub use composition::{FrameComposition, RowSegment};
pub use config::{
    Auto, AutoParamsInput, AutoShiftParams, InputsSection, OutputDtype, OutputSection, PairParam,
    ParamSpec, ResolvedShifts, ShiftSpec, SliceSelector, StitchingSection, StitchingType,
    ZStitchingConfig,
};
pub use diagnostics::{
    Diagnostics, FlipState, LogDiagnostics, RecordingDiagnostics, ShiftDiagnostic, StitchStage,
};
pub use error::StitchError;
pub use metadata::{DetectorGeometry, SampleGeometry, StitchedMetadata};
pub use orchestrator::{z_stitch, StitchOutcome, ZStitcher};
pub use order::{order_scans, OrderedSeries, ZSeries};
pub use overlap::{get_overlap_areas, OverlapKernel, OverlapStrategy};
pub use provenance::Provenance;
pub use shifts::{ShiftEstimator, ShiftResolution};
pub use sink::{DirectoryStore, MemorySink, OutputSink, StoredDataset};
pub use stitch::{stitch_frames, z_stitch_raw_frames, FrameInput, FrameStitcher};
pub use validate::{validate_series, ReadingOrder, ANGLE_ATOL_DEG};
