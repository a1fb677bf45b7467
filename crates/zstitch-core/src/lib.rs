//! Frame and scan primitives for z-series stitching.
//!
//! This crate knows nothing about registration or blending. It provides the
//! 2D [`Frame`] type, the [`Scan`] capability every acquisition backend
//! implements, flat-field normalization, and two backends: [`MemoryScan`]
//! and the directory based [`RawStackScan`].

mod error;
pub mod flat_field;
mod frame;
mod logger;
mod memory_scan;
mod raw_stack;
mod scan;

pub use error::ScanError;
pub use frame::{BoundaryMode, Frame, FrameError, FrameView};
pub use memory_scan::{MemoryScan, MEMORY_DATASET};
pub use raw_stack::{RawStackDescriptor, RawStackScan, DESCRIPTOR_FILE, PROJECTIONS_DATASET};
pub use scan::{
    BoundingBox, FieldOfView, FrameLocation, FrameSource, PixelSize, ReducedFrames, Scan,
    ScanFrame, ScanInfo, Translations,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_env, LOG_ENV};
