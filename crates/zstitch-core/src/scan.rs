//! The scan capability consumed by the stitcher.
//!
//! A scan is one tomography acquisition at a fixed vertical position. The
//! stitcher only sees scans through the [`Scan`] trait, so every backend
//! (in-memory, raw directory stacks, ...) implements it once and the rest of
//! the pipeline stays backend agnostic.

use crate::{flat_field, Frame, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Range;

/// Where one projection lives inside a backend: dataset name + slice index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameLocation {
    pub dataset: String,
    pub slice: usize,
}

impl FrameLocation {
    pub fn new(dataset: impl Into<String>, slice: usize) -> Self {
        Self {
            dataset: dataset.into(),
            slice,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOfView {
    Full,
    Half,
}

/// Detector pixel size in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub x: f64,
    pub y: f64,
}

impl PixelSize {
    pub fn square(size: f64) -> Self {
        Self { x: size, y: size }
    }
}

/// Per-frame sample translations in meters. `None` when not recorded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Translations {
    #[serde(default)]
    pub x: Option<Vec<f64>>,
    #[serde(default)]
    pub y: Option<Vec<f64>>,
    #[serde(default)]
    pub z: Option<Vec<f64>>,
}

fn mean_of(values: &Option<Vec<f64>>) -> Option<f64> {
    match values {
        Some(v) if !v.is_empty() => Some(v.iter().sum::<f64>() / v.len() as f64),
        _ => None,
    }
}

fn is_evolving(values: &Option<Vec<f64>>) -> bool {
    match values {
        Some(v) => v.windows(2).any(|w| w[0] != w[1]),
        None => false,
    }
}

impl Translations {
    /// Constant translation along every axis.
    pub fn fixed(x: f64, y: f64, z: f64, n: usize) -> Self {
        Self {
            x: Some(vec![x; n]),
            y: Some(vec![y; n]),
            z: Some(vec![z; n]),
        }
    }

    pub fn mean_x(&self) -> Option<f64> {
        mean_of(&self.x)
    }

    pub fn mean_y(&self) -> Option<f64> {
        mean_of(&self.y)
    }

    pub fn mean_z(&self) -> Option<f64> {
        mean_of(&self.z)
    }

    /// Axes (`"x"`, `"y"`, `"z"`) whose translation changes during the scan.
    pub fn evolving_axes(&self) -> Vec<&'static str> {
        [("x", &self.x), ("y", &self.y), ("z", &self.z)]
            .into_iter()
            .filter(|(_, v)| is_evolving(v))
            .map(|(axis, _)| axis)
            .collect()
    }
}

/// Closed interval along one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: f64,
    pub max: f64,
}

/// Reduced darks or flats keyed by the acquisition frame index they were taken at.
pub type ReducedFrames = BTreeMap<usize, Frame>;

/// Acquisition metadata shared by every scan backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Frame width in pixels.
    pub dim_1: usize,
    /// Frame height in pixels.
    pub dim_2: usize,
    pub pixel_size: PixelSize,
    /// Rotation angle of every projection in degrees, in projection order.
    #[serde(default)]
    pub rotation_angles: Vec<f64>,
    #[serde(default)]
    pub field_of_view: Option<FieldOfView>,
    /// Sample to detector distance in meters.
    #[serde(default)]
    pub distance: Option<f64>,
    /// Beam energy in keV.
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub translations: Translations,
    #[serde(default)]
    pub x_flipped: Option<bool>,
    #[serde(default)]
    pub y_flipped: Option<bool>,
    #[serde(default)]
    pub magnification: Option<f64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence_name: Option<String>,
    #[serde(default)]
    pub sample_name: Option<String>,
}

impl ScanInfo {
    /// Minimal metadata: geometry only, everything optional left unset.
    pub fn new(dim_1: usize, dim_2: usize, pixel_size: PixelSize) -> Self {
        Self {
            dim_1,
            dim_2,
            pixel_size,
            rotation_angles: Vec::new(),
            field_of_view: None,
            distance: None,
            energy: None,
            translations: Translations::default(),
            x_flipped: None,
            y_flipped: None,
            magnification: None,
            start_time: None,
            end_time: None,
            sequence_name: None,
            sample_name: None,
        }
    }
}

/// Read access to one tomography acquisition.
///
/// Projections are addressed by their acquisition frame index (the keys of
/// [`Scan::projections`]). Metadata accessors default to [`Scan::info`];
/// backends override the ones they derive differently.
pub trait Scan: Send + Sync + Debug {
    /// Stable, human readable identifier used in logs and errors.
    fn identifier(&self) -> &str;

    fn info(&self) -> &ScanInfo;

    /// Projection frame index -> storage location, in acquisition order.
    fn projections(&self) -> &BTreeMap<usize, FrameLocation>;

    /// Read the contiguous slices `slices` of `dataset`.
    fn read_frames(&self, dataset: &str, slices: Range<usize>) -> Result<Vec<Frame>, ScanError>;

    fn rotation_angles(&self) -> &[f64] {
        &self.info().rotation_angles
    }

    fn pixel_size(&self) -> PixelSize {
        self.info().pixel_size
    }

    fn field_of_view(&self) -> Option<FieldOfView> {
        self.info().field_of_view
    }

    fn distance(&self) -> Option<f64> {
        self.info().distance
    }

    fn energy(&self) -> Option<f64> {
        self.info().energy
    }

    fn translations(&self) -> &Translations {
        &self.info().translations
    }

    fn x_flipped(&self) -> Option<bool> {
        self.info().x_flipped
    }

    fn y_flipped(&self) -> Option<bool> {
        self.info().y_flipped
    }

    fn dim_1(&self) -> usize {
        self.info().dim_1
    }

    fn dim_2(&self) -> usize {
        self.info().dim_2
    }

    fn magnification(&self) -> Option<f64> {
        self.info().magnification
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.info().start_time
    }

    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.info().end_time
    }

    fn sequence_name(&self) -> Option<&str> {
        self.info().sequence_name.as_deref()
    }

    fn sample_name(&self) -> Option<&str> {
        self.info().sample_name.as_deref()
    }

    fn reduced_darks(&self) -> Option<&ReducedFrames> {
        None
    }

    fn reduced_flats(&self) -> Option<&ReducedFrames> {
        None
    }

    /// Normalize `frames` (taken at acquisition indices `indices`) by this
    /// scan's reduced darks and flats. Frames pass through untouched when
    /// either reference set is missing.
    fn flat_field_correction(
        &self,
        frames: Vec<Frame>,
        indices: &[usize],
    ) -> Result<Vec<Frame>, ScanError> {
        match (self.reduced_darks(), self.reduced_flats()) {
            (Some(darks), Some(flats)) if !darks.is_empty() && !flats.is_empty() => {
                flat_field::correct_frames(frames, indices, darks, flats)
            }
            _ => {
                if frames.len() != indices.len() {
                    return Err(ScanError::IndexCount {
                        frames: frames.len(),
                        indices: indices.len(),
                    });
                }
                Ok(frames)
            }
        }
    }

    /// Vertical extent covered by the scan, from its z translations and the
    /// physical frame height.
    fn z_bounding_box(&self) -> Option<BoundingBox> {
        let z = self.translations().z.as_ref()?;
        let (lo, hi) = z.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        if !lo.is_finite() || !hi.is_finite() {
            return None;
        }
        let half = self.dim_2() as f64 * self.pixel_size().y / 2.0;
        Some(BoundingBox {
            min: lo - half,
            max: hi + half,
        })
    }

    /// Acquisition index of the `ordinal`-th projection.
    fn projection_index(&self, ordinal: usize) -> Option<usize> {
        self.projections().keys().nth(ordinal).copied()
    }
}

/// Anything that can produce a single 2D frame on demand.
pub trait FrameSource {
    fn load(&self) -> Result<Frame, ScanError>;
}

impl FrameSource for Frame {
    fn load(&self) -> Result<Frame, ScanError> {
        Ok(self.clone())
    }
}

/// One projection of a scan, resolved only when loaded.
#[derive(Clone, Copy, Debug)]
pub struct ScanFrame<'a> {
    pub scan: &'a dyn Scan,
    /// Acquisition frame index (a key of `scan.projections()`).
    pub index: usize,
}

impl<'a> ScanFrame<'a> {
    pub fn new(scan: &'a dyn Scan, index: usize) -> Self {
        Self { scan, index }
    }
}

impl FrameSource for ScanFrame<'_> {
    fn load(&self) -> Result<Frame, ScanError> {
        let location = self.scan.projections().get(&self.index).ok_or_else(|| {
            ScanError::UnknownProjection {
                scan: self.scan.identifier().to_string(),
                index: self.index,
            }
        })?;
        let mut frames = self
            .scan
            .read_frames(&location.dataset, location.slice..location.slice + 1)?;
        frames.pop().ok_or_else(|| {
            ScanError::Invalid(format!(
                "scan {} returned no frame for slice {}",
                self.scan.identifier(),
                location.slice
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn translation_means_and_evolution() {
        let t = Translations {
            x: Some(vec![1.0, 1.0, 1.0]),
            y: None,
            z: Some(vec![0.0, 1.0, 2.0]),
        };
        assert_relative_eq!(t.mean_x().expect("x"), 1.0);
        assert!(t.mean_y().is_none());
        assert_relative_eq!(t.mean_z().expect("z"), 1.0);
        assert_eq!(t.evolving_axes(), vec!["z"]);
    }

    #[test]
    fn scan_info_deserializes_with_defaults() {
        let info: ScanInfo = serde_json::from_str(
            r#"{"dim_1": 4, "dim_2": 3, "pixel_size": {"x": 1e-6, "y": 1e-6}}"#,
        )
        .expect("parse");
        assert_eq!(info, ScanInfo::new(4, 3, PixelSize::square(1e-6)));
    }
}
