//! Acquisition metadata of the stitched dataset.

use crate::config::OutputDtype;
use crate::diagnostics::Diagnostics;
use crate::order::ZSeries;
use crate::StitchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zstitch_core::{FieldOfView, Scan, Translations};

/// NXtomo image key of a projection frame.
pub const IMAGE_KEY_PROJECTION: u8 = 0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    pub field_of_view: Option<FieldOfView>,
    pub distance: Option<f64>,
    pub x_pixel_size: f64,
    pub y_pixel_size: f64,
    pub magnification: Option<f64>,
    /// Stitched frames are always stored unflipped.
    pub x_flipped: bool,
    pub y_flipped: bool,
    pub tomo_n: usize,
    pub image_key_control: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleGeometry {
    pub name: Option<String>,
    /// Angles of the reference scan, whose reading order every scan follows.
    pub rotation_angles: Vec<f64>,
    /// Mean translation over every scan, repeated per frame.
    pub translations: Translations,
}

/// Everything written next to the stitched frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchedMetadata {
    pub title: String,
    pub energy: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub detector: DetectorGeometry,
    pub sample: SampleGeometry,
    /// `(n_projections, stitched_height, frame_width)`.
    pub shape: [usize; 3],
    pub dtype: OutputDtype,
}

fn merged_axis<'a>(
    axis: impl Iterator<Item = &'a Option<Vec<f64>>>,
    n_frames: usize,
) -> Option<Vec<f64>> {
    let (sum, count) = axis
        .flatten()
        .flatten()
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    (count > 0).then(|| vec![sum / count as f64; n_frames])
}

impl StitchedMetadata {
    /// Merge the metadata of an ordered series stitched to `stitched_height` rows.
    pub fn merge(
        series: &ZSeries<'_>,
        stitched_height: usize,
        dtype: OutputDtype,
        diagnostics: &mut dyn Diagnostics,
    ) -> Result<Self, StitchError> {
        let scans = series.scans();
        let reference: &dyn Scan = *scans.first().ok_or_else(|| {
            StitchError::Configuration("cannot merge metadata of an empty series".to_string())
        })?;
        let tomo_n = reference.projections().len();

        let start_time = scans.iter().filter_map(|s| s.start_time()).min();
        if start_time.is_none() {
            diagnostics.warning("no start time found in any scan".to_string());
        }
        let end_time = scans.iter().filter_map(|s| s.end_time()).max();
        if end_time.is_none() {
            diagnostics.warning("no end time found in any scan".to_string());
        }
        let title = scans
            .iter()
            .map(|s| s.sequence_name().unwrap_or(s.identifier()))
            .collect::<Vec<_>>()
            .join(",");

        let pixel = reference.pixel_size();
        let detector = DetectorGeometry {
            field_of_view: reference.field_of_view(),
            distance: reference.distance(),
            x_pixel_size: pixel.x,
            y_pixel_size: pixel.y,
            magnification: reference.magnification(),
            x_flipped: false,
            y_flipped: false,
            tomo_n,
            image_key_control: vec![IMAGE_KEY_PROJECTION; tomo_n],
        };
        let translations = Translations {
            x: merged_axis(scans.iter().map(|s| &s.translations().x), tomo_n),
            y: merged_axis(scans.iter().map(|s| &s.translations().y), tomo_n),
            z: merged_axis(scans.iter().map(|s| &s.translations().z), tomo_n),
        };
        Ok(Self {
            title: format!("stitch done from {title}"),
            energy: reference.energy(),
            start_time,
            end_time,
            detector,
            sample: SampleGeometry {
                name: reference.sample_name().map(str::to_string),
                rotation_angles: reference.rotation_angles().to_vec(),
                translations,
            },
            shape: [tomo_n, stitched_height, reference.dim_1()],
            dtype,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingDiagnostics;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use zstitch_core::{Frame, MemoryScan, PixelSize, ScanInfo};

    fn scan(id: &str, z: f64, start_hour: Option<u32>) -> MemoryScan {
        let mut info = ScanInfo::new(3, 4, PixelSize::square(2e-6));
        info.rotation_angles = vec![0.0, 90.0];
        info.translations = Translations::fixed(1.0, 0.0, z, 2);
        info.x_flipped = Some(true);
        info.energy = Some(20.0);
        info.sequence_name = Some(id.to_string());
        info.sample_name = Some("rock".to_string());
        info.start_time = start_hour.map(|h| Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap());
        info.end_time = start_hour.map(|h| Utc.with_ymd_and_hms(2024, 3, 1, h + 1, 0, 0).unwrap());
        MemoryScan::new(id, info, vec![Frame::zeros(3, 4); 2]).expect("scan")
    }

    #[test]
    fn merge_takes_reference_geometry_and_averages_translations() {
        let (a, b) = (scan("top", 10.0, Some(9)), scan("bottom", 4.0, Some(7)));
        let series = ZSeries::new(vec![&a as &dyn Scan, &b]);
        let mut d = RecordingDiagnostics::new();
        let m = StitchedMetadata::merge(&series, 7, OutputDtype::Float32, &mut d).expect("merge");
        assert_eq!(m.title, "stitch done from top,bottom");
        assert_eq!(m.shape, [2, 7, 3]);
        assert!(!m.detector.x_flipped);
        assert_eq!(m.detector.image_key_control, vec![IMAGE_KEY_PROJECTION; 2]);
        assert_eq!(m.sample.rotation_angles, vec![0.0, 90.0]);
        let z = m.sample.translations.z.expect("z");
        assert_eq!(z.len(), 2);
        assert_relative_eq!(z[0], 7.0);
        assert_eq!(m.start_time.map(|t| t.format("%H").to_string()).as_deref(), Some("07"));
        assert_eq!(m.end_time.map(|t| t.format("%H").to_string()).as_deref(), Some("10"));
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn missing_times_are_warnings() {
        let (a, b) = (scan("top", 10.0, None), scan("bottom", 4.0, None));
        let series = ZSeries::new(vec![&a as &dyn Scan, &b]);
        let mut d = RecordingDiagnostics::new();
        let m = StitchedMetadata::merge(&series, 7, OutputDtype::Uint16, &mut d).expect("merge");
        assert!(m.start_time.is_none());
        assert_eq!(d.warnings.len(), 2);
    }
}
