//! Pairwise compatibility checks across an ordered z-series.

use crate::diagnostics::Diagnostics;
use crate::order::ZSeries;
use crate::{ShiftSpec, StitchError};
use serde::{Deserialize, Serialize};
use zstitch_core::Scan;

/// Angle tolerance, in degrees, when comparing rotation sequences.
pub const ANGLE_ATOL_DEG: f64 = 1.0;
const ENERGY_RTOL: f64 = 1e-3;
const DISTANCE_RTOL: f64 = 1e-2;
const PIXEL_SIZE_RTOL: f64 = 1e-6;
const MAGNIFICATION_RTOL: f64 = 1e-5;

/// Angular reading direction of a scan relative to the first scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingOrder {
    #[default]
    Forward,
    Reversed,
}

impl ReadingOrder {
    pub fn sign(self) -> i8 {
        match self {
            ReadingOrder::Forward => 1,
            ReadingOrder::Reversed => -1,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            ReadingOrder::Forward => ReadingOrder::Reversed,
            ReadingOrder::Reversed => ReadingOrder::Forward,
        }
    }

    /// Position in this scan of the projection at `ordinal` in the reference scan.
    pub fn ordinal(self, ordinal: usize, n: usize) -> usize {
        match self {
            ReadingOrder::Forward => ordinal,
            ReadingOrder::Reversed => n - 1 - ordinal,
        }
    }
}

fn rel_close(a: f64, b: f64, rtol: f64) -> bool {
    (a - b).abs() <= rtol * a.abs().max(b.abs())
}

fn angles_close<'a>(a: impl Iterator<Item = &'a f64>, b: &[f64]) -> bool {
    a.zip(b).all(|(x, y)| (x - y).abs() <= ANGLE_ATOL_DEG)
}

/// Reading direction of `next` relative to `prev`, or `None` if the angle
/// sequences match neither directly nor reversed.
fn relative_reading_order(prev: &[f64], next: &[f64]) -> Option<ReadingOrder> {
    if prev.len() != next.len() {
        return None;
    }
    if angles_close(next.iter(), prev) {
        Some(ReadingOrder::Forward)
    } else if angles_close(next.iter().rev(), prev) {
        Some(ReadingOrder::Reversed)
    } else {
        None
    }
}

fn check_per_pair_lengths(n_scans: usize, spec: &ShiftSpec) -> Result<(), StitchError> {
    let expected = n_scans - 1;
    for (name, len) in [
        ("x_shifts", spec.x_shifts.len()),
        ("overlap_height", spec.overlap_heights.len()),
        ("stitching_height", spec.stitching_heights.len()),
    ] {
        if len != expected {
            return Err(StitchError::Configuration(format!(
                "{name} has {len} entries, {n_scans} scans need {expected}"
            )));
        }
    }
    Ok(())
}

fn check_pair(
    prev: &dyn Scan,
    next: &dyn Scan,
    diagnostics: &mut dyn Diagnostics,
) -> Result<(), StitchError> {
    let (a, b) = (prev.identifier(), next.identifier());

    let (na, nb) = (prev.projections().len(), next.projections().len());
    if na != nb {
        return Err(StitchError::mismatch(
            a,
            b,
            format!("projection count {na} vs {nb}"),
        ));
    }
    if prev.dim_1() != next.dim_1() {
        return Err(StitchError::mismatch(
            a,
            b,
            format!("frame width {} vs {}", prev.dim_1(), next.dim_1()),
        ));
    }
    if prev.field_of_view() != next.field_of_view() {
        return Err(StitchError::mismatch(
            a,
            b,
            format!(
                "field of view {:?} vs {:?}",
                prev.field_of_view(),
                next.field_of_view()
            ),
        ));
    }
    let (pa, pb) = (prev.pixel_size(), next.pixel_size());
    if !rel_close(pa.x, pb.x, PIXEL_SIZE_RTOL) || !rel_close(pa.y, pb.y, PIXEL_SIZE_RTOL) {
        return Err(StitchError::mismatch(
            a,
            b,
            format!("pixel size ({}, {}) vs ({}, {})", pa.x, pa.y, pb.x, pb.y),
        ));
    }
    match (prev.distance(), next.distance()) {
        (Some(da), Some(db)) if !rel_close(da, db, DISTANCE_RTOL) => {
            return Err(StitchError::mismatch(
                a,
                b,
                format!("sample to detector distance {da} vs {db}"),
            ));
        }
        (Some(_), Some(_)) => {}
        _ => diagnostics.warning(format!(
            "sample to detector distance missing for `{a}` or `{b}`, not compared"
        )),
    }
    if let (Some(ma), Some(mb)) = (prev.magnification(), next.magnification()) {
        if !rel_close(ma, mb, MAGNIFICATION_RTOL) {
            return Err(StitchError::mismatch(
                a,
                b,
                format!("magnification {ma} vs {mb}"),
            ));
        }
    }
    match (prev.energy(), next.energy()) {
        (Some(ea), Some(eb)) if !rel_close(ea, eb, ENERGY_RTOL) => diagnostics.warning(format!(
            "energy differs between `{a}` ({ea} keV) and `{b}` ({eb} keV)"
        )),
        (Some(_), Some(_)) => {}
        _ => diagnostics.warning(format!("energy missing for `{a}` or `{b}`, not compared")),
    }
    Ok(())
}

fn warn_per_scan(scan: &dyn Scan, diagnostics: &mut dyn Diagnostics) {
    let id = scan.identifier();
    for axis in scan.translations().evolving_axes() {
        diagnostics.warning(format!(
            "`{id}`: {axis} translation evolves during the scan, using it as recorded"
        ));
    }
    if scan.x_flipped().is_none() || scan.y_flipped().is_none() {
        diagnostics.warning(format!(
            "`{id}`: detector flip state unknown, assuming not flipped"
        ));
    }
}

/// Check an ordered series and the per-pair parameters that go with it.
///
/// Returns the reading order of every scan relative to the first one.
/// Mismatches that make stitching meaningless are fatal; the rest are
/// reported as warnings.
pub fn validate_series(
    series: &ZSeries<'_>,
    spec: &ShiftSpec,
    diagnostics: &mut dyn Diagnostics,
) -> Result<Vec<ReadingOrder>, StitchError> {
    let scans = series.scans();
    if scans.len() < 2 {
        return Err(StitchError::Configuration(format!(
            "z-stitching needs at least two scans, got {}",
            scans.len()
        )));
    }
    check_per_pair_lengths(scans.len(), spec)?;

    let mut orders = Vec::with_capacity(scans.len());
    orders.push(ReadingOrder::Forward);
    warn_per_scan(scans[0], diagnostics);
    for pair in scans.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        check_pair(prev, next, diagnostics)?;
        warn_per_scan(next, diagnostics);

        let relative = relative_reading_order(prev.rotation_angles(), next.rotation_angles())
            .ok_or_else(|| {
                StitchError::mismatch(
                    prev.identifier(),
                    next.identifier(),
                    "rotation angles differ, also when read in reverse",
                )
            })?;
        let last = orders.last().copied().unwrap_or_default();
        orders.push(match relative {
            ReadingOrder::Forward => last,
            ReadingOrder::Reversed => last.flipped(),
        });
    }
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Auto, PairParam};
    use crate::diagnostics::RecordingDiagnostics;
    use zstitch_core::{FieldOfView, Frame, MemoryScan, PixelSize, ScanInfo, Translations};

    fn info(angles: Vec<f64>) -> ScanInfo {
        let mut info = ScanInfo::new(4, 3, PixelSize::square(1e-6));
        info.translations = Translations::fixed(0.0, 0.0, 0.0, angles.len());
        info.rotation_angles = angles;
        info.field_of_view = Some(FieldOfView::Full);
        info.distance = Some(0.5);
        info.energy = Some(19.0);
        info.x_flipped = Some(false);
        info.y_flipped = Some(false);
        info
    }

    fn scan(id: &str, info: ScanInfo) -> MemoryScan {
        let n = info.rotation_angles.len();
        let frame = Frame::zeros(info.dim_1, info.dim_2);
        MemoryScan::new(id, info, vec![frame; n]).expect("scan")
    }

    fn spec(n_pairs: usize) -> ShiftSpec {
        ShiftSpec {
            x_shifts: vec![PairParam::Value(0.0); n_pairs],
            overlap_heights: vec![PairParam::Auto(Auto); n_pairs],
            stitching_heights: vec![PairParam::Auto(Auto); n_pairs],
        }
    }

    fn run(scans: &[&MemoryScan], spec: &ShiftSpec) -> (Result<Vec<ReadingOrder>, StitchError>, RecordingDiagnostics) {
        let series = ZSeries::new(scans.iter().map(|&s| s as &dyn Scan).collect());
        let mut d = RecordingDiagnostics::new();
        let res = validate_series(&series, spec, &mut d);
        (res, d)
    }

    #[test]
    fn reversed_angles_flip_reading_order_cumulatively() {
        let a = scan("a", info(vec![0.0, 90.0, 180.0]));
        let b = scan("b", info(vec![180.0, 90.0, 0.0]));
        let c = scan("c", info(vec![0.3, 90.0, 179.5]));
        let (res, d) = run(&[&a, &b, &c], &spec(2));
        assert_eq!(
            res.expect("valid"),
            vec![ReadingOrder::Forward, ReadingOrder::Reversed, ReadingOrder::Forward]
        );
        assert!(d.warnings.is_empty(), "{:?}", d.warnings);
    }

    #[test]
    fn unrelated_angles_are_fatal() {
        let a = scan("a", info(vec![0.0, 90.0, 180.0]));
        let b = scan("b", info(vec![0.0, 45.0, 180.0]));
        let (res, _) = run(&[&a, &b], &spec(1));
        assert!(matches!(res, Err(StitchError::GeometryMismatch { .. })));
    }

    #[test]
    fn per_pair_lengths_must_match() {
        let a = scan("a", info(vec![0.0]));
        let b = scan("b", info(vec![0.0]));
        let c = scan("c", info(vec![0.0]));
        let mut bad = spec(2);
        bad.x_shifts.truncate(1);
        let (res, _) = run(&[&a, &b, &c], &bad);
        assert!(matches!(res, Err(StitchError::Configuration(_))));
    }

    #[test]
    fn fatal_and_warning_checks() {
        let a = scan("a", info(vec![0.0, 1.0]));

        let mut fov = info(vec![0.0, 1.0]);
        fov.field_of_view = Some(FieldOfView::Half);
        let (res, _) = run(&[&a, &scan("b", fov)], &spec(1));
        assert!(matches!(res, Err(StitchError::GeometryMismatch { .. })));

        let mut px = info(vec![0.0, 1.0]);
        px.pixel_size = PixelSize::square(1.1e-6);
        let (res, _) = run(&[&a, &scan("b", px)], &spec(1));
        assert!(matches!(res, Err(StitchError::GeometryMismatch { .. })));

        let mut dist = info(vec![0.0, 1.0]);
        dist.distance = Some(0.6);
        let (res, _) = run(&[&a, &scan("b", dist)], &spec(1));
        assert!(matches!(res, Err(StitchError::GeometryMismatch { .. })));

        let mut soft = info(vec![0.0, 1.0]);
        soft.energy = Some(25.0);
        soft.distance = None;
        soft.x_flipped = None;
        soft.translations.z = Some(vec![0.0, 1e-3]);
        let (res, d) = run(&[&a, &scan("b", soft)], &spec(1));
        assert!(res.is_ok());
        assert_eq!(d.warnings.len(), 4, "{:?}", d.warnings);
    }

    #[test]
    fn shape_and_optics_mismatches_are_fatal() {
        let a = scan("a", info(vec![0.0, 1.0]));
        let mismatch = |other: ScanInfo| {
            let (res, _) = run(&[&a, &scan("b", other)], &spec(1));
            matches!(res, Err(StitchError::GeometryMismatch { .. }))
        };

        assert!(mismatch(info(vec![0.0, 1.0, 2.0])), "projection count");

        let mut wide = info(vec![0.0, 1.0]);
        wide.dim_1 = 5;
        assert!(mismatch(wide), "frame width");

        let mut with_mag = info(vec![0.0, 1.0]);
        with_mag.magnification = Some(10.0);
        let mut other_mag = info(vec![0.0, 1.0]);
        other_mag.magnification = Some(10.1);
        let a_mag = scan("a", with_mag);
        let (res, _) = run(&[&a_mag, &scan("b", other_mag)], &spec(1));
        assert!(matches!(res, Err(StitchError::GeometryMismatch { .. })), "{res:?}");

        // a magnification on one side only is not compared
        let mut one_sided = info(vec![0.0, 1.0]);
        one_sided.magnification = Some(2.0);
        let (res, _) = run(&[&a, &scan("b", one_sided)], &spec(1));
        assert!(res.is_ok(), "{res:?}");
    }

    #[test]
    fn single_scan_is_a_configuration_error() {
        let a = scan("a", info(vec![0.0]));
        let (res, _) = run(&[&a], &spec(0));
        assert!(matches!(res, Err(StitchError::Configuration(_))));
    }

    #[test]
    fn ordinal_mapping_follows_reading_order() {
        assert_eq!(ReadingOrder::Forward.ordinal(2, 10), 2);
        assert_eq!(ReadingOrder::Reversed.ordinal(2, 10), 7);
        assert_eq!(ReadingOrder::Reversed.sign(), -1);
    }
}
