//! Resolution of `auto` per-pair shifts.
//!
//! For each adjacent pair the estimator registers one representative
//! projection of the upper scan against the matching projection (same
//! rotation angle) of the lower scan. Given values pass through untouched.

use crate::config::{AutoShiftParams, PairParam, ResolvedShifts, ShiftSpec};
use crate::diagnostics::{Diagnostics, FlipState, ShiftDiagnostic};
use crate::order::ZSeries;
use crate::validate::ReadingOrder;
use crate::StitchError;
use zstitch_core::{Frame, FrameSource, Scan, ScanFrame};
use zstitch_registration::{
    find_horizontal_shift, find_vertical_overlap, CorrelationFunction, RegistrationError,
    RegistrationParams,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Resolved shifts plus the orientation retained for every scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ShiftResolution {
    pub shifts: ResolvedShifts,
    pub flips: Vec<FlipState>,
}

#[derive(Clone, Copy, Debug)]
struct PairEstimate {
    overlap: usize,
    x_shift: f64,
    y_function: Option<CorrelationFunction>,
    x_function: Option<CorrelationFunction>,
    score: Option<f64>,
}

/// Resolves `auto` per-pair parameters from the scans themselves.
///
/// Frames of different heights are registered over their common rows.
#[derive(Clone, Debug)]
pub struct ShiftEstimator {
    params: AutoShiftParams,
    registration: RegistrationParams,
}

impl ShiftEstimator {
    pub fn new(params: AutoShiftParams) -> Self {
        Self {
            params,
            registration: RegistrationParams::default(),
        }
    }

    pub fn with_registration(mut self, registration: RegistrationParams) -> Self {
        self.registration = registration;
        self
    }

    pub fn params(&self) -> AutoShiftParams {
        self.params
    }

    /// Resolve every `auto` entry of `spec` for the ordered `series`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(n = series.len()))
    )]
    pub fn resolve(
        &self,
        series: &ZSeries<'_>,
        spec: &ShiftSpec,
        orders: &[ReadingOrder],
        diagnostics: &mut dyn Diagnostics,
    ) -> Result<ShiftResolution, StitchError> {
        let scans = series.scans();
        let n_pairs = scans.len().saturating_sub(1);
        if orders.len() != scans.len()
            || spec.x_shifts.len() != n_pairs
            || spec.overlap_heights.len() != n_pairs
            || spec.stitching_heights.len() != n_pairs
        {
            return Err(StitchError::Configuration(format!(
                "shift parameters do not match a series of {} scans",
                scans.len()
            )));
        }

        let mut flips: Vec<FlipState> = scans.iter().map(|&s| FlipState::of_scan(s)).collect();
        let mut cache: Vec<Option<Frame>> = vec![None; scans.len()];
        let mut shifts = ResolvedShifts {
            x_shifts: Vec::with_capacity(n_pairs),
            overlap_heights: Vec::with_capacity(n_pairs),
            stitching_heights: Vec::with_capacity(n_pairs),
        };

        for p in 0..n_pairs {
            let (upper, lower) = (scans[p], scans[p + 1]);
            let (x_param, o_param) = (spec.x_shifts[p], spec.overlap_heights[p]);
            let y_registers =
                o_param.is_auto() && self.params.y_cross_correlation_func != CorrelationFunction::None;
            let x_registers =
                x_param.is_auto() && self.params.x_cross_correlation_func != CorrelationFunction::None;

            let mut ordinal = None;
            let estimate = if y_registers || x_registers {
                let n = upper.projections().len();
                let k = self.params.cross_correlation_slice.resolve(n)?;
                ordinal = Some(k);
                let top = flips[p].apply(self.representative(upper, orders[p], k, &mut cache[p])?);
                let raw_bottom = self.representative(lower, orders[p + 1], k, &mut cache[p + 1])?;

                let mut best: Option<(PairEstimate, FlipState)> = None;
                let mut recorded_error = None;
                for candidate in flip_candidates(lower, flips[p + 1]) {
                    let bottom = candidate.apply(raw_bottom.clone());
                    match self.estimate_pair(upper, lower, &top, &bottom, x_param, o_param) {
                        Ok(found) => {
                            let better = match &best {
                                None => true,
                                Some((b, _)) => found.score.unwrap_or(f64::NEG_INFINITY)
                                    > b.score.unwrap_or(f64::NEG_INFINITY),
                            };
                            if better {
                                best = Some((found, candidate));
                            }
                        }
                        Err(e) if candidate == flips[p + 1] => recorded_error = Some(e),
                        Err(e) => log::debug!(
                            "flip candidate {candidate:?} of `{}` rejected: {e}",
                            lower.identifier()
                        ),
                    }
                }
                let Some((found, flip)) = best else {
                    return Err(recorded_error.unwrap_or_else(|| StitchError::ShiftEstimation {
                        first: upper.identifier().to_string(),
                        second: lower.identifier().to_string(),
                        reason: "no orientation could be registered".to_string(),
                    }));
                };
                if flip != flips[p + 1] {
                    diagnostics.warning(format!(
                        "`{}` looks flipped relative to `{}` ({flip:?}), correcting it",
                        lower.identifier(),
                        upper.identifier()
                    ));
                    flips[p + 1] = flip;
                }
                found
            } else {
                PairEstimate {
                    overlap: match o_param.value() {
                        Some(o) => o,
                        None => geometric_overlap(upper, lower)?,
                    },
                    x_shift: x_param.value().unwrap_or(0.0),
                    y_function: o_param.is_auto().then_some(CorrelationFunction::None),
                    x_function: x_param.is_auto().then_some(CorrelationFunction::None),
                    score: None,
                }
            };

            let stitching_height = spec.stitching_heights[p].value().unwrap_or(estimate.overlap);
            if stitching_height > estimate.overlap {
                return Err(StitchError::Configuration(format!(
                    "pair {p} (`{}` / `{}`): stitching height {stitching_height} exceeds the overlap {}",
                    upper.identifier(),
                    lower.identifier(),
                    estimate.overlap
                )));
            }
            diagnostics.shift_resolved(&ShiftDiagnostic {
                pair: p,
                first: upper.identifier().to_string(),
                second: lower.identifier().to_string(),
                overlap_height: estimate.overlap,
                stitching_height,
                x_shift: estimate.x_shift,
                y_function: estimate.y_function,
                x_function: estimate.x_function,
                projection: ordinal,
                score: estimate.score,
                flip: flips[p + 1],
            });
            shifts.x_shifts.push(estimate.x_shift);
            shifts.overlap_heights.push(estimate.overlap);
            shifts.stitching_heights.push(stitching_height);
        }
        Ok(ShiftResolution { shifts, flips })
    }

    /// Flat-fielded projection of `scan` at the angle of the reference
    /// ordinal `k`, not yet flipped.
    fn representative(
        &self,
        scan: &dyn Scan,
        order: ReadingOrder,
        k: usize,
        cache: &mut Option<Frame>,
    ) -> Result<Frame, StitchError> {
        if let Some(frame) = cache {
            return Ok(frame.clone());
        }
        let n = scan.projections().len();
        if k >= n {
            return Err(StitchError::Configuration(format!(
                "scan `{}` has {n} projections, cannot use projection {k}",
                scan.identifier()
            )));
        }
        let ordinal = order.ordinal(k, n);
        let index = scan.projection_index(ordinal).ok_or_else(|| {
            StitchError::Configuration(format!(
                "scan `{}` has no projection {ordinal}",
                scan.identifier()
            ))
        })?;
        let frame = ScanFrame::new(scan, index).load()?;
        let frame = scan
            .flat_field_correction(vec![frame], &[index])?
            .pop()
            .ok_or_else(|| {
                StitchError::Configuration(format!(
                    "flat-field correction of `{}` returned no frame",
                    scan.identifier()
                ))
            })?;
        *cache = Some(frame.clone());
        Ok(frame)
    }

    fn estimate_pair(
        &self,
        upper: &dyn Scan,
        lower: &dyn Scan,
        top: &Frame,
        bottom: &Frame,
        x_param: PairParam<f64>,
        o_param: PairParam<usize>,
    ) -> Result<PairEstimate, StitchError> {
        let failed = |e: RegistrationError| StitchError::ShiftEstimation {
            first: upper.identifier().to_string(),
            second: lower.identifier().to_string(),
            reason: e.to_string(),
        };
        let y_func = self.params.y_cross_correlation_func;
        let x_func = self.params.x_cross_correlation_func;
        let mut score = None;

        let (overlap, y_function) = match o_param.value() {
            Some(o) => (o, None),
            None => match find_vertical_overlap(top.view(), bottom.view(), y_func, &self.registration)
                .map_err(failed)?
            {
                Some(found) => {
                    score = Some(found.score);
                    (found.overlap, Some(y_func))
                }
                None => (geometric_overlap(upper, lower)?, Some(CorrelationFunction::None)),
            },
        };

        let (x_shift, x_function) = match x_param.value() {
            Some(x) => (x, None),
            None => {
                if overlap > top.height || overlap > bottom.height {
                    return Err(StitchError::ShiftEstimation {
                        first: upper.identifier().to_string(),
                        second: lower.identifier().to_string(),
                        reason: format!("overlap of {overlap} rows exceeds the frame height"),
                    });
                }
                let band_top = top.row_band(top.height - overlap..top.height);
                let band_bottom = bottom.row_band(0..overlap);
                let (Some(band_top), Some(band_bottom)) = (band_top, band_bottom) else {
                    return Err(StitchError::Shape("overlap band out of frame".to_string()));
                };
                match find_horizontal_shift(band_top, band_bottom, x_func, &self.registration)
                    .map_err(failed)?
                {
                    Some(found) => {
                        if score.is_none() {
                            score = Some(found.score);
                        }
                        (found.x_shift, Some(x_func))
                    }
                    None => (0.0, Some(CorrelationFunction::None)),
                }
            }
        };
        Ok(PairEstimate {
            overlap,
            x_shift,
            y_function,
            x_function,
            score,
        })
    }
}

/// Orientations worth trying for `scan`: the recorded one first, then every
/// combination of toggling the flips the scan does not record.
fn flip_candidates(scan: &dyn Scan, recorded: FlipState) -> Vec<FlipState> {
    let lr_unknown = scan.x_flipped().is_none();
    let ud_unknown = scan.y_flipped().is_none();
    let mut out = vec![recorded];
    if lr_unknown {
        out.push(FlipState {
            lr: !recorded.lr,
            ..recorded
        });
    }
    if ud_unknown {
        out.push(FlipState {
            ud: !recorded.ud,
            ..recorded
        });
    }
    if lr_unknown && ud_unknown {
        out.push(FlipState {
            lr: !recorded.lr,
            ud: !recorded.ud,
        });
    }
    out
}

/// Overlap implied by the scans' z positions: frame height minus the
/// vertical distance between the scan centers, in pixels.
fn geometric_overlap(upper: &dyn Scan, lower: &dyn Scan) -> Result<usize, StitchError> {
    let failed = |reason: String| StitchError::ShiftEstimation {
        first: upper.identifier().to_string(),
        second: lower.identifier().to_string(),
        reason,
    };
    let (Some(z_upper), Some(z_lower)) = (
        upper.translations().mean_z(),
        lower.translations().mean_z(),
    ) else {
        return Err(failed(
            "no z translation to derive the overlap from".to_string(),
        ));
    };
    let pixel = upper.pixel_size().y;
    if pixel.is_nan() || pixel <= 0.0 {
        return Err(failed(format!("invalid y pixel size {pixel}")));
    }
    let height = (upper.dim_2() + lower.dim_2()) as f64 / 2.0;
    let overlap = (height - (z_upper - z_lower).abs() / pixel).round();
    if overlap < 1.0 {
        return Err(failed(format!(
            "scans are {:.0} pixels apart, they do not overlap",
            (z_upper - z_lower).abs() / pixel
        )));
    }
    let max = upper.dim_2().min(lower.dim_2());
    if overlap > max as f64 {
        return Err(failed(format!(
            "geometric overlap of {overlap} rows exceeds the frame height {max}"
        )));
    }
    Ok(overlap as usize)
}
