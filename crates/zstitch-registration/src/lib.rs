//! Shift estimation between two vertically overlapping frames.
//!
//! Frames are expected in canonical orientation: `top` is the upper scan and
//! its last rows overlap the first rows of `bottom`. Two estimators are
//! available per axis ([`CorrelationFunction`]):
//!
//! - `phase`: FFT phase correlation of the full inputs ([`PhaseCorrelator`]).
//! - `direct`: normalized correlation of row (or column) mean profiles.
//!
//! `none` disables image based estimation; callers then fall back to the
//! acquisition geometry.

mod error;
mod phase;
pub mod profile;
mod subpixel;

pub use error::RegistrationError;
pub use phase::{CorrelationPeak, PhaseCorrelator, SearchWindow};
pub use subpixel::{parabolic_offset, refine_peak, SubpixelMethod};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zstitch_core::FrameView;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Correlation used to register one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationFunction {
    Phase,
    Direct,
    None,
}

impl CorrelationFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrelationFunction::Phase => "phase",
            CorrelationFunction::Direct => "direct",
            CorrelationFunction::None => "none",
        }
    }
}

impl fmt::Display for CorrelationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown correlation function `{0}` (expected phase, direct or none)")]
pub struct UnknownCorrelationFunction(pub String);

impl FromStr for CorrelationFunction {
    type Err = UnknownCorrelationFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phase" | "phase_correlation" => Ok(CorrelationFunction::Phase),
            "direct" | "direct_correlation" => Ok(CorrelationFunction::Direct),
            "none" | "" => Ok(CorrelationFunction::None),
            _ => Err(UnknownCorrelationFunction(s.to_string())),
        }
    }
}

/// Tuning shared by both estimators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Peak refinement for phase correlation surfaces.
    pub subpixel: SubpixelMethod,
    /// Smallest overlap (rows) considered when searching vertically.
    pub min_overlap: usize,
    /// Largest horizontal offset searched; `None` means a quarter of the width.
    pub max_x_shift: Option<usize>,
    /// Phase correlation peaks below this value are rejected.
    pub min_peak: f64,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            subpixel: SubpixelMethod::Parabolic,
            min_overlap: 8,
            max_x_shift: None,
            min_peak: 0.0,
        }
    }
}

impl RegistrationParams {
    fn x_window(&self, width: usize) -> isize {
        self.max_x_shift
            .unwrap_or(width / 4)
            .min(width.saturating_sub(2))
            .max(1) as isize
    }
}

/// Vertical registration outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalMatch {
    /// Rows shared by the bottom of `top` and the top of `bottom`.
    pub overlap: usize,
    /// Refined row offset of `bottom` inside `top` (`height - overlap` before rounding).
    pub offset: f64,
    /// Horizontal shift seen by the same correlation, when the estimator provides one.
    pub x_shift: Option<f64>,
    pub score: f64,
}

/// Horizontal registration outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalMatch {
    /// Shift, in pixels, to undo on `bottom` so its columns line up with `top`.
    pub x_shift: f64,
    pub score: f64,
}

fn check_pair(top: &FrameView<'_>, bottom: &FrameView<'_>) -> Result<(), RegistrationError> {
    if top.shape() != bottom.shape() {
        return Err(RegistrationError::ShapeMismatch(
            top.height,
            top.width,
            bottom.height,
            bottom.width,
        ));
    }
    Ok(())
}

/// Bottom rows of `top` and top rows of `bottom` over their common height.
///
/// Returns the two views and the number of `top` rows left out above.
fn common_rows<'a>(
    top: FrameView<'a>,
    bottom: FrameView<'a>,
) -> Result<(FrameView<'a>, FrameView<'a>, usize), RegistrationError> {
    let mismatch = || {
        RegistrationError::ShapeMismatch(top.height, top.width, bottom.height, bottom.width)
    };
    if top.width != bottom.width {
        return Err(mismatch());
    }
    let common = top.height.min(bottom.height);
    let skipped = top.height - common;
    let upper = top.row_band(skipped..top.height).ok_or_else(mismatch)?;
    let lower = bottom.row_band(0..common).ok_or_else(mismatch)?;
    Ok((upper, lower, skipped))
}

/// Estimate how many rows of `top` (bottom end) overlap `bottom` (top end).
///
/// Frames of different heights are registered over their common height, so
/// the overlap never exceeds the shorter frame.
///
/// Returns `Ok(None)` for [`CorrelationFunction::None`].
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(top, bottom, params), fields(h = top.height, w = top.width))
)]
pub fn find_vertical_overlap(
    top: FrameView<'_>,
    bottom: FrameView<'_>,
    function: CorrelationFunction,
    params: &RegistrationParams,
) -> Result<Option<VerticalMatch>, RegistrationError> {
    let (top, bottom, skipped) = common_rows(top, bottom)?;
    let min_overlap = params.min_overlap.max(1);
    if top.height <= min_overlap {
        return Err(RegistrationError::TooSmall {
            height: top.height,
            min_overlap,
        });
    }
    let max_dy = (top.height - min_overlap) as isize;

    let found = match function {
        CorrelationFunction::None => return Ok(None),
        CorrelationFunction::Phase => {
            let dx = params.x_window(top.width);
            let correlator = PhaseCorrelator::new(top.width, top.height, params.subpixel);
            let peak = correlator.correlate(
                top,
                bottom,
                &SearchWindow {
                    dy: 1..=max_dy,
                    dx: -dx..=dx,
                },
            )?;
            if peak.peak < params.min_peak {
                return Err(RegistrationError::WeakPeak {
                    peak: peak.peak,
                    min: params.min_peak,
                });
            }
            VerticalMatch {
                overlap: 0,
                offset: peak.dy,
                x_shift: Some(-peak.dx),
                score: peak.peak,
            }
        }
        CorrelationFunction::Direct => {
            let m = profile::best_shift(
                &profile::row_profile(top),
                &profile::row_profile(bottom),
                1..=max_dy,
            )?;
            VerticalMatch {
                overlap: 0,
                offset: m.shift as f64 + m.offset,
                x_shift: None,
                score: m.score,
            }
        }
    };

    let overlap = (top.height as f64 - found.offset).round();
    let overlap = overlap.clamp(min_overlap as f64, (top.height - 1) as f64) as usize;
    log::debug!(
        "vertical registration ({function}): offset {:.3}, overlap {overlap}, score {:.4}",
        found.offset,
        found.score
    );
    Ok(Some(VerticalMatch {
        overlap,
        offset: found.offset + skipped as f64,
        ..found
    }))
}

/// Estimate the horizontal shift between two already extracted overlap bands.
///
/// Returns `Ok(None)` for [`CorrelationFunction::None`].
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(band_top, band_bottom, params), fields(h = band_top.height, w = band_top.width))
)]
pub fn find_horizontal_shift(
    band_top: FrameView<'_>,
    band_bottom: FrameView<'_>,
    function: CorrelationFunction,
    params: &RegistrationParams,
) -> Result<Option<HorizontalMatch>, RegistrationError> {
    check_pair(&band_top, &band_bottom)?;
    if band_top.height == 0 || band_top.width < 3 {
        return Err(RegistrationError::TooSmall {
            height: band_top.height,
            min_overlap: 1,
        });
    }
    let dx = params.x_window(band_top.width);
    let found = match function {
        CorrelationFunction::None => return Ok(None),
        CorrelationFunction::Phase => {
            let correlator =
                PhaseCorrelator::new(band_top.width, band_top.height, params.subpixel);
            let peak = correlator.correlate(
                band_top,
                band_bottom,
                &SearchWindow {
                    dy: 0..=0,
                    dx: -dx..=dx,
                },
            )?;
            if peak.peak < params.min_peak {
                return Err(RegistrationError::WeakPeak {
                    peak: peak.peak,
                    min: params.min_peak,
                });
            }
            HorizontalMatch {
                x_shift: -peak.dx,
                score: peak.peak,
            }
        }
        CorrelationFunction::Direct => {
            let m = profile::best_shift(
                &profile::column_profile(band_top),
                &profile::column_profile(band_bottom),
                -dx..=dx,
            )?;
            HorizontalMatch {
                x_shift: -(m.shift as f64 + m.offset),
                score: m.score,
            }
        }
    };
    log::debug!(
        "horizontal registration ({function}): x shift {:.3}, score {:.4}",
        found.x_shift,
        found.score
    );
    Ok(Some(found))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_function_parses_known_names() {
        assert_eq!("phase".parse(), Ok(CorrelationFunction::Phase));
        assert_eq!(" Direct ".parse(), Ok(CorrelationFunction::Direct));
        assert_eq!("none".parse(), Ok(CorrelationFunction::None));
        assert!("fourier".parse::<CorrelationFunction>().is_err());
        assert_eq!(CorrelationFunction::Phase.to_string(), "phase");
    }

    #[test]
    fn x_window_is_bounded_by_width() {
        let p = RegistrationParams::default();
        assert_eq!(p.x_window(40), 10);
        assert_eq!(p.x_window(3), 1);
        let wide = RegistrationParams {
            max_x_shift: Some(100),
            ..p
        };
        assert_eq!(wide.x_window(20), 18);
    }
}
