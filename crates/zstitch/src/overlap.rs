//! Blending of the band shared by two vertically adjacent frames.

use crate::StitchError;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::str::FromStr;
use zstitch_core::{Frame, FrameView};

/// How the two bands of an overlap are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapStrategy {
    /// Plain average of both bands.
    #[serde(alias = "MEAN")]
    Mean,
    /// Upper half from the first frame, lower half from the second.
    #[serde(alias = "CLOSEST")]
    Closest,
    /// Weights ramp linearly from the first frame to the second.
    #[serde(alias = "LINEAR_WEIGHTS")]
    LinearWeights,
    /// `cos²` / `sin²` ramp.
    #[default]
    #[serde(alias = "COSINUS_WEIGHTS")]
    CosinusWeights,
}

impl OverlapStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            OverlapStrategy::Mean => "mean",
            OverlapStrategy::Closest => "closest",
            OverlapStrategy::LinearWeights => "linear_weights",
            OverlapStrategy::CosinusWeights => "cosinus_weights",
        }
    }

    /// Per-row weights of the first and second band for a band of `height` rows.
    fn weights(self, height: usize) -> (Vec<f32>, Vec<f32>) {
        let ramp = |start: f64, stop: f64| -> Vec<f64> {
            match height {
                0 => Vec::new(),
                1 => vec![start],
                _ => {
                    let last = (height - 1) as f64;
                    (0..height)
                        .map(|i| start + (stop - start) * (i as f64 / last))
                        .collect()
                }
            }
        };
        let first: Vec<f64> = match self {
            OverlapStrategy::Mean => vec![0.5; height],
            OverlapStrategy::Closest => {
                let keep = height.div_ceil(2);
                (0..height).map(|i| if i < keep { 1.0 } else { 0.0 }).collect()
            }
            OverlapStrategy::LinearWeights => ramp(1.0, 0.0),
            OverlapStrategy::CosinusWeights => ramp(0.0, FRAC_PI_2)
                .into_iter()
                .map(|a| a.cos().powi(2))
                .collect(),
        };
        let second: Vec<f64> = match self {
            OverlapStrategy::LinearWeights => first.iter().rev().copied().collect(),
            OverlapStrategy::CosinusWeights => ramp(0.0, FRAC_PI_2)
                .into_iter()
                .map(|a| a.sin().powi(2))
                .collect(),
            OverlapStrategy::Mean | OverlapStrategy::Closest => {
                first.iter().map(|w| 1.0 - w).collect()
            }
        };
        (
            first.into_iter().map(|w| w as f32).collect(),
            second.into_iter().map(|w| w as f32).collect(),
        )
    }
}

impl fmt::Display for OverlapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlapStrategy {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(OverlapStrategy::Mean),
            "closest" => Ok(OverlapStrategy::Closest),
            "linear_weights" => Ok(OverlapStrategy::LinearWeights),
            "cosinus_weights" => Ok(OverlapStrategy::CosinusWeights),
            _ => Err(StitchError::Configuration(format!(
                "unknown stitching strategy `{s}`"
            ))),
        }
    }
}

/// Blends two `(overlap_height, frame_width)` bands into one.
///
/// Row weights are computed once at construction, so a kernel is built per
/// pair of scans and reused for every projection.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlapKernel {
    overlap_height: usize,
    frame_width: usize,
    strategy: OverlapStrategy,
    first_weights: Vec<f32>,
    second_weights: Vec<f32>,
}

impl OverlapKernel {
    pub fn new(overlap_height: usize, frame_width: usize, strategy: OverlapStrategy) -> Self {
        let (first_weights, second_weights) = strategy.weights(overlap_height);
        Self {
            overlap_height,
            frame_width,
            strategy,
            first_weights,
            second_weights,
        }
    }

    pub fn overlap_height(&self) -> usize {
        self.overlap_height
    }

    pub fn frame_width(&self) -> usize {
        self.frame_width
    }

    pub fn strategy(&self) -> OverlapStrategy {
        self.strategy
    }

    /// Row weights applied to the first (upper) band.
    pub fn first_weights(&self) -> &[f32] {
        &self.first_weights
    }

    /// Row weights applied to the second (lower) band.
    pub fn second_weights(&self) -> &[f32] {
        &self.second_weights
    }

    fn check(&self, band: &FrameView<'_>, which: &str) -> Result<(), StitchError> {
        if band.shape() != (self.overlap_height, self.frame_width) {
            return Err(StitchError::Shape(format!(
                "{which} band is {:?}, kernel expects ({}, {})",
                band.shape(),
                self.overlap_height,
                self.frame_width
            )));
        }
        Ok(())
    }

    /// Blend `first` (upper frame) and `second` (lower frame) bands.
    pub fn stitch(&self, first: FrameView<'_>, second: FrameView<'_>) -> Result<Frame, StitchError> {
        let mut data = vec![0.0; self.overlap_height * self.frame_width];
        self.stitch_into(first, second, &mut data)?;
        Ok(Frame {
            width: self.frame_width,
            height: self.overlap_height,
            data,
        })
    }

    /// Same as [`OverlapKernel::stitch`], writing into a row-major buffer.
    pub fn stitch_into(
        &self,
        first: FrameView<'_>,
        second: FrameView<'_>,
        out: &mut [f32],
    ) -> Result<(), StitchError> {
        self.check(&first, "first")?;
        self.check(&second, "second")?;
        if out.len() != self.overlap_height * self.frame_width {
            return Err(StitchError::Shape(format!(
                "blend target holds {} values, band has {}",
                out.len(),
                self.overlap_height * self.frame_width
            )));
        }
        if self.frame_width == 0 {
            return Ok(());
        }
        for (r, dst) in out.chunks_exact_mut(self.frame_width).enumerate() {
            let (wa, wb) = (self.first_weights[r], self.second_weights[r]);
            for ((d, &a), &b) in dst.iter_mut().zip(first.row(r)).zip(second.row(r)) {
                *d = wa * a + wb * b;
            }
        }
        Ok(())
    }
}

/// Row range `[low, high)` of the blended band inside an overlap of
/// `real_overlap` rows. The odd remainder row goes to the first frame's side.
pub(crate) fn band_offsets(real_overlap: usize, stitching_height: usize) -> (usize, usize) {
    let low = real_overlap / 2 - stitching_height / 2;
    let high = real_overlap / 2 + stitching_height / 2 + stitching_height % 2;
    (low, high)
}

/// Extract the bands to blend from two adjacent frames.
///
/// `first` is the upper frame (its last `real_overlap` rows overlap) and
/// `second` the lower one (its first `real_overlap` rows overlap). Both
/// returned bands are `stitching_height` rows, centered in the overlap.
pub fn get_overlap_areas<'a, 'b>(
    first: FrameView<'a>,
    second: FrameView<'b>,
    real_overlap: usize,
    stitching_height: usize,
) -> Result<(FrameView<'a>, FrameView<'b>), StitchError> {
    if stitching_height > real_overlap {
        return Err(StitchError::InvalidValue(format!(
            "stitching height {stitching_height} exceeds the real overlap {real_overlap}"
        )));
    }
    if real_overlap == 0 {
        return Err(StitchError::InvalidValue(
            "frames must overlap by at least one row".to_string(),
        ));
    }
    if first.width != second.width {
        return Err(StitchError::Shape(format!(
            "frame widths differ: {} vs {}",
            first.width, second.width
        )));
    }
    if real_overlap > first.height || real_overlap > second.height {
        return Err(StitchError::Shape(format!(
            "overlap of {real_overlap} rows does not fit frames of {} and {} rows",
            first.height, second.height
        )));
    }

    let (low, high) = band_offsets(real_overlap, stitching_height);
    let base = first.height - real_overlap;
    let shape_error = || StitchError::Shape("overlap band out of frame".to_string());
    let band_first = first.row_band(base + low..base + high).ok_or_else(shape_error)?;
    let band_second = second.row_band(low..high).ok_or_else(shape_error)?;
    Ok((band_first, band_second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(width: usize, height: usize, offset: f32) -> Frame {
        Frame::from_fn(width, height, |r, c| offset + (r * width + c) as f32)
    }

    #[test]
    fn weights_sum_to_one() {
        for strategy in [
            OverlapStrategy::Mean,
            OverlapStrategy::Closest,
            OverlapStrategy::LinearWeights,
            OverlapStrategy::CosinusWeights,
        ] {
            let k = OverlapKernel::new(7, 3, strategy);
            for (a, b) in k.first_weights().iter().zip(k.second_weights()) {
                assert_relative_eq!(a + b, 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn ramps_go_from_first_to_second_frame() {
        let lin = OverlapKernel::new(5, 1, OverlapStrategy::LinearWeights);
        assert_eq!(lin.first_weights(), &[1.0, 0.75, 0.5, 0.25, 0.0]);
        assert_eq!(lin.second_weights(), &[0.0, 0.25, 0.5, 0.75, 1.0]);
        let cos = OverlapKernel::new(3, 1, OverlapStrategy::CosinusWeights);
        assert_relative_eq!(cos.first_weights()[0], 1.0);
        assert_relative_eq!(cos.first_weights()[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(cos.first_weights()[2], 0.0, epsilon = 1e-6);
        let closest = OverlapKernel::new(5, 1, OverlapStrategy::Closest);
        assert_eq!(closest.first_weights(), &[1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn stitch_keeps_shape_and_blends() {
        let a = Frame::from_fn(4, 3, |_, _| 2.0);
        let b = Frame::from_fn(4, 3, |_, _| 4.0);
        let k = OverlapKernel::new(3, 4, OverlapStrategy::Mean);
        let out = k.stitch(a.view(), b.view()).expect("blend");
        assert_eq!(out.shape(), (3, 4));
        assert!(out.data.iter().all(|&v| v == 3.0));

        let lin = OverlapKernel::new(3, 4, OverlapStrategy::LinearWeights);
        let out = lin.stitch(a.view(), b.view()).expect("blend");
        assert_eq!(out.row(0), &[2.0; 4]);
        assert_eq!(out.row(2), &[4.0; 4]);
    }

    #[test]
    fn stitch_rejects_wrong_band_shape() {
        let a = Frame::zeros(4, 3);
        let b = Frame::zeros(4, 2);
        let k = OverlapKernel::new(3, 4, OverlapStrategy::Mean);
        assert!(matches!(
            k.stitch(a.view(), b.view()),
            Err(StitchError::Shape(_))
        ));
    }

    #[test]
    fn overlap_areas_are_centered() {
        let first = ramp(2, 20, 0.0);
        let second = ramp(2, 20, 1000.0);
        let (a, b) = get_overlap_areas(first.view(), second.view(), 10, 5).expect("areas");
        assert_eq!(a.shape(), (5, 2));
        assert_eq!(b.shape(), (5, 2));
        // rows [13, 18) of the first frame, [3, 8) of the second
        assert_eq!(a.row(0), first.row(13));
        assert_eq!(b.row(0), second.row(3));
        assert_eq!(b.row(4), second.row(7));

        let (a, b) = get_overlap_areas(first.view(), second.view(), 10, 10).expect("full");
        assert_eq!(a.to_frame(), first.view().row_band(10..20).expect("band").to_frame());
        assert_eq!(b.to_frame(), second.view().row_band(0..10).expect("band").to_frame());
    }

    #[test]
    fn overlap_areas_errors() {
        let first = ramp(2, 20, 0.0);
        let narrow = ramp(3, 20, 0.0);
        assert!(matches!(
            get_overlap_areas(first.view(), first.view(), 10, 15),
            Err(StitchError::InvalidValue(_))
        ));
        assert!(matches!(
            get_overlap_areas(first.view(), narrow.view(), 10, 5),
            Err(StitchError::Shape(_))
        ));
        assert!(matches!(
            get_overlap_areas(first.view(), first.view(), 30, 5),
            Err(StitchError::Shape(_))
        ));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(
            "COSINUS_WEIGHTS".parse::<OverlapStrategy>().expect("parse"),
            OverlapStrategy::CosinusWeights
        );
        let s: OverlapStrategy = serde_json::from_str(r#""LINEAR_WEIGHTS""#).expect("alias");
        assert_eq!(s, OverlapStrategy::LinearWeights);
        assert_eq!(OverlapStrategy::Closest.to_string(), "closest");
        assert!("median".parse::<OverlapStrategy>().is_err());
    }
}
