//! Composition of one stitched projection from the frames of every scan.

use crate::composition::FrameComposition;
use crate::config::{OutputDtype, ResolvedShifts};
use crate::overlap::{OverlapKernel, OverlapStrategy};
use crate::sink::OutputSink;
use crate::StitchError;
use zstitch_core::{BoundaryMode, Frame, FrameSource};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A frame given directly or resolved on demand.
pub enum FrameInput<'a> {
    Loaded(Frame),
    Source(&'a dyn FrameSource),
}

impl FrameInput<'_> {
    fn resolve(self) -> Result<Frame, StitchError> {
        match self {
            FrameInput::Loaded(frame) => Ok(frame),
            FrameInput::Source(source) => Ok(source.load()?),
        }
    }
}

impl From<Frame> for FrameInput<'_> {
    fn from(frame: Frame) -> Self {
        FrameInput::Loaded(frame)
    }
}

fn cast_in_place(frame: &mut Frame, dtype: OutputDtype) {
    if dtype == OutputDtype::Uint16 {
        for v in &mut frame.data {
            *v = dtype.cast(*v);
        }
    }
}

fn check_kernels(kernels: &[OverlapKernel], n_pairs: usize, width: usize) -> Result<(), StitchError> {
    if kernels.len() != n_pairs {
        return Err(StitchError::Configuration(format!(
            "{} overlap kernels for {n_pairs} pairs",
            kernels.len()
        )));
    }
    if let Some(k) = kernels.iter().find(|k| k.frame_width() != width) {
        return Err(StitchError::Shape(format!(
            "overlap kernel built for width {}, frames are {width} wide",
            k.frame_width()
        )));
    }
    Ok(())
}

/// Everything needed to stitch projections of one run, computed once.
#[derive(Clone, Debug)]
pub struct FrameStitcher {
    composition: FrameComposition,
    kernels: Vec<OverlapKernel>,
    x_shifts: Vec<f64>,
    dtype: OutputDtype,
    shift_mode: BoundaryMode,
}

impl FrameStitcher {
    /// Plan stitching of frames of `frame_heights` rows and `width` columns.
    pub fn new(
        frame_heights: &[usize],
        width: usize,
        shifts: &ResolvedShifts,
        strategy: OverlapStrategy,
        dtype: OutputDtype,
        shift_mode: BoundaryMode,
    ) -> Result<Self, StitchError> {
        let kernels = shifts
            .stitching_heights
            .iter()
            .map(|&s| OverlapKernel::new(s, width, strategy))
            .collect();
        Self::with_kernels(
            frame_heights,
            width,
            &shifts.x_shifts,
            &shifts.overlap_heights,
            kernels,
            dtype,
            shift_mode,
        )
    }

    /// Same as [`FrameStitcher::new`] with caller-provided kernels; each
    /// kernel's height is the stitching height of its pair.
    pub fn with_kernels(
        frame_heights: &[usize],
        width: usize,
        x_shifts: &[f64],
        overlaps: &[usize],
        kernels: Vec<OverlapKernel>,
        dtype: OutputDtype,
        shift_mode: BoundaryMode,
    ) -> Result<Self, StitchError> {
        let n_pairs = frame_heights.len().saturating_sub(1);
        if x_shifts.len() != n_pairs {
            return Err(StitchError::Configuration(format!(
                "{} x shifts for {} frames",
                x_shifts.len(),
                frame_heights.len()
            )));
        }
        if let Some(x) = x_shifts.iter().find(|x| !x.is_finite()) {
            return Err(StitchError::InvalidValue(format!("x shift {x} is not finite")));
        }
        if let Some(x) = x_shifts.iter().find(|x| x.abs() > width as f64) {
            return Err(StitchError::InvalidValue(format!(
                "x shift {x} exceeds the frame width {width}"
            )));
        }
        check_kernels(&kernels, n_pairs, width)?;
        let stitching_heights: Vec<usize> = kernels.iter().map(OverlapKernel::overlap_height).collect();
        let composition = FrameComposition::new(frame_heights, width, overlaps, &stitching_heights)?;
        Ok(Self {
            composition,
            kernels,
            x_shifts: x_shifts.to_vec(),
            dtype,
            shift_mode,
        })
    }

    pub fn composition(&self) -> &FrameComposition {
        &self.composition
    }

    pub fn kernels(&self) -> &[OverlapKernel] {
        &self.kernels
    }

    pub fn dtype(&self) -> OutputDtype {
        self.dtype
    }

    /// `(stitched_height, width)`.
    pub fn output_shape(&self) -> (usize, usize) {
        (self.composition.height(), self.composition.width())
    }

    /// Stitch one projection, first frame on top.
    ///
    /// Frame `i + 1` is shifted horizontally by `-x_shifts[i]` before
    /// composition; the first frame is never shifted.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    pub fn stitch(&self, frames: Vec<Frame>) -> Result<Frame, StitchError> {
        self.composition.check_frames(&frames)?;
        let frames: Vec<Frame> = frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| match i.checked_sub(1).map(|p| self.x_shifts[p]) {
                Some(x) if x != 0.0 => frame.shift_horizontal(-x, self.shift_mode),
                _ => frame,
            })
            .collect();
        let mut out = self.composition.compose(&frames, &self.kernels)?;
        cast_in_place(&mut out, self.dtype);
        Ok(out)
    }
}

/// Stitch one projection from `frames`, top to bottom.
///
/// `y_overlap_heights[i]` rows are shared by frames `i` and `i + 1` and
/// `kernels[i]` blends the centered part of them. Every check runs before
/// the output is allocated; when `sink` is given the result is also written
/// there as projection `index`.
pub fn stitch_frames(
    frames: Vec<FrameInput<'_>>,
    x_relative_shifts: &[f64],
    y_overlap_heights: &[usize],
    dtype: OutputDtype,
    shift_mode: BoundaryMode,
    kernels: &[OverlapKernel],
    sink: Option<(&mut dyn OutputSink, usize)>,
) -> Result<Frame, StitchError> {
    if frames.len() < 2 {
        return Err(StitchError::Configuration(format!(
            "stitching needs at least two frames, got {}",
            frames.len()
        )));
    }
    if y_overlap_heights.len() != frames.len() - 1 {
        return Err(StitchError::Configuration(format!(
            "{} overlap heights for {} frames",
            y_overlap_heights.len(),
            frames.len()
        )));
    }
    let frames = frames
        .into_iter()
        .map(FrameInput::resolve)
        .collect::<Result<Vec<_>, _>>()?;
    let width = frames[0].width;
    if let Some(f) = frames.iter().find(|f| f.width != width) {
        return Err(StitchError::Shape(format!(
            "frame widths differ: {width} vs {}",
            f.width
        )));
    }
    let heights: Vec<usize> = frames.iter().map(|f| f.height).collect();
    let stitcher = FrameStitcher::with_kernels(
        &heights,
        width,
        x_relative_shifts,
        y_overlap_heights,
        kernels.to_vec(),
        dtype,
        shift_mode,
    )?;
    let out = stitcher.stitch(frames)?;
    if let Some((sink, index)) = sink {
        sink.write_frame(index, &out)?;
    }
    Ok(out)
}

/// Stitch frames that are already aligned horizontally and flat-fielded.
///
/// `y_shifts[i]` is the signed position of frame `i + 1` relative to the
/// bottom of frame `i`; it must be strictly negative (the frames overlap by
/// `-y_shifts[i]` rows).
pub fn z_stitch_raw_frames(
    frames: &[Frame],
    y_shifts: &[i64],
    kernels: &[OverlapKernel],
    dtype: OutputDtype,
) -> Result<Frame, StitchError> {
    if frames.len() < 2 {
        return Err(StitchError::Configuration(format!(
            "stitching needs at least two frames, got {}",
            frames.len()
        )));
    }
    if y_shifts.len() != frames.len() - 1 {
        return Err(StitchError::Configuration(format!(
            "{} y shifts for {} frames",
            y_shifts.len(),
            frames.len()
        )));
    }
    let overlaps = y_shifts
        .iter()
        .map(|&y| {
            if y >= 0 {
                Err(StitchError::InvalidValue(format!(
                    "y shift {y} does not describe an overlap, it must be negative"
                )))
            } else {
                usize::try_from(y.unsigned_abs())
                    .map_err(|_| StitchError::InvalidValue(format!("y shift {y} is out of range")))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let width = frames[0].width;
    check_kernels(kernels, overlaps.len(), width)?;
    let stitching_heights: Vec<usize> = kernels.iter().map(OverlapKernel::overlap_height).collect();
    let heights: Vec<usize> = frames.iter().map(|f| f.height).collect();
    let composition = FrameComposition::new(&heights, width, &overlaps, &stitching_heights)?;
    let mut out = composition.compose(frames, kernels)?;
    cast_in_place(&mut out, dtype);
    Ok(out)
}
