//! Row-range plan used to assemble one stitched frame.
//!
//! The plan depends only on frame heights, the common width and the
//! resolved overlaps, so it is computed once per run and applied to every
//! projection.

use crate::overlap::{band_offsets, get_overlap_areas, OverlapKernel};
use crate::StitchError;
use std::ops::Range;
use zstitch_core::Frame;

/// One contiguous block of output rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowSegment {
    /// Rows copied unchanged from `frame`.
    Raw {
        frame: usize,
        src: Range<usize>,
        dst: Range<usize>,
    },
    /// Band blended from frames `pair` and `pair + 1`.
    Blend { pair: usize, dst: Range<usize> },
}

impl RowSegment {
    pub fn dst(&self) -> &Range<usize> {
        match self {
            RowSegment::Raw { dst, .. } | RowSegment::Blend { dst, .. } => dst,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameComposition {
    width: usize,
    height: usize,
    frame_heights: Vec<usize>,
    overlaps: Vec<usize>,
    stitching_heights: Vec<usize>,
    segments: Vec<RowSegment>,
}

impl FrameComposition {
    /// Plan the composition of frames of `frame_heights` rows.
    ///
    /// Pair `p` overlaps by `overlaps[p]` rows of which `stitching_heights[p]`
    /// are blended; the remaining overlap rows are split evenly between both
    /// frames so the stitched height is `sum(heights) - sum(overlaps)`.
    pub fn new(
        frame_heights: &[usize],
        width: usize,
        overlaps: &[usize],
        stitching_heights: &[usize],
    ) -> Result<Self, StitchError> {
        let n = frame_heights.len();
        if n < 2 {
            return Err(StitchError::Configuration(format!(
                "stitching needs at least two frames, got {n}"
            )));
        }
        if overlaps.len() != n - 1 || stitching_heights.len() != n - 1 {
            return Err(StitchError::Configuration(format!(
                "{n} frames need {} overlaps and stitching heights, got {} and {}",
                n - 1,
                overlaps.len(),
                stitching_heights.len()
            )));
        }
        for (p, (&o, &s)) in overlaps.iter().zip(stitching_heights).enumerate() {
            if o == 0 {
                return Err(StitchError::InvalidValue(format!(
                    "pair {p}: frames must overlap by at least one row"
                )));
            }
            if s > o {
                return Err(StitchError::InvalidValue(format!(
                    "pair {p}: stitching height {s} exceeds the overlap {o}"
                )));
            }
            if o > frame_heights[p] || o > frame_heights[p + 1] {
                return Err(StitchError::Shape(format!(
                    "pair {p}: overlap of {o} rows does not fit frames of {} and {} rows",
                    frame_heights[p],
                    frame_heights[p + 1]
                )));
            }
        }

        let mut segments = Vec::with_capacity(2 * n - 1);
        let mut cursor = 0;
        let mut start = 0;
        for (i, &h) in frame_heights.iter().enumerate() {
            let end = match overlaps.get(i) {
                Some(&o) => h - o + band_offsets(o, stitching_heights[i]).0,
                None => h,
            };
            if start > end {
                return Err(StitchError::Shape(format!(
                    "frame {i} ({h} rows) is shorter than the overlaps around it"
                )));
            }
            segments.push(RowSegment::Raw {
                frame: i,
                src: start..end,
                dst: cursor..cursor + (end - start),
            });
            cursor += end - start;
            if let Some(&o) = overlaps.get(i) {
                let s = stitching_heights[i];
                segments.push(RowSegment::Blend {
                    pair: i,
                    dst: cursor..cursor + s,
                });
                cursor += s;
                start = band_offsets(o, s).1;
            }
        }
        Ok(Self {
            width,
            height: cursor,
            frame_heights: frame_heights.to_vec(),
            overlaps: overlaps.to_vec(),
            stitching_heights: stitching_heights.to_vec(),
            segments,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Stitched height.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frame_heights(&self) -> &[usize] {
        &self.frame_heights
    }

    pub fn segments(&self) -> &[RowSegment] {
        &self.segments
    }

    /// Check `frames` against the plan without touching any output.
    pub fn check_frames(&self, frames: &[Frame]) -> Result<(), StitchError> {
        if frames.len() != self.frame_heights.len() {
            return Err(StitchError::Configuration(format!(
                "composition planned for {} frames, got {}",
                self.frame_heights.len(),
                frames.len()
            )));
        }
        for (i, (f, &h)) in frames.iter().zip(&self.frame_heights).enumerate() {
            if f.shape() != (h, self.width) {
                return Err(StitchError::Shape(format!(
                    "frame {i} is {:?}, expected ({h}, {})",
                    f.shape(),
                    self.width
                )));
            }
        }
        Ok(())
    }

    /// Assemble `frames` into `out` (row-major, `height * width` values).
    pub fn compose_into(
        &self,
        frames: &[Frame],
        kernels: &[OverlapKernel],
        out: &mut [f32],
    ) -> Result<(), StitchError> {
        self.check_frames(frames)?;
        if kernels.len() != self.overlaps.len() {
            return Err(StitchError::Configuration(format!(
                "{} overlap kernels for {} pairs",
                kernels.len(),
                self.overlaps.len()
            )));
        }
        if out.len() != self.height * self.width {
            return Err(StitchError::Shape(format!(
                "output buffer holds {} values, stitched frame has {}",
                out.len(),
                self.height * self.width
            )));
        }
        let w = self.width;
        for segment in &self.segments {
            match segment {
                RowSegment::Raw { frame, src, dst } => {
                    out[dst.start * w..dst.end * w]
                        .copy_from_slice(&frames[*frame].data[src.start * w..src.end * w]);
                }
                RowSegment::Blend { pair, dst } => {
                    let p = *pair;
                    let (a, b) = get_overlap_areas(
                        frames[p].view(),
                        frames[p + 1].view(),
                        self.overlaps[p],
                        self.stitching_heights[p],
                    )?;
                    kernels[p].stitch_into(a, b, &mut out[dst.start * w..dst.end * w])?;
                }
            }
        }
        Ok(())
    }

    pub fn compose(&self, frames: &[Frame], kernels: &[OverlapKernel]) -> Result<Frame, StitchError> {
        let mut data = vec![0.0; self.height * self.width];
        self.compose_into(frames, kernels, &mut data)?;
        Ok(Frame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}
