//! Row-major `f32` frames and the pixel operations the stitcher relies on.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Frame construction errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame must have non-zero width and height (width={width}, height={height})")]
    Empty { width: usize, height: usize },
    #[error("frame buffer length {got} does not match {width}x{height}")]
    BufferLength {
        width: usize,
        height: usize,
        got: usize,
    },
}

/// Owned 2D frame, `data[row * width + col]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>, // row-major, len = w*h
}

/// Borrowed band of consecutive frame rows.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [f32], // row-major, len = w*h
}

/// How samples outside `[0, n)` are resolved when shifting a frame.
///
/// Matches the usual `ndimage` conventions:
/// - `Nearest`: `a a a | a b c d | d d d`
/// - `Constant`: `k k k | a b c d | k k k`
/// - `Reflect`: `c b a | a b c d | d c b`
/// - `Mirror`: `d c b | a b c d | c b a`
/// - `Wrap`: `b c d | a b c d | a b c`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    #[default]
    Nearest,
    Constant {
        cval: f32,
    },
    Reflect,
    Mirror,
    Wrap,
}

impl BoundaryMode {
    /// Map a possibly out-of-range sample index into `[0, n)`.
    ///
    /// Returns `None` when the sample should take the constant fill value.
    fn resolve(self, i: isize, n: usize) -> Option<usize> {
        let n_i = n as isize;
        if (0..n_i).contains(&i) {
            return Some(i as usize);
        }
        match self {
            BoundaryMode::Nearest => Some(i.clamp(0, n_i - 1) as usize),
            BoundaryMode::Constant { .. } => None,
            BoundaryMode::Reflect => {
                let period = 2 * n_i;
                let m = i.rem_euclid(period);
                Some(if m < n_i { m } else { period - 1 - m } as usize)
            }
            BoundaryMode::Mirror => {
                if n == 1 {
                    return Some(0);
                }
                let period = 2 * n_i - 2;
                let m = i.rem_euclid(period);
                Some(if m < n_i { m } else { period - m } as usize)
            }
            BoundaryMode::Wrap => Some(i.rem_euclid(n_i) as usize),
        }
    }

    /// Bring a column offset into a range where every tap still resolves
    /// the same way, so the integer arithmetic cannot overflow.
    fn fold_offset(self, base: f64, n: usize) -> isize {
        let n_f = n as f64;
        let folded = match self {
            BoundaryMode::Nearest | BoundaryMode::Constant { .. } => base.clamp(-n_f - 1.0, n_f),
            BoundaryMode::Reflect => base.rem_euclid(2.0 * n_f),
            BoundaryMode::Mirror if n > 1 => base.rem_euclid(2.0 * n_f - 2.0),
            BoundaryMode::Mirror => 0.0,
            BoundaryMode::Wrap => base.rem_euclid(n_f),
        };
        folded as isize
    }

    fn fill(self) -> f32 {
        match self {
            BoundaryMode::Constant { cval } => cval,
            _ => 0.0,
        }
    }
}

impl Frame {
    /// Wrap a row-major buffer, checking its length.
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width
            .checked_mul(height)
            .ok_or(FrameError::Empty { width, height })?;
        if data.len() != expected {
            return Err(FrameError::BufferLength {
                width,
                height,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Build a frame by evaluating `f(row, col)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for r in 0..height {
            for c in 0..width {
                data.push(f(r, c));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// `(height, width)`, the order arrays are usually described in.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.width;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    /// Borrow rows `rows.start..rows.end`, or `None` if the range leaves the frame.
    pub fn row_band(&self, rows: Range<usize>) -> Option<FrameView<'_>> {
        if rows.start > rows.end || rows.end > self.height {
            return None;
        }
        Some(FrameView {
            width: self.width,
            height: rows.end - rows.start,
            data: &self.data[rows.start * self.width..rows.end * self.width],
        })
    }

    /// Mirror columns (left/right).
    pub fn flip_lr(&self) -> Frame {
        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.height {
            data.extend(self.row(r).iter().rev());
        }
        Frame {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Mirror rows (up/down).
    pub fn flip_ud(&self) -> Frame {
        let mut data = Vec::with_capacity(self.data.len());
        for r in (0..self.height).rev() {
            data.extend_from_slice(self.row(r));
        }
        Frame {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Shift the content horizontally by `shift` pixels with order-1 interpolation.
    ///
    /// Positive shifts move content to the right: `out[c] = in[c - shift]`.
    /// A zero shift returns an exact copy.
    pub fn shift_horizontal(&self, shift: f64, mode: BoundaryMode) -> Frame {
        if shift == 0.0 {
            return self.clone();
        }
        let base = (-shift).floor();
        let frac = (-shift - base) as f32;
        let base = mode.fold_offset(base, self.width);
        let fill = mode.fill();

        // Column taps are identical for every row.
        let taps: Vec<(Option<usize>, Option<usize>)> = (0..self.width as isize)
            .map(|c| {
                (
                    mode.resolve(c + base, self.width),
                    mode.resolve(c + base + 1, self.width),
                )
            })
            .collect();

        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.height {
            let row = self.row(r);
            for &(i0, i1) in &taps {
                let v0 = i0.map_or(fill, |i| row[i]);
                let v1 = i1.map_or(fill, |i| row[i]);
                data.push(v0 + frac * (v1 - v0));
            }
        }
        Frame {
            width: self.width,
            height: self.height,
            data,
        }
    }

    pub fn mean(&self) -> f64 {
        self.view().mean()
    }
}

impl<'a> FrameView<'a> {
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[inline]
    pub fn row(&self, row: usize) -> &'a [f32] {
        let start = row * self.width;
        &self.data[start..start + self.width]
    }

    /// Sub-band of this view, or `None` if the range leaves the view.
    pub fn row_band(&self, rows: Range<usize>) -> Option<FrameView<'a>> {
        if rows.start > rows.end || rows.end > self.height {
            return None;
        }
        Some(FrameView {
            width: self.width,
            height: rows.end - rows.start,
            data: &self.data[rows.start * self.width..rows.end * self.width],
        })
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(width: usize, height: usize) -> Frame {
        Frame::from_fn(width, height, |r, c| (r * width + c) as f32)
    }

    #[test]
    fn new_rejects_wrong_buffer_length() {
        let err = Frame::new(3, 2, vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferLength {
                width: 3,
                height: 2,
                got: 5
            }
        );
        assert!(matches!(
            Frame::new(0, 2, Vec::new()),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn flips_are_involutions() {
        let f = ramp(4, 3);
        assert_eq!(f.flip_lr().row(0), &[3.0, 2.0, 1.0, 0.0]);
        assert_eq!(f.flip_ud().row(0), f.row(2));
        assert_eq!(f.flip_lr().flip_lr(), f);
        assert_eq!(f.flip_ud().flip_ud(), f);
    }

    #[test]
    fn row_band_borrows_consecutive_rows() {
        let f = ramp(3, 5);
        let band = f.row_band(3..5).expect("band");
        assert_eq!(band.shape(), (2, 3));
        assert_eq!(band.row(0), f.row(3));
        assert!(f.row_band(4..6).is_none());
        assert_eq!(f.row_band(2..2).expect("empty band").height, 0);
    }

    #[test]
    fn integer_shift_moves_columns() {
        let f = ramp(5, 1);
        let right = f.shift_horizontal(2.0, BoundaryMode::Nearest);
        assert_eq!(right.row(0), &[0.0, 0.0, 0.0, 1.0, 2.0]);
        let left = f.shift_horizontal(-1.0, BoundaryMode::Constant { cval: -1.0 });
        assert_eq!(left.row(0), &[1.0, 2.0, 3.0, 4.0, -1.0]);
    }

    #[test]
    fn fractional_shift_interpolates_linearly() {
        let f = ramp(6, 2);
        let shifted = f.shift_horizontal(-0.25, BoundaryMode::Nearest);
        for c in 0..5 {
            assert_relative_eq!(shifted.get(1, c), f.get(1, c) + 0.25, epsilon = 1e-5);
        }
        // last column clamps onto itself
        assert_relative_eq!(shifted.get(1, 5), f.get(1, 5), epsilon = 1e-5);
    }

    #[test]
    fn boundary_modes_resolve_like_ndimage() {
        let n = 4;
        let map = |mode: BoundaryMode| -> Vec<Option<usize>> {
            (-3..0).map(|i| mode.resolve(i, n)).collect()
        };
        assert_eq!(map(BoundaryMode::Nearest), vec![Some(0); 3]);
        assert_eq!(map(BoundaryMode::Reflect), vec![Some(2), Some(1), Some(0)]);
        assert_eq!(map(BoundaryMode::Mirror), vec![Some(3), Some(2), Some(1)]);
        assert_eq!(map(BoundaryMode::Wrap), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(map(BoundaryMode::Constant { cval: 0.0 }), vec![None; 3]);
        assert_eq!(BoundaryMode::Reflect.resolve(4, n), Some(3));
        assert_eq!(BoundaryMode::Mirror.resolve(4, n), Some(2));
    }

    #[test]
    fn huge_shifts_saturate_without_overflow() {
        let f = ramp(5, 2);
        let far_right = f.shift_horizontal(1e300, BoundaryMode::Nearest);
        assert_eq!(far_right.row(1), &[5.0; 5]);
        let far_left = f.shift_horizontal(-1e300, BoundaryMode::Constant { cval: 2.0 });
        assert_eq!(far_left.row(0), &[2.0; 5]);
        // periodic modes only see the offset modulo their period
        assert_eq!(
            f.shift_horizontal(1e6 + 2.0, BoundaryMode::Wrap),
            f.shift_horizontal(2.0, BoundaryMode::Wrap)
        );
        assert_eq!(
            f.shift_horizontal(-(1e6 + 3.0), BoundaryMode::Reflect),
            f.shift_horizontal(-3.0, BoundaryMode::Reflect)
        );
    }

    #[test]
    fn zero_shift_is_exact_copy() {
        let f = Frame::from_fn(7, 3, |r, c| ((r * 31 + c * 17) % 11) as f32 * 0.1);
        assert_eq!(f.shift_horizontal(0.0, BoundaryMode::Wrap), f);
    }
}
