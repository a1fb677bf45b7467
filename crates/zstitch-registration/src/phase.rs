//! FFT phase correlation over rectangular frames.
//!
//! Both inputs are mean-subtracted and zero-padded to at least twice their
//! size, so every translation up to the frame size is observable without
//! wraparound. The peak is searched inside a caller supplied window only.

use crate::subpixel::{refine_peak, SubpixelMethod};
use crate::RegistrationError;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::ops::RangeInclusive;
use std::sync::Arc;
use zstitch_core::FrameView;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Translations considered when looking for the peak, in pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchWindow {
    pub dy: RangeInclusive<isize>,
    pub dx: RangeInclusive<isize>,
}

/// Best translation `(dy, dx)` such that `reference[r + dy, c + dx] ~ target[r, c]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    pub dy: f64,
    pub dx: f64,
    /// Height of the normalized correlation peak (1.0 for a perfect match).
    pub peak: f64,
    /// `1 - second / peak`, where `second` is the best value away from the peak.
    pub confidence: f64,
}

pub struct PhaseCorrelator {
    width: usize,
    height: usize,
    rows_n: usize,
    cols_n: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
    subpixel: SubpixelMethod,
}

impl std::fmt::Debug for PhaseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseCorrelator")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rows_n", &self.rows_n)
            .field("cols_n", &self.cols_n)
            .field("subpixel", &self.subpixel)
            .finish()
    }
}

impl PhaseCorrelator {
    /// Plan FFTs for `width x height` inputs.
    pub fn new(width: usize, height: usize, subpixel: SubpixelMethod) -> Self {
        let rows_n = (2 * height.max(1)).next_power_of_two();
        let cols_n = (2 * width.max(1)).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            width,
            height,
            rows_n,
            cols_n,
            row_forward: planner.plan_fft_forward(cols_n),
            row_inverse: planner.plan_fft_inverse(cols_n),
            col_forward: planner.plan_fft_forward(rows_n),
            col_inverse: planner.plan_fft_inverse(rows_n),
            subpixel,
        }
    }

    /// Padded surface size `(rows, cols)`.
    pub fn surface_shape(&self) -> (usize, usize) {
        (self.rows_n, self.cols_n)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, reference, target), fields(w = self.width, h = self.height))
    )]
    pub fn correlate(
        &self,
        reference: FrameView<'_>,
        target: FrameView<'_>,
        window: &SearchWindow,
    ) -> Result<CorrelationPeak, RegistrationError> {
        for view in [&reference, &target] {
            if view.shape() != (self.height, self.width) {
                return Err(RegistrationError::ShapeMismatch(
                    view.height,
                    view.width,
                    self.height,
                    self.width,
                ));
            }
        }
        let a = self.prepare(reference)?;
        let b = self.prepare(target)?;
        let fa = self.fft_2d(a, false);
        let fb = self.fft_2d(b, false);

        let cross: Vec<Complex<f64>> = fa
            .iter()
            .zip(&fb)
            .map(|(&x, &y)| {
                let product = x * y.conj();
                let magnitude = product.norm();
                if magnitude > 1e-12 {
                    product / magnitude
                } else {
                    Complex::new(0.0, 0.0)
                }
            })
            .collect();
        let norm = 1.0 / (self.rows_n * self.cols_n) as f64;
        let surface: Vec<f64> = self
            .fft_2d(cross, true)
            .into_iter()
            .map(|c| c.re * norm)
            .collect();

        self.find_peak(&surface, window)
    }

    fn prepare(&self, view: FrameView<'_>) -> Result<Vec<Complex<f64>>, RegistrationError> {
        if view.data.iter().any(|v| !v.is_finite()) {
            return Err(RegistrationError::NonFinite);
        }
        let mean = view.mean();
        let mut padded = vec![Complex::new(0.0, 0.0); self.rows_n * self.cols_n];
        for r in 0..view.height {
            let dst = &mut padded[r * self.cols_n..r * self.cols_n + view.width];
            for (d, &v) in dst.iter_mut().zip(view.row(r)) {
                *d = Complex::new(v as f64 - mean, 0.0);
            }
        }
        Ok(padded)
    }

    fn fft_2d(&self, mut data: Vec<Complex<f64>>, inverse: bool) -> Vec<Complex<f64>> {
        let (row_fft, col_fft) = if inverse {
            (&self.row_inverse, &self.col_inverse)
        } else {
            (&self.row_forward, &self.col_forward)
        };
        for row in data.chunks_exact_mut(self.cols_n) {
            row_fft.process(row);
        }
        let mut t = transpose(&data, self.rows_n, self.cols_n);
        for col in t.chunks_exact_mut(self.rows_n) {
            col_fft.process(col);
        }
        transpose(&t, self.cols_n, self.rows_n)
    }

    fn at(&self, surface: &[f64], dy: isize, dx: isize) -> f64 {
        let y = dy.rem_euclid(self.rows_n as isize) as usize;
        let x = dx.rem_euclid(self.cols_n as isize) as usize;
        surface[y * self.cols_n + x]
    }

    fn find_peak(
        &self,
        surface: &[f64],
        window: &SearchWindow,
    ) -> Result<CorrelationPeak, RegistrationError> {
        let mut best: Option<(isize, isize, f64)> = None;
        for dy in window.dy.clone() {
            for dx in window.dx.clone() {
                let v = self.at(surface, dy, dx);
                if v.is_finite() && best.is_none_or(|(_, _, b)| v > b) {
                    best = Some((dy, dx, v));
                }
            }
        }
        let Some((py, px, peak)) = best else {
            return Err(RegistrationError::FlatSurface);
        };
        if peak <= 1e-9 {
            return Err(RegistrationError::FlatSurface);
        }

        let mut patch = [[0.0; 3]; 3];
        for (iy, line) in patch.iter_mut().enumerate() {
            for (ix, v) in line.iter_mut().enumerate() {
                *v = self.at(surface, py + iy as isize - 1, px + ix as isize - 1);
            }
        }
        let (oy, ox) = refine_peak(self.subpixel, &patch);

        let mut second = 0.0f64;
        for dy in window.dy.clone() {
            for dx in window.dx.clone() {
                if (dy - py).abs() <= 2 && (dx - px).abs() <= 2 {
                    continue;
                }
                second = second.max(self.at(surface, dy, dx));
            }
        }

        Ok(CorrelationPeak {
            dy: py as f64 + oy,
            dx: px as f64 + ox,
            peak,
            confidence: (1.0 - second / peak).clamp(0.0, 1.0),
        })
    }
}

fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}
