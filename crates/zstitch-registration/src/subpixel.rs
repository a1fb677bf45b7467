//! Sub-pixel refinement of correlation peaks.

use nalgebra::{Matrix2, SMatrix, SVector, Vector2};
use serde::{Deserialize, Serialize};

/// How an integer correlation peak is refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubpixelMethod {
    /// Keep the integer peak.
    None,
    /// Independent three-point parabola along each axis.
    #[default]
    Parabolic,
    /// Least-squares paraboloid over the 3x3 neighbourhood.
    Quadratic,
}

/// Vertex offset of the parabola through `(-1, l)`, `(0, c)`, `(1, r)`.
///
/// Returns `0.0` when the three points do not describe a maximum.
pub fn parabolic_offset(l: f64, c: f64, r: f64) -> f64 {
    let denom = l + r - 2.0 * c;
    if !denom.is_finite() || denom >= -1e-12 {
        return 0.0;
    }
    ((l - r) / (2.0 * denom)).clamp(-0.5, 0.5)
}

/// Refine a peak from its 3x3 neighbourhood `patch[dy + 1][dx + 1]`.
///
/// Returns `(offset_y, offset_x)` to add to the integer peak position.
pub fn refine_peak(method: SubpixelMethod, patch: &[[f64; 3]; 3]) -> (f64, f64) {
    match method {
        SubpixelMethod::None => (0.0, 0.0),
        SubpixelMethod::Parabolic => parabolic_2d(patch),
        SubpixelMethod::Quadratic => quadratic_fit(patch).unwrap_or_else(|| parabolic_2d(patch)),
    }
}

fn parabolic_2d(patch: &[[f64; 3]; 3]) -> (f64, f64) {
    let oy = parabolic_offset(patch[0][1], patch[1][1], patch[2][1]);
    let ox = parabolic_offset(patch[1][0], patch[1][1], patch[1][2]);
    (oy, ox)
}

/// Fit `f(x, y) = a + b x + c y + d x^2 + e y^2 + g x y` and return its vertex.
fn quadratic_fit(patch: &[[f64; 3]; 3]) -> Option<(f64, f64)> {
    let mut a = SMatrix::<f64, 9, 6>::zeros();
    let mut v = SVector::<f64, 9>::zeros();
    let mut row = 0;
    for (iy, line) in patch.iter().enumerate() {
        for (ix, &value) in line.iter().enumerate() {
            let x = ix as f64 - 1.0;
            let y = iy as f64 - 1.0;
            a.set_row(
                row,
                &SMatrix::<f64, 1, 6>::from_row_slice(&[1.0, x, y, x * x, y * y, x * y]),
            );
            v[row] = value;
            row += 1;
        }
    }
    let coeffs = (a.transpose() * a).cholesky()?.solve(&(a.transpose() * v));
    let (b, c, d, e, g) = (coeffs[1], coeffs[2], coeffs[3], coeffs[4], coeffs[5]);

    let hessian = Matrix2::new(2.0 * d, g, g, 2.0 * e);
    // only a maximum is meaningful for a correlation peak
    if hessian[(0, 0)] >= 0.0 || hessian.determinant() <= 0.0 {
        return None;
    }
    let vertex = hessian.try_inverse()? * Vector2::new(-b, -c);
    let (ox, oy) = (vertex[0], vertex[1]);
    if ox.abs() > 1.0 || oy.abs() > 1.0 {
        return None;
    }
    Some((oy, ox))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sampled(cy: f64, cx: f64) -> [[f64; 3]; 3] {
        let mut patch = [[0.0; 3]; 3];
        for (iy, line) in patch.iter_mut().enumerate() {
            for (ix, v) in line.iter_mut().enumerate() {
                let x = ix as f64 - 1.0 - cx;
                let y = iy as f64 - 1.0 - cy;
                *v = 10.0 - 2.0 * x * x - 3.0 * y * y;
            }
        }
        patch
    }

    #[test]
    fn parabola_vertex_recovered() {
        // y = -(x - 0.3)^2
        let f = |x: f64| -(x - 0.3) * (x - 0.3);
        assert_relative_eq!(parabolic_offset(f(-1.0), f(0.0), f(1.0)), 0.3, epsilon = 1e-12);
        assert_eq!(parabolic_offset(1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn quadratic_fit_matches_exact_paraboloid() {
        let patch = sampled(-0.2, 0.35);
        let (oy, ox) = refine_peak(SubpixelMethod::Quadratic, &patch);
        assert_relative_eq!(oy, -0.2, epsilon = 1e-9);
        assert_relative_eq!(ox, 0.35, epsilon = 1e-9);

        let (py, px) = refine_peak(SubpixelMethod::Parabolic, &patch);
        assert_relative_eq!(py, -0.2, epsilon = 1e-9);
        assert_relative_eq!(px, 0.35, epsilon = 1e-9);
    }

    #[test]
    fn none_keeps_integer_peak() {
        assert_eq!(refine_peak(SubpixelMethod::None, &sampled(0.4, 0.4)), (0.0, 0.0));
    }
}
