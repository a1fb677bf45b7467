//! Direct correlation of 1D intensity profiles.

use crate::subpixel::parabolic_offset;
use crate::RegistrationError;
use std::ops::RangeInclusive;
use zstitch_core::FrameView;

/// Mean of every row.
pub fn row_profile(view: FrameView<'_>) -> Vec<f64> {
    (0..view.height)
        .map(|r| view.row(r).iter().map(|&v| v as f64).sum::<f64>() / view.width as f64)
        .collect()
}

/// Mean of every column.
pub fn column_profile(view: FrameView<'_>) -> Vec<f64> {
    let mut sums = vec![0.0f64; view.width];
    for r in 0..view.height {
        for (s, &v) in sums.iter_mut().zip(view.row(r)) {
            *s += v as f64;
        }
    }
    let n = view.height.max(1) as f64;
    sums.into_iter().map(|s| s / n).collect()
}

/// Pearson correlation, `None` when either side has no variance.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let ma = a.iter().sum::<f64>() / n as f64;
    let mb = b.iter().sum::<f64>() / n as f64;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    let denom = (saa * sbb).sqrt();
    if denom <= 1e-12 * n as f64 || !denom.is_finite() {
        return None;
    }
    Some(sab / denom)
}

/// Correlation of `reference[i + shift]` against `target[i]` over their common support.
fn score(reference: &[f64], target: &[f64], shift: isize) -> Option<f64> {
    let n = reference.len() as isize;
    let m = target.len() as isize;
    let start = 0.max(-shift);
    let end = m.min(n - shift);
    if end - start < 2 {
        return None;
    }
    let a = &reference[(start + shift) as usize..(end + shift) as usize];
    let b = &target[start as usize..end as usize];
    pearson(a, b)
}

/// Best match of two profiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileMatch {
    /// Integer shift with the highest score.
    pub shift: isize,
    /// Parabolic refinement around `shift`, in `[-0.5, 0.5]`.
    pub offset: f64,
    pub score: f64,
}

/// Search `shifts` for the one maximizing the correlation of
/// `reference[i + shift]` with `target[i]`.
pub fn best_shift(
    reference: &[f64],
    target: &[f64],
    shifts: RangeInclusive<isize>,
) -> Result<ProfileMatch, RegistrationError> {
    if reference.iter().chain(target).any(|v| !v.is_finite()) {
        return Err(RegistrationError::NonFinite);
    }
    let mut best: Option<(isize, f64)> = None;
    for shift in shifts.clone() {
        if let Some(s) = score(reference, target, shift) {
            if best.is_none_or(|(_, b)| s > b) {
                best = Some((shift, s));
            }
        }
    }
    let (shift, best_score) = best.ok_or(RegistrationError::FlatSurface)?;

    let left = (shift > *shifts.start())
        .then(|| score(reference, target, shift - 1))
        .flatten();
    let right = (shift < *shifts.end())
        .then(|| score(reference, target, shift + 1))
        .flatten();
    let offset = match (left, right) {
        (Some(l), Some(r)) => parabolic_offset(l, best_score, r),
        _ => 0.0,
    };
    Ok(ProfileMatch {
        shift,
        offset,
        score: best_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use zstitch_core::Frame;

    #[test]
    fn profiles_average_rows_and_columns() {
        let f = Frame::from_fn(3, 2, |r, c| (r * 3 + c) as f32);
        assert_eq!(row_profile(f.view()), vec![1.0, 4.0]);
        assert_eq!(column_profile(f.view()), vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn finds_known_profile_shift() {
        let signal: Vec<f64> = (0..60).map(|i| ((i * 7919) % 101) as f64).collect();
        let target: Vec<f64> = signal[13..50].to_vec();
        let m = best_shift(&signal[..40], &target, 1..=30).expect("match");
        assert_eq!(m.shift, 13);
        assert_relative_eq!(m.score, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn constant_profiles_cannot_be_matched() {
        let flat = vec![2.0; 20];
        assert_eq!(
            best_shift(&flat, &flat, -3..=3),
            Err(RegistrationError::FlatSurface)
        );
    }
}
