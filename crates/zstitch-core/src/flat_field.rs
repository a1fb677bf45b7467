//! Dark/flat normalization of raw projections.

use crate::{Frame, ReducedFrames, ScanError};

fn check_shape(reference: &Frame, frame: &Frame) -> Result<(), ScanError> {
    if reference.shape() != frame.shape() {
        return Err(ScanError::ReducedShape {
            ref_height: reference.height,
            ref_width: reference.width,
            height: frame.height,
            width: frame.width,
        });
    }
    Ok(())
}

/// Flat to use at acquisition index `index`.
///
/// Linear interpolation between the closest flats before and after `index`;
/// the nearest flat when `index` is outside the recorded range.
pub fn interpolated_flat(flats: &ReducedFrames, index: usize) -> Option<Frame> {
    let before = flats.range(..=index).next_back();
    let after = flats.range(index..).next();
    match (before, after) {
        (Some((&i0, f0)), Some((&i1, f1))) => {
            if i0 == i1 {
                return Some(f0.clone());
            }
            let w = (index - i0) as f32 / (i1 - i0) as f32;
            let data = f0
                .data
                .iter()
                .zip(&f1.data)
                .map(|(&a, &b)| (1.0 - w) * a + w * b)
                .collect();
            Some(Frame {
                width: f0.width,
                height: f0.height,
                data,
            })
        }
        (Some((_, f)), None) | (None, Some((_, f))) => Some(f.clone()),
        (None, None) => None,
    }
}

/// Apply `(I - D) / (F - D)` to every frame.
///
/// `D` is the first reduced dark, `F` the flat interpolated at the frame's
/// acquisition index. Pixels with `F == D` are set to `1.0`.
pub fn correct_frames(
    frames: Vec<Frame>,
    indices: &[usize],
    darks: &ReducedFrames,
    flats: &ReducedFrames,
) -> Result<Vec<Frame>, ScanError> {
    if frames.len() != indices.len() {
        return Err(ScanError::IndexCount {
            frames: frames.len(),
            indices: indices.len(),
        });
    }
    let Some(dark) = darks.values().next() else {
        return Ok(frames);
    };

    let mut out = Vec::with_capacity(frames.len());
    for (mut frame, &index) in frames.into_iter().zip(indices) {
        check_shape(dark, &frame)?;
        let Some(flat) = interpolated_flat(flats, index) else {
            out.push(frame);
            continue;
        };
        check_shape(&flat, &frame)?;
        for ((v, &d), &f) in frame.data.iter_mut().zip(&dark.data).zip(&flat.data) {
            let denom = f - d;
            *v = if denom == 0.0 { 1.0 } else { (*v - d) / denom };
        }
        out.push(frame);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant(value: f32) -> Frame {
        Frame::from_fn(3, 2, |_, _| value)
    }

    #[test]
    fn flats_interpolate_between_neighbours() {
        let flats: ReducedFrames = [(0, constant(10.0)), (10, constant(20.0))].into();
        let mid = interpolated_flat(&flats, 5).expect("flat");
        assert_relative_eq!(mid.get(0, 0), 15.0);
        assert_relative_eq!(interpolated_flat(&flats, 10).expect("flat").get(1, 2), 20.0);
        assert_relative_eq!(interpolated_flat(&flats, 42).expect("flat").get(0, 1), 20.0);
    }

    #[test]
    fn correction_normalizes_and_guards_zero_denominator() {
        let darks: ReducedFrames = [(0, constant(2.0))].into();
        let flats: ReducedFrames = [(0, constant(12.0))].into();
        let out = correct_frames(vec![constant(7.0)], &[3], &darks, &flats).expect("correct");
        assert_relative_eq!(out[0].get(1, 1), 0.5);

        let flat_eq_dark: ReducedFrames = [(0, constant(2.0))].into();
        let out = correct_frames(vec![constant(7.0)], &[3], &darks, &flat_eq_dark).expect("ok");
        assert!(out[0].data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn mismatched_reference_shape_is_an_error() {
        let darks: ReducedFrames = [(0, Frame::zeros(2, 2))].into();
        let flats: ReducedFrames = [(0, constant(1.0))].into();
        let err = correct_frames(vec![constant(1.0)], &[0], &darks, &flats).unwrap_err();
        assert!(matches!(err, ScanError::ReducedShape { .. }));
    }
}
