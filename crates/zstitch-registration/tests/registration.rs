use approx::assert_abs_diff_eq;
use zstitch_core::Frame;
use zstitch_registration::{
    find_horizontal_shift, find_vertical_overlap, CorrelationFunction, RegistrationError,
    RegistrationParams, SubpixelMethod,
};

const MARGIN: usize = 8;

fn texture(r: usize, c: usize) -> f32 {
    let mut h = (r as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (c as u64 + 7).wrapping_mul(0xD6E8_FEB8_6659_FD93);
    h ^= h >> 31;
    h = h.wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^= h >> 29;
    100.0 + (h % 4096) as f32 / 16.0
}

/// Top and bottom views of one tall sample: `bottom` starts `height - overlap`
/// rows lower and its content is moved right by `x_shift` columns.
fn pair(width: usize, height: usize, overlap: usize, x_shift: usize) -> (Frame, Frame) {
    let top = Frame::from_fn(width, height, |r, c| texture(r, c + MARGIN));
    let start = height - overlap;
    let bottom = Frame::from_fn(width, height, |r, c| texture(start + r, c + MARGIN - x_shift));
    (top, bottom)
}

#[test]
fn direct_profiles_find_overlap() {
    let (top, bottom) = pair(48, 64, 14, 0);
    let found = find_vertical_overlap(
        top.view(),
        bottom.view(),
        CorrelationFunction::Direct,
        &RegistrationParams::default(),
    )
    .expect("registration")
    .expect("enabled");
    assert_eq!(found.overlap, 14);
    assert!(found.x_shift.is_none());
    assert_abs_diff_eq!(found.score, 1.0, epsilon = 1e-9);
}

#[test]
fn phase_correlation_finds_overlap_and_x_shift() {
    let (top, bottom) = pair(48, 64, 20, 3);
    let params = RegistrationParams {
        subpixel: SubpixelMethod::None,
        ..RegistrationParams::default()
    };
    let found = find_vertical_overlap(top.view(), bottom.view(), CorrelationFunction::Phase, &params)
        .expect("registration")
        .expect("enabled");
    assert_eq!(found.overlap, 20);
    assert_abs_diff_eq!(found.x_shift.expect("x"), 3.0);
}

#[test]
fn horizontal_shift_from_overlap_bands() {
    let (top, bottom) = pair(48, 64, 20, 2);
    let band_top = top.row_band(44..64).expect("top band");
    let band_bottom = bottom.row_band(0..20).expect("bottom band");
    for function in [CorrelationFunction::Phase, CorrelationFunction::Direct] {
        let found = find_horizontal_shift(
            band_top,
            band_bottom,
            function,
            &RegistrationParams::default(),
        )
        .expect("registration")
        .expect("enabled");
        assert_abs_diff_eq!(found.x_shift, 2.0, epsilon = 0.5);
    }
}

#[test]
fn frames_of_different_heights_register_over_common_rows() {
    let (width, overlap) = (48, 12);
    let top = Frame::from_fn(width, 80, |r, c| texture(r, c + MARGIN));
    let bottom = Frame::from_fn(width, 50, |r, c| texture(80 - overlap + r, c + MARGIN));
    let params = RegistrationParams {
        subpixel: SubpixelMethod::None,
        ..RegistrationParams::default()
    };
    for function in [CorrelationFunction::Direct, CorrelationFunction::Phase] {
        let found = find_vertical_overlap(top.view(), bottom.view(), function, &params)
        .expect("registration")
        .expect("enabled");
        assert_eq!(found.overlap, overlap, "{function}");
        assert_abs_diff_eq!(found.offset, (80 - overlap) as f64, epsilon = 0.5);
    }

    // the taller frame may also be the lower one
    let short_top = Frame::from_fn(width, 40, |r, c| texture(r, c + MARGIN));
    let tall_bottom = Frame::from_fn(width, 70, |r, c| texture(40 - overlap + r, c + MARGIN));
    let found = find_vertical_overlap(
        short_top.view(),
        tall_bottom.view(),
        CorrelationFunction::Direct,
        &RegistrationParams::default(),
    )
    .expect("registration")
    .expect("enabled");
    assert_eq!(found.overlap, overlap);
}

#[test]
fn none_function_defers_to_caller() {
    let (top, bottom) = pair(16, 16, 10, 0);
    let params = RegistrationParams::default();
    assert!(
        find_vertical_overlap(top.view(), bottom.view(), CorrelationFunction::None, &params)
            .expect("ok")
            .is_none()
    );
    assert!(
        find_horizontal_shift(top.view(), bottom.view(), CorrelationFunction::None, &params)
            .expect("ok")
            .is_none()
    );
}

#[test]
fn degenerate_inputs_are_errors() {
    let flat = Frame::from_fn(32, 32, |_, _| 1.0);
    let params = RegistrationParams::default();
    assert_eq!(
        find_vertical_overlap(flat.view(), flat.view(), CorrelationFunction::Direct, &params),
        Err(RegistrationError::FlatSurface)
    );
    assert_eq!(
        find_vertical_overlap(flat.view(), flat.view(), CorrelationFunction::Phase, &params),
        Err(RegistrationError::FlatSurface)
    );

    let short = Frame::from_fn(32, 6, |r, c| texture(r, c));
    assert!(matches!(
        find_vertical_overlap(short.view(), short.view(), CorrelationFunction::Direct, &params),
        Err(RegistrationError::TooSmall { .. })
    ));

    let other = Frame::from_fn(30, 32, |r, c| texture(r, c));
    assert!(matches!(
        find_vertical_overlap(flat.view(), other.view(), CorrelationFunction::Direct, &params),
        Err(RegistrationError::ShapeMismatch(..))
    ));
}
