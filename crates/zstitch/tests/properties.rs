mod common;

use common::three_scans;
use zstitch::core::{Frame, Scan};
use zstitch::{
    order_scans, z_stitch_raw_frames, OutputDtype, OverlapKernel, OverlapStrategy, PairParam,
    ParamSpec, ShiftSpec, StitchingSection, ZSeries,
};

const STRATEGIES: [OverlapStrategy; 4] = [
    OverlapStrategy::Mean,
    OverlapStrategy::Closest,
    OverlapStrategy::LinearWeights,
    OverlapStrategy::CosinusWeights,
];

fn frame(width: usize, height: usize, seed: usize) -> Frame {
    Frame::from_fn(width, height, |r, c| ((seed * 31 + r * 7 + c * 13) % 97) as f32)
}

#[test]
fn stitched_height_is_total_minus_overlaps() {
    let width = 9;
    let cases: [(&[usize], &[usize], &[usize]); 4] = [
        (&[10, 10], &[1], &[1]),
        (&[20, 15, 30], &[5, 15], &[0, 7]),
        (&[12, 40, 8, 25], &[12, 3, 8], &[11, 2, 0]),
        (&[33, 17], &[16], &[16]),
    ];
    for (heights, overlaps, stitching) in cases {
        let frames: Vec<Frame> = heights
            .iter()
            .enumerate()
            .map(|(i, &h)| frame(width, h, i))
            .collect();
        let y_shifts: Vec<i64> = overlaps.iter().map(|&o| -(o as i64)).collect();
        for strategy in STRATEGIES {
            let kernels: Vec<OverlapKernel> = stitching
                .iter()
                .map(|&s| OverlapKernel::new(s, width, strategy))
                .collect();
            let out = z_stitch_raw_frames(&frames, &y_shifts, &kernels, OutputDtype::Float32)
                .expect("stitch");
            let expected = heights.iter().sum::<usize>() - overlaps.iter().sum::<usize>();
            assert_eq!(out.shape(), (expected, width), "{heights:?} {overlaps:?} {strategy}");
        }
    }
}

#[test]
fn zero_stitching_height_is_plain_concatenation() {
    let (top, bottom) = (frame(6, 10, 1), frame(6, 12, 2));
    for strategy in STRATEGIES {
        let kernels = [OverlapKernel::new(0, 6, strategy)];
        let out = z_stitch_raw_frames(
            &[top.clone(), bottom.clone()],
            &[-4],
            &kernels,
            OutputDtype::Float32,
        )
        .expect("stitch");
        assert_eq!(out.shape(), (18, 6));
        // the junction sits at the middle of the 4 shared rows
        for r in 0..8 {
            assert_eq!(out.row(r), top.row(r));
        }
        for r in 8..18 {
            assert_eq!(out.row(r), bottom.row(r - 6));
        }
    }
}

#[test]
fn expansion_is_idempotent() {
    let n_pairs = 4;
    let mut section = StitchingSection {
        overlap_height: ParamSpec::value(30),
        ..StitchingSection::default()
    };
    let once = ShiftSpec::from_section(&section, n_pairs + 1);
    assert_eq!(once.overlap_heights, vec![PairParam::Value(30); n_pairs]);
    assert!(once.x_shifts.iter().all(PairParam::is_auto));

    section.overlap_height = ParamSpec::PerPair(once.overlap_heights.clone());
    section.x_shifts = ParamSpec::PerPair(once.x_shifts.clone());
    section.stitching_height = ParamSpec::PerPair(once.stitching_heights.clone());
    let twice = ShiftSpec::from_section(&section, n_pairs + 1);
    assert_eq!(twice, once);
    assert_eq!(twice.inverted().inverted(), once);
}

#[test]
fn reverse_listing_orders_back_to_canonical() {
    let scans = three_scans(1);
    let canonical = ZSeries::new(scans.iter().map(|s| s as &dyn Scan).collect());
    let reversed = ZSeries::new(scans.iter().rev().map(|s| s as &dyn Scan).collect());

    let a = order_scans(&canonical).expect("canonical");
    let b = order_scans(&reversed).expect("reversed");
    assert!(!a.needs_param_inversion);
    assert!(b.needs_param_inversion);
    assert_eq!(a.series.identifiers(), b.series.identifiers());
    // caller's listing is left alone
    assert_eq!(reversed.identifiers(), vec!["z_low", "z_mid", "z_top"]);

    let scrambled = ZSeries::new(vec![&scans[1] as &dyn Scan, &scans[0], &scans[2]]);
    assert!(order_scans(&scrambled).is_err());
}
