#![allow(dead_code)]

use zstitch::core::{FieldOfView, Frame, MemoryScan, PixelSize, ScanInfo, Translations};
use zstitch::{PairParam, ParamSpec, ZStitchingConfig};

pub const WIDTH: usize = 64;
pub const HEIGHT: usize = 64;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic, non-periodic sample texture at sample row `r`, column `c`
/// for projection `angle`.
pub fn texture(r: usize, c: usize, angle: usize) -> f32 {
    let mut h = (r as u64 + 3).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (c as u64 + 11).wrapping_mul(0xD6E8_FEB8_6659_FD93)
        ^ (angle as u64 + 1).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^= h >> 31;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 29;
    50.0 + (h % 1024) as f32 / 8.0
}

/// Metadata of a `WIDTH x HEIGHT` scan centred at height `z` with `n`
/// projections 10 degrees apart.
pub fn scan_info(z: f64, n: usize) -> ScanInfo {
    let mut info = ScanInfo::new(WIDTH, HEIGHT, PixelSize::square(1.0));
    info.rotation_angles = (0..n).map(|i| i as f64 * 10.0).collect();
    info.translations = Translations::fixed(0.0, 0.0, z, n);
    info.field_of_view = Some(FieldOfView::Full);
    info.distance = Some(0.5);
    info.energy = Some(19.0);
    info.x_flipped = Some(false);
    info.y_flipped = Some(false);
    info
}

/// Frames of a scan whose first row is sample row `row0`, content moved
/// right by `x` columns.
pub fn sample_frames(row0: usize, x: usize, n: usize) -> Vec<Frame> {
    (0..n)
        .map(|a| Frame::from_fn(WIDTH, HEIGHT, |r, c| texture(row0 + r, c + 8 - x, a)))
        .collect()
}

/// Scan `id` looking at sample rows `row0..row0 + HEIGHT`; `z` must follow
/// the same geometry (`z = 100 - row0` keeps the series consistent).
pub fn sample_scan(id: &str, row0: usize, x: usize, z: f64, n: usize) -> MemoryScan {
    MemoryScan::new(id, scan_info(z, n), sample_frames(row0, x, n)).expect("scan")
}

/// Three scans stacked 44 then 52 rows apart (overlaps of 20 and 12 rows).
pub fn three_scans(n: usize) -> [MemoryScan; 3] {
    [
        sample_scan("z_top", 0, 0, 100.0, n),
        sample_scan("z_mid", 44, 0, 56.0, n),
        sample_scan("z_low", 96, 0, 4.0, n),
    ]
}

pub fn per_pair<T>(values: &[T]) -> ParamSpec<T>
where
    T: Copy,
{
    ParamSpec::PerPair(values.iter().map(|&v| PairParam::Value(v)).collect())
}

/// Config writing under `out` with every per-pair parameter given.
pub fn given_config(
    out: impl Into<std::path::PathBuf>,
    x_shifts: ParamSpec<f64>,
    overlaps: ParamSpec<usize>,
    stitching_heights: ParamSpec<usize>,
) -> ZStitchingConfig {
    let mut config = ZStitchingConfig::new(out);
    config.stitching.x_shifts = x_shifts;
    config.stitching.overlap_height = overlaps;
    config.stitching.stitching_height = stitching_heights;
    config
}
