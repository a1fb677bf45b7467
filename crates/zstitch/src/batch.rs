//! Bunch-wise loading of the frames of every scan.

use crate::diagnostics::FlipState;
use crate::order::ZSeries;
use crate::validate::ReadingOrder;
use crate::StitchError;
use std::ops::Range;
use zstitch_core::{Frame, FrameLocation, Scan, ScanError};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Consecutive `[start, end)` ranges of at most `size` projections covering `0..n`.
pub fn bunches(n: usize, size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = size.max(1);
    (0..n).step_by(size).map(move |start| start..(start + size).min(n))
}

/// Run of slices of one dataset read with a single call.
#[derive(Clone, Debug, PartialEq, Eq)]
struct SliceRun {
    dataset: String,
    start: usize,
    len: usize,
    /// Requested in decreasing slice order.
    descending: bool,
}

/// Group `locations` (in request order) into runs of adjacent slices.
fn slice_runs(locations: &[&FrameLocation]) -> Vec<SliceRun> {
    let mut runs: Vec<SliceRun> = Vec::new();
    for loc in locations {
        if let Some(run) = runs.last_mut() {
            if run.dataset == loc.dataset {
                if !run.descending && loc.slice == run.start + run.len {
                    run.len += 1;
                    continue;
                }
                if (run.descending || run.len == 1) && loc.slice + 1 == run.start {
                    run.start = loc.slice;
                    run.len += 1;
                    run.descending = true;
                    continue;
                }
            }
        }
        runs.push(SliceRun {
            dataset: loc.dataset.clone(),
            start: loc.slice,
            len: 1,
            descending: false,
        });
    }
    runs
}

/// Loads the same projections (by angle) from every scan of a series.
#[derive(Debug)]
pub struct BatchLoader<'s> {
    scans: Vec<&'s dyn Scan>,
    flips: Vec<FlipState>,
    /// Acquisition indices of every scan, in reference reading order.
    indices: Vec<Vec<usize>>,
}

impl<'s> BatchLoader<'s> {
    pub fn new(
        series: &ZSeries<'s>,
        orders: &[ReadingOrder],
        flips: &[FlipState],
    ) -> Result<Self, StitchError> {
        let scans = series.scans().to_vec();
        if orders.len() != scans.len() || flips.len() != scans.len() {
            return Err(StitchError::Configuration(format!(
                "{} reading orders and {} flip states for {} scans",
                orders.len(),
                flips.len(),
                scans.len()
            )));
        }
        let indices = scans
            .iter()
            .zip(orders)
            .map(|(scan, order)| {
                let mut keys: Vec<usize> = scan.projections().keys().copied().collect();
                if *order == ReadingOrder::Reversed {
                    keys.reverse();
                }
                keys
            })
            .collect::<Vec<_>>();
        if let Some(n) = indices.first().map(Vec::len) {
            if let Some((scan, other)) = scans.iter().zip(&indices).find(|(_, k)| k.len() != n) {
                return Err(StitchError::mismatch(
                    scans[0].identifier(),
                    scan.identifier(),
                    format!("projection count {n} vs {}", other.len()),
                ));
            }
        }
        Ok(Self {
            scans,
            flips: flips.to_vec(),
            indices,
        })
    }

    /// Projections per scan.
    pub fn n_projections(&self) -> usize {
        self.indices.first().map_or(0, Vec::len)
    }

    /// Load projections `range` of every scan.
    ///
    /// The result is indexed `[projection][scan]`. Frames are flat-fielded
    /// and brought to canonical orientation.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn load_bunch(&self, range: Range<usize>) -> Result<Vec<Vec<Frame>>, StitchError> {
        if range.end > self.n_projections() || range.start > range.end {
            return Err(StitchError::Configuration(format!(
                "bunch {range:?} out of range for {} projections",
                self.n_projections()
            )));
        }
        let mut out: Vec<Vec<Frame>> = (0..range.len())
            .map(|_| Vec::with_capacity(self.scans.len()))
            .collect();
        for ((scan, indices), flip) in self.scans.iter().zip(&self.indices).zip(&self.flips) {
            let wanted = &indices[range.clone()];
            let frames = load_indices(*scan, wanted)?;
            let frames = scan.flat_field_correction(frames, wanted)?;
            for (slot, frame) in out.iter_mut().zip(frames) {
                slot.push(flip.apply(frame));
            }
        }
        Ok(out)
    }
}

/// Read projections `indices` of `scan`, in that order, with one call per
/// run of adjacent slices.
fn load_indices(scan: &dyn Scan, indices: &[usize]) -> Result<Vec<Frame>, StitchError> {
    let locations = indices
        .iter()
        .map(|&index| {
            scan.projections()
                .get(&index)
                .ok_or_else(|| ScanError::UnknownProjection {
                    scan: scan.identifier().to_string(),
                    index,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let runs = slice_runs(&locations);
    log::debug!(
        "`{}`: {} projections in {} reads",
        scan.identifier(),
        indices.len(),
        runs.len()
    );
    let mut frames = Vec::with_capacity(indices.len());
    for run in runs {
        let mut chunk = scan.read_frames(&run.dataset, run.start..run.start + run.len)?;
        if chunk.len() != run.len {
            return Err(ScanError::Invalid(format!(
                "scan {} returned {} frames for {} slices",
                scan.identifier(),
                chunk.len(),
                run.len
            ))
            .into());
        }
        if run.descending {
            chunk.reverse();
        }
        frames.extend(chunk);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zstitch_core::{MemoryScan, PixelSize, ScanInfo, Translations};

    fn loc(dataset: &str, slice: usize) -> FrameLocation {
        FrameLocation::new(dataset, slice)
    }

    fn run(dataset: &str, start: usize, len: usize, descending: bool) -> SliceRun {
        SliceRun {
            dataset: dataset.to_string(),
            start,
            len,
            descending,
        }
    }

    #[test]
    fn bunches_cover_every_projection() {
        let all: Vec<_> = bunches(7, 3).collect();
        assert_eq!(all, vec![0..3, 3..6, 6..7]);
        assert_eq!(bunches(6, 3).count(), 2);
        assert_eq!(bunches(0, 3).count(), 0);
        assert_eq!(bunches(2, 50).collect::<Vec<_>>(), vec![0..2]);
    }

    #[test]
    fn runs_coalesce_both_directions() {
        let locs = [
            loc("a", 0),
            loc("a", 1),
            loc("a", 2),
            loc("a", 5),
            loc("a", 4),
            loc("b", 3),
            loc("b", 9),
        ];
        let refs: Vec<&FrameLocation> = locs.iter().collect();
        assert_eq!(
            slice_runs(&refs),
            vec![
                run("a", 0, 3, false),
                run("a", 4, 2, true),
                run("b", 3, 1, false),
                run("b", 9, 1, false),
            ]
        );
    }

    fn numbered(id: &str, n: usize, flipped: Option<bool>) -> MemoryScan {
        let mut info = ScanInfo::new(2, 2, PixelSize::square(1.0));
        info.rotation_angles = (0..n).map(|i| i as f64).collect();
        info.translations = Translations::fixed(0.0, 0.0, 0.0, n);
        info.x_flipped = flipped;
        let frames = (0..n)
            .map(|i| Frame::from_fn(2, 2, |_, c| (i * 10 + c) as f32))
            .collect();
        MemoryScan::new(id, info, frames)
            .expect("scan")
            .with_first_index(20)
    }

    #[test]
    fn bunch_follows_reading_order_with_one_read_per_scan() {
        let a = numbered("a", 5, Some(false));
        let b = numbered("b", 5, Some(true));
        let series = ZSeries::new(vec![&a as &dyn Scan, &b]);
        let flips = [FlipState::of_scan(&a), FlipState::of_scan(&b)];
        let loader = BatchLoader::new(
            &series,
            &[ReadingOrder::Forward, ReadingOrder::Reversed],
            &flips,
        )
        .expect("loader");
        let bunch = loader.load_bunch(1..4).expect("bunch");
        assert_eq!(bunch.len(), 3);
        assert_eq!(bunch[0].len(), 2);
        // projection 1 of `a`, projection 3 of `b` read backwards, then unflipped
        assert_eq!(bunch[0][0].row(0), &[10.0, 11.0]);
        assert_eq!(bunch[0][1].row(0), &[31.0, 30.0]);
        assert_eq!(bunch[2][1].row(0), &[11.0, 10.0]);
        assert_eq!((a.read_calls(), b.read_calls()), (1, 1));
    }

    #[test]
    fn chunking_does_not_change_frames() {
        let a = numbered("a", 5, Some(false));
        let b = numbered("b", 5, Some(false));
        let series = ZSeries::new(vec![&a as &dyn Scan, &b]);
        let flips = [FlipState::default(); 2];
        let loader =
            BatchLoader::new(&series, &[ReadingOrder::Forward; 2], &flips).expect("loader");
        let whole = loader.load_bunch(0..5).expect("whole");
        let mut pieces = Vec::new();
        for range in bunches(5, 2) {
            pieces.extend(loader.load_bunch(range).expect("piece"));
        }
        assert_eq!(whole, pieces);
        assert!(loader.load_bunch(4..6).is_err());
    }
}
