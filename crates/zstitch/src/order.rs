//! Canonical ordering of a z-series.
//!
//! Scans are stitched from the highest to the lowest z position, so the
//! first scan provides the top rows of every stitched frame.

use crate::StitchError;
use zstitch_core::Scan;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Scans making up one z-series, borrowed from the caller.
#[derive(Clone, Debug)]
pub struct ZSeries<'a> {
    scans: Vec<&'a dyn Scan>,
}

impl<'a> ZSeries<'a> {
    pub fn new(scans: Vec<&'a dyn Scan>) -> Self {
        Self { scans }
    }

    pub fn scans(&self) -> &[&'a dyn Scan] {
        &self.scans
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.scans.iter().map(|s| s.identifier().to_string()).collect()
    }
}

/// Series in canonical order, plus whether the input was its exact reverse.
#[derive(Clone, Debug)]
pub struct OrderedSeries<'a> {
    pub series: ZSeries<'a>,
    /// Per-pair parameters were given for the reversed listing and must be
    /// inverted with [`crate::ShiftSpec::inverted`].
    pub needs_param_inversion: bool,
}

/// Sort scans by decreasing lower z bound.
///
/// Only the identity and the exact reverse are accepted; any other
/// permutation is an [`StitchError::Ordering`]. The input is not modified.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(series), fields(n = series.len())))]
pub fn order_scans<'a>(series: &ZSeries<'a>) -> Result<OrderedSeries<'a>, StitchError> {
    let mut keyed = Vec::with_capacity(series.len());
    for (i, scan) in series.scans().iter().enumerate() {
        let bbox = scan.z_bounding_box().ok_or_else(|| {
            StitchError::Ordering(format!(
                "scan `{}` has no z translation, cannot place it in the series",
                scan.identifier()
            ))
        })?;
        keyed.push((i, bbox.min));
    }
    keyed.sort_by(|a, b| b.1.total_cmp(&a.1));
    let permutation: Vec<usize> = keyed.iter().map(|(i, _)| *i).collect();

    let n = permutation.len();
    let identity = permutation.iter().enumerate().all(|(pos, &i)| pos == i);
    if identity {
        return Ok(OrderedSeries {
            series: series.clone(),
            needs_param_inversion: false,
        });
    }
    let reversed = permutation.iter().enumerate().all(|(pos, &i)| i == n - 1 - pos);
    if reversed {
        log::info!("scans given from bottom to top, reversing series and per-pair parameters");
        let scans = permutation.iter().map(|&i| series.scans()[i]).collect();
        return Ok(OrderedSeries {
            series: ZSeries::new(scans),
            needs_param_inversion: true,
        });
    }
    Err(StitchError::Ordering(format!(
        "scans {:?} are not monotonic in z (sorted order would be {:?})",
        series.identifiers(),
        permutation
            .iter()
            .map(|&i| series.scans()[i].identifier())
            .collect::<Vec<_>>()
    )))
}
