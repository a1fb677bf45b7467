//! Run-scoped progress and diagnostics sink.
//!
//! The orchestrator reports through a [`Diagnostics`] value it is given at
//! construction instead of a process-wide logger, so callers decide where
//! stage changes, warnings and resolved shifts end up.

use serde::{Deserialize, Serialize};
use std::fmt;
use zstitch_core::{Frame, Scan};
use zstitch_registration::CorrelationFunction;

/// Stages of a stitching run, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StitchStage {
    Order,
    Validate,
    PrepareFlatField,
    ResolveShifts,
    PreallocateOutput,
    FinalizeMetadata,
    LoadBunch,
    ComposeProjection,
    DumpProvenance,
    Done,
}

impl fmt::Display for StitchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StitchStage::Order => "ORDER",
            StitchStage::Validate => "VALIDATE",
            StitchStage::PrepareFlatField => "PREPARE_FLAT_FIELD",
            StitchStage::ResolveShifts => "RESOLVE_SHIFTS",
            StitchStage::PreallocateOutput => "PREALLOCATE_OUTPUT",
            StitchStage::FinalizeMetadata => "FINALIZE_METADATA",
            StitchStage::LoadBunch => "LOAD_BUNCH",
            StitchStage::ComposeProjection => "COMPOSE_PROJECTION",
            StitchStage::DumpProvenance => "DUMP_PROVENANCE",
            StitchStage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Orientation fix applied to a scan before composition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipState {
    pub lr: bool,
    pub ud: bool,
}

impl FlipState {
    /// Flips recorded by `scan`, unknown ones taken as `false`.
    pub fn of_scan(scan: &dyn Scan) -> Self {
        Self {
            lr: scan.x_flipped().unwrap_or(false),
            ud: scan.y_flipped().unwrap_or(false),
        }
    }

    /// Undo the recorded flips so `frame` is in canonical orientation.
    pub fn apply(self, frame: Frame) -> Frame {
        let frame = if self.lr { frame.flip_lr() } else { frame };
        if self.ud {
            frame.flip_ud()
        } else {
            frame
        }
    }
}

/// How one pair's shifts were obtained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShiftDiagnostic {
    /// Index of the upper scan of the pair in canonical order.
    pub pair: usize,
    pub first: String,
    pub second: String,
    pub overlap_height: usize,
    pub stitching_height: usize,
    pub x_shift: f64,
    /// Function used for the overlap, `None` when it was given.
    pub y_function: Option<CorrelationFunction>,
    /// Function used for the x shift, `None` when it was given.
    pub x_function: Option<CorrelationFunction>,
    /// Projection ordinal (in the upper scan) used for registration.
    pub projection: Option<usize>,
    /// Registration score of the retained candidate.
    pub score: Option<f64>,
    /// Orientation of the lower scan retained by flip probing.
    pub flip: FlipState,
}

/// Receives progress and diagnostics for one stitching run.
pub trait Diagnostics {
    fn stage(&mut self, stage: StitchStage);
    fn warning(&mut self, message: String);
    fn shift_resolved(&mut self, record: &ShiftDiagnostic);
    fn set_max_advancement(&mut self, max: usize);
    fn advance(&mut self, steps: usize);
}

impl<D: Diagnostics + ?Sized> Diagnostics for &mut D {
    fn stage(&mut self, stage: StitchStage) {
        (**self).stage(stage)
    }

    fn warning(&mut self, message: String) {
        (**self).warning(message)
    }

    fn shift_resolved(&mut self, record: &ShiftDiagnostic) {
        (**self).shift_resolved(record)
    }

    fn set_max_advancement(&mut self, max: usize) {
        (**self).set_max_advancement(max)
    }

    fn advance(&mut self, steps: usize) {
        (**self).advance(steps)
    }
}

/// Forwards everything to the `log` facade.
#[derive(Debug, Default)]
pub struct LogDiagnostics {
    max: usize,
    done: usize,
}

impl Diagnostics for LogDiagnostics {
    fn stage(&mut self, stage: StitchStage) {
        match stage {
            StitchStage::LoadBunch | StitchStage::ComposeProjection => {
                log::debug!("stage {stage}")
            }
            _ => log::info!("stage {stage}"),
        }
    }

    fn warning(&mut self, message: String) {
        log::warn!("{message}");
    }

    fn shift_resolved(&mut self, r: &ShiftDiagnostic) {
        log::info!(
            "pair {} ({} / {}): overlap {} rows, stitching height {}, x shift {:.3} (y: {}, x: {})",
            r.pair,
            r.first,
            r.second,
            r.overlap_height,
            r.stitching_height,
            r.x_shift,
            r.y_function.map_or("given", CorrelationFunction::as_str),
            r.x_function.map_or("given", CorrelationFunction::as_str),
        );
    }

    fn set_max_advancement(&mut self, max: usize) {
        self.max = max;
        self.done = 0;
    }

    fn advance(&mut self, steps: usize) {
        self.done += steps;
        log::info!("stitched {}/{} projections", self.done, self.max);
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingDiagnostics {
    pub stages: Vec<StitchStage>,
    pub warnings: Vec<String>,
    pub shifts: Vec<ShiftDiagnostic>,
    pub max_advancement: usize,
    pub advancement: usize,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages with consecutive repeats collapsed.
    pub fn distinct_stages(&self) -> Vec<StitchStage> {
        let mut out = self.stages.clone();
        out.dedup();
        out
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn stage(&mut self, stage: StitchStage) {
        self.stages.push(stage);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn shift_resolved(&mut self, record: &ShiftDiagnostic) {
        self.shifts.push(record.clone());
    }

    fn set_max_advancement(&mut self, max: usize) {
        self.max_advancement = max;
        self.advancement = 0;
    }

    fn advance(&mut self, steps: usize) {
        self.advancement += steps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_collects_and_collapses_stages() {
        fn feed<D: Diagnostics>(mut sink: D) {
            sink.stage(StitchStage::LoadBunch);
            sink.stage(StitchStage::LoadBunch);
            sink.stage(StitchStage::Done);
            sink.set_max_advancement(4);
            sink.advance(3);
            sink.warning("missing energy".to_string());
        }

        let mut d = RecordingDiagnostics::new();
        feed(&mut d);
        assert_eq!(
            d.distinct_stages(),
            vec![StitchStage::LoadBunch, StitchStage::Done]
        );
        assert_eq!((d.advancement, d.max_advancement), (3, 4));
        assert_eq!(d.warnings.len(), 1);
    }

    #[test]
    fn stage_names_match_serialized_form() {
        let json = serde_json::to_string(&StitchStage::PrepareFlatField).expect("json");
        assert_eq!(json, format!("\"{}\"", StitchStage::PrepareFlatField));
    }
}
