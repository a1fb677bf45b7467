//! End-to-end stitching run.
//!
//! Stages run strictly in sequence and stop at the first error. Nothing is
//! written before `PREALLOCATE_OUTPUT`; a failure after it leaves a partial
//! entry behind, which is reported through the returned error.

use crate::batch::{bunches, BatchLoader};
use crate::config::{AutoShiftParams, ResolvedShifts, ZStitchingConfig};
use crate::diagnostics::{Diagnostics, FlipState, LogDiagnostics, StitchStage};
use crate::io::{ArrayDescriptor, DatasetUrl};
use crate::metadata::StitchedMetadata;
use crate::order::{order_scans, ZSeries};
use crate::provenance::Provenance;
use crate::shifts::ShiftEstimator;
use crate::sink::{DirectoryStore, OutputSink};
use crate::stitch::FrameStitcher;
use crate::validate::{validate_series, ReadingOrder};
use crate::StitchError;
use zstitch_core::ReducedFrames;
use zstitch_registration::RegistrationParams;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Summary of a finished run.
#[derive(Clone, Debug, PartialEq)]
pub struct StitchOutcome {
    pub url: DatasetUrl,
    /// `(n_projections, stitched_height, width)`.
    pub shape: [usize; 3],
    /// Scan identifiers, top to bottom.
    pub identifiers: Vec<String>,
    /// The input was listed bottom to top.
    pub reordered: bool,
    pub reading_orders: Vec<ReadingOrder>,
    pub flips: Vec<FlipState>,
    pub shifts: ResolvedShifts,
}

fn has_frames(frames: Option<&ReducedFrames>) -> bool {
    frames.is_some_and(|f| !f.is_empty())
}

/// Everything resolved before the output is touched.
struct StitchPlan<'a> {
    series: ZSeries<'a>,
    reordered: bool,
    orders: Vec<ReadingOrder>,
    flips: Vec<FlipState>,
    params: AutoShiftParams,
    shifts: ResolvedShifts,
    stitcher: FrameStitcher,
}

/// Stitches one z-series according to a [`ZStitchingConfig`].
pub struct ZStitcher<'a, D: Diagnostics = LogDiagnostics> {
    series: ZSeries<'a>,
    config: ZStitchingConfig,
    diagnostics: D,
    registration: RegistrationParams,
}

impl<'a> ZStitcher<'a, LogDiagnostics> {
    /// Stitcher reporting through the `log` facade.
    pub fn with_log(series: ZSeries<'a>, config: ZStitchingConfig) -> Self {
        Self::new(series, config, LogDiagnostics::default())
    }
}

impl<'a, D: Diagnostics> ZStitcher<'a, D> {
    pub fn new(series: ZSeries<'a>, config: ZStitchingConfig, diagnostics: D) -> Self {
        Self {
            series,
            config,
            diagnostics,
            registration: RegistrationParams::default(),
        }
    }

    /// Tune the registration used for `auto` shifts.
    pub fn with_registration(mut self, registration: RegistrationParams) -> Self {
        self.registration = registration;
        self
    }

    pub fn config(&self) -> &ZStitchingConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> D {
        self.diagnostics
    }

    /// Run and write the result as a [`DirectoryStore`] entry.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self), fields(n = self.series.len())))]
    pub fn run(&mut self) -> Result<StitchOutcome, StitchError> {
        let plan = self.plan()?;
        let output = &self.config.output;
        let mut store =
            DirectoryStore::create(&output.file_path, &output.data_path, output.overwrite_results)?;
        self.execute(plan, &mut store)
    }

    /// Run and hand the result to `sink`.
    pub fn run_with_sink(&mut self, sink: &mut dyn OutputSink) -> Result<StitchOutcome, StitchError> {
        let plan = self.plan()?;
        self.execute(plan, sink)
    }

    fn plan(&mut self) -> Result<StitchPlan<'a>, StitchError> {
        let params = self.config.check()?;

        self.diagnostics.stage(StitchStage::Order);
        let ordered = order_scans(&self.series)?;
        let series = ordered.series;
        let mut spec = self.config.shift_spec(series.len());
        if ordered.needs_param_inversion {
            spec = spec.inverted();
        }

        self.diagnostics.stage(StitchStage::Validate);
        let orders = validate_series(&series, &spec, &mut self.diagnostics)?;

        self.diagnostics.stage(StitchStage::PrepareFlatField);
        for scan in series.scans() {
            if !has_frames(scan.reduced_darks()) || !has_frames(scan.reduced_flats()) {
                self.diagnostics.warning(format!(
                    "`{}` has no reduced darks or flats, its frames are used uncorrected",
                    scan.identifier()
                ));
            }
        }

        self.diagnostics.stage(StitchStage::ResolveShifts);
        let resolution = ShiftEstimator::new(params)
            .with_registration(self.registration)
            .resolve(&series, &spec, &orders, &mut self.diagnostics)?;
        let heights: Vec<usize> = series.scans().iter().map(|s| s.dim_2()).collect();
        let width = series.scans()[0].dim_1();
        let stitcher = FrameStitcher::new(
            &heights,
            width,
            &resolution.shifts,
            self.config.stitching.stitching_strategy,
            self.config.output.dtype,
            self.config.stitching.shift_mode,
        )?;
        Ok(StitchPlan {
            series,
            reordered: ordered.needs_param_inversion,
            orders,
            flips: resolution.flips,
            params,
            shifts: resolution.shifts,
            stitcher,
        })
    }

    fn execute(
        &mut self,
        plan: StitchPlan<'a>,
        sink: &mut dyn OutputSink,
    ) -> Result<StitchOutcome, StitchError> {
        let n_projections = plan.series.scans()[0].projections().len();
        let (height, width) = plan.stitcher.output_shape();
        let shape = [n_projections, height, width];

        self.diagnostics.stage(StitchStage::PreallocateOutput);
        sink.allocate(&ArrayDescriptor::new(shape, self.config.output.dtype))?;

        self.diagnostics.stage(StitchStage::FinalizeMetadata);
        let metadata = StitchedMetadata::merge(
            &plan.series,
            height,
            self.config.output.dtype,
            &mut self.diagnostics,
        )?;
        sink.write_metadata(&metadata)?;

        let loader = BatchLoader::new(&plan.series, &plan.orders, &plan.flips)?;
        self.diagnostics.set_max_advancement(n_projections);
        for range in bunches(n_projections, self.config.stitching.bunch_size) {
            self.diagnostics.stage(StitchStage::LoadBunch);
            let bunch = loader.load_bunch(range.clone())?;
            self.diagnostics.stage(StitchStage::ComposeProjection);
            let mut stitched = Vec::with_capacity(bunch.len());
            for frames in bunch {
                stitched.push(plan.stitcher.stitch(frames)?);
                self.diagnostics.advance(1);
            }
            sink.write_band(range, &stitched)?;
        }

        self.diagnostics.stage(StitchStage::DumpProvenance);
        let identifiers = plan.series.identifiers();
        let resolved = self
            .config
            .resolved(&plan.shifts, plan.params, identifiers.clone());
        sink.write_provenance(&Provenance::new(resolved))?;
        sink.finish()?;

        self.diagnostics.stage(StitchStage::Done);
        Ok(StitchOutcome {
            url: sink.dataset_url(),
            shape,
            identifiers,
            reordered: plan.reordered,
            reading_orders: plan.orders,
            flips: plan.flips,
            shifts: plan.shifts,
        })
    }
}

/// Stitch `series` with `config`, logging through the `log` facade.
pub fn z_stitch(series: ZSeries<'_>, config: ZStitchingConfig) -> Result<StitchOutcome, StitchError> {
    ZStitcher::with_log(series, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamSpec;
    use crate::diagnostics::RecordingDiagnostics;
    use crate::sink::MemorySink;
    use zstitch_core::{Frame, MemoryScan, PixelSize, Scan, ScanInfo, Translations};

    fn scan(id: &str, z: f64) -> MemoryScan {
        let mut info = ScanInfo::new(8, 16, PixelSize::square(1.0));
        info.rotation_angles = vec![0.0, 180.0];
        info.translations = Translations::fixed(0.0, 0.0, z, 2);
        info.x_flipped = Some(false);
        info.y_flipped = Some(false);
        let frames = (0..2)
            .map(|a| Frame::from_fn(8, 16, |r, c| (a * 100 + r * 8 + c) as f32))
            .collect();
        MemoryScan::new(id, info, frames).expect("scan")
    }

    #[test]
    fn bad_stitching_height_fails_before_allocation() {
        let (a, b) = (scan("a", 20.0), scan("b", 10.0));
        let mut config = ZStitchingConfig::new("unused");
        config.stitching.x_shifts = ParamSpec::value(0.0);
        config.stitching.overlap_height = ParamSpec::value(6);
        config.stitching.stitching_height = ParamSpec::value(7);
        let mut sink = MemorySink::new();
        let mut d = RecordingDiagnostics::new();
        let res = ZStitcher::new(ZSeries::new(vec![&a as &dyn Scan, &b]), config, &mut d)
            .run_with_sink(&mut sink);
        assert!(matches!(res, Err(StitchError::Configuration(_))), "{res:?}");
        assert!(sink.events().is_empty());
        assert!(!d.stages.contains(&StitchStage::PreallocateOutput));
        assert_eq!((a.read_calls(), b.read_calls()), (0, 0));
    }

    #[test]
    fn missing_references_are_reported_once_per_scan() {
        let (a, b) = (scan("a", 20.0), scan("b", 10.0));
        let mut config = ZStitchingConfig::new("unused");
        config.stitching.x_shifts = ParamSpec::value(0.0);
        config.stitching.overlap_height = ParamSpec::value(6);
        let mut sink = MemorySink::new();
        let mut d = RecordingDiagnostics::new();
        let outcome = ZStitcher::new(ZSeries::new(vec![&a as &dyn Scan, &b]), config, &mut d)
            .run_with_sink(&mut sink)
            .expect("run");
        assert_eq!(outcome.shape, [2, 26, 8]);
        assert_eq!(outcome.shifts.stitching_heights, vec![6]);
        let flat_warnings = d
            .warnings
            .iter()
            .filter(|w| w.contains("reduced darks or flats"))
            .count();
        assert_eq!(flat_warnings, 2);
        assert_eq!(sink.frames().len(), 2);
    }
}
