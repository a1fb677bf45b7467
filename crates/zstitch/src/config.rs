//! Stitching configuration.
//!
//! The configuration is an immutable value. Per-pair parameters accept
//! `"auto"`, a single value applied to every pair, or an explicit per-pair
//! list; they are expanded once into a [`ShiftSpec`] before anything else
//! looks at them.
//!
//! ```json
//! {
//!   "stitching": {
//!     "type": "z-preproc",
//!     "x_shifts": 0,
//!     "overlap_height": [120, "auto"],
//!     "stitching_height": "auto",
//!     "stitching_strategy": "cosinus_weights",
//!     "auto_relative_shift_params": "cross_correlation_slice=middle;y_cross_correlation_func=direct"
//!   },
//!   "output": { "file_path": "/data/stitched", "dtype": "float32" },
//!   "inputs": { "datasets": ["z1", "z2", "z3"] }
//! }
//! ```

use crate::overlap::OverlapStrategy;
use crate::StitchError;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zstitch_core::BoundaryMode;
use zstitch_registration::CorrelationFunction;

/// Marker for a value computed at run time. Serialized as `"auto"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Auto;

impl Serialize for Auto {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("auto")
    }
}

impl<'de> Deserialize<'de> for Auto {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().eq_ignore_ascii_case("auto") {
            Ok(Auto)
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Str(&raw),
                &"\"auto\"",
            ))
        }
    }
}

/// One pair's parameter: computed (`"auto"`) or given.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PairParam<T> {
    Auto(Auto),
    Value(T),
}

impl<T: Copy> PairParam<T> {
    pub fn is_auto(&self) -> bool {
        matches!(self, PairParam::Auto(_))
    }

    pub fn value(&self) -> Option<T> {
        match self {
            PairParam::Auto(_) => None,
            PairParam::Value(v) => Some(*v),
        }
    }
}

/// A per-pair parameter as written in the configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec<T> {
    /// Same entry for every pair (`"auto"` or a scalar).
    Single(PairParam<T>),
    PerPair(Vec<PairParam<T>>),
}

impl<T> ParamSpec<T> {
    pub fn auto() -> Self {
        ParamSpec::Single(PairParam::Auto(Auto))
    }

    pub fn value(v: T) -> Self {
        ParamSpec::Single(PairParam::Value(v))
    }
}

impl<T: Copy> ParamSpec<T> {
    /// Expand to one entry per pair.
    ///
    /// Explicit lists are returned as given (their length is checked by the
    /// validator), so expanding an expanded list changes nothing.
    pub fn expand(&self, n_pairs: usize) -> Vec<PairParam<T>> {
        match self {
            ParamSpec::Single(p) => vec![*p; n_pairs],
            ParamSpec::PerPair(list) => list.clone(),
        }
    }
}

/// Per-pair shift parameters, one entry per adjacent pair of scans.
#[derive(Clone, Debug, PartialEq)]
pub struct ShiftSpec {
    pub x_shifts: Vec<PairParam<f64>>,
    pub overlap_heights: Vec<PairParam<usize>>,
    pub stitching_heights: Vec<PairParam<usize>>,
}

impl ShiftSpec {
    pub fn from_section(section: &StitchingSection, n_scans: usize) -> Self {
        let n_pairs = n_scans.saturating_sub(1);
        Self {
            x_shifts: section.x_shifts.expand(n_pairs),
            overlap_heights: section.overlap_height.expand(n_pairs),
            stitching_heights: section.stitching_height.expand(n_pairs),
        }
    }

    /// Parameters for the same series listed in the opposite direction.
    ///
    /// Lists are reversed and given x shifts change sign; `auto` entries stay `auto`.
    pub fn inverted(&self) -> Self {
        Self {
            x_shifts: self
                .x_shifts
                .iter()
                .rev()
                .map(|p| match p {
                    PairParam::Value(x) => PairParam::Value(-x),
                    auto => *auto,
                })
                .collect(),
            overlap_heights: self.overlap_heights.iter().rev().copied().collect(),
            stitching_heights: self.stitching_heights.iter().rev().copied().collect(),
        }
    }

    pub fn has_auto(&self) -> bool {
        self.x_shifts.iter().any(PairParam::is_auto)
            || self.overlap_heights.iter().any(PairParam::is_auto)
            || self.stitching_heights.iter().any(PairParam::is_auto)
    }
}

/// Fully resolved per-pair shifts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedShifts {
    pub x_shifts: Vec<f64>,
    pub overlap_heights: Vec<usize>,
    pub stitching_heights: Vec<usize>,
}

/// Projection used for shift estimation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SliceSelector {
    First,
    #[default]
    Middle,
    Last,
    Index(usize),
}

impl SliceSelector {
    /// Projection ordinal among `n` projections.
    pub fn resolve(self, n: usize) -> Result<usize, StitchError> {
        if n == 0 {
            return Err(StitchError::Configuration(
                "cannot pick a projection from an empty scan".to_string(),
            ));
        }
        match self {
            SliceSelector::First => Ok(0),
            SliceSelector::Middle => Ok(n / 2),
            SliceSelector::Last => Ok(n - 1),
            SliceSelector::Index(i) if i < n => Ok(i),
            SliceSelector::Index(i) => Err(StitchError::Configuration(format!(
                "cross_correlation_slice {i} is out of range for {n} projections"
            ))),
        }
    }
}

impl fmt::Display for SliceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceSelector::First => f.write_str("first"),
            SliceSelector::Middle => f.write_str("middle"),
            SliceSelector::Last => f.write_str("last"),
            SliceSelector::Index(i) => write!(f, "{i}"),
        }
    }
}

impl FromStr for SliceSelector {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(SliceSelector::First),
            "middle" => Ok(SliceSelector::Middle),
            "last" => Ok(SliceSelector::Last),
            other => other.parse().map(SliceSelector::Index).map_err(|_| {
                StitchError::Configuration(format!(
                    "cross_correlation_slice must be first, middle, last or an index (got `{s}`)"
                ))
            }),
        }
    }
}

/// Parameters of the automatic shift estimation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoShiftParams {
    pub cross_correlation_slice: SliceSelector,
    pub x_cross_correlation_func: CorrelationFunction,
    pub y_cross_correlation_func: CorrelationFunction,
}

impl Default for AutoShiftParams {
    fn default() -> Self {
        Self {
            cross_correlation_slice: SliceSelector::Middle,
            x_cross_correlation_func: CorrelationFunction::Phase,
            y_cross_correlation_func: CorrelationFunction::Direct,
        }
    }
}

impl AutoShiftParams {
    fn set(&mut self, key: &str, value: &str) -> Result<(), StitchError> {
        let function = |v: &str| {
            v.parse::<CorrelationFunction>()
                .map_err(|e| StitchError::Configuration(e.to_string()))
        };
        match key.trim() {
            "cross_correlation_slice" => self.cross_correlation_slice = value.parse()?,
            "x_cross_correlation_func" => self.x_cross_correlation_func = function(value)?,
            "y_cross_correlation_func" => self.y_cross_correlation_func = function(value)?,
            other => {
                return Err(StitchError::Configuration(format!(
                    "unknown auto_relative_shift_params key `{other}`"
                )))
            }
        }
        Ok(())
    }

    pub fn from_input(input: &AutoParamsInput) -> Result<Self, StitchError> {
        match input {
            AutoParamsInput::Text(text) => text.parse(),
            AutoParamsInput::Map(map) => {
                let mut params = Self::default();
                for (key, value) in map {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        other => {
                            return Err(StitchError::Configuration(format!(
                                "auto_relative_shift_params `{key}` has unsupported value {other}"
                            )))
                        }
                    };
                    params.set(key, &value)?;
                }
                Ok(params)
            }
        }
    }
}

impl FromStr for AutoShiftParams {
    type Err = StitchError;

    /// Parse the `key=value;key=value` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut params = Self::default();
        for item in s.split(';').map(str::trim).filter(|item| !item.is_empty()) {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                StitchError::Configuration(format!(
                    "auto_relative_shift_params entry `{item}` is not key=value"
                ))
            })?;
            params.set(key, value.trim())?;
        }
        Ok(params)
    }
}

/// `auto_relative_shift_params` as written: an object or a `k=v;k=v` string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutoParamsInput {
    Text(String),
    Map(BTreeMap<String, serde_json::Value>),
}

impl Default for AutoParamsInput {
    fn default() -> Self {
        AutoParamsInput::Map(BTreeMap::new())
    }
}

impl From<AutoShiftParams> for AutoParamsInput {
    fn from(p: AutoShiftParams) -> Self {
        AutoParamsInput::Map(BTreeMap::from([
            (
                "cross_correlation_slice".to_string(),
                serde_json::Value::String(p.cross_correlation_slice.to_string()),
            ),
            (
                "x_cross_correlation_func".to_string(),
                serde_json::Value::String(p.x_cross_correlation_func.to_string()),
            ),
            (
                "y_cross_correlation_func".to_string(),
                serde_json::Value::String(p.y_cross_correlation_func.to_string()),
            ),
        ]))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StitchingType {
    /// Stitch raw projections before reconstruction.
    #[default]
    #[serde(rename = "z-preproc")]
    ZPreproc,
    /// Stitch reconstructed volumes. Not supported.
    #[serde(rename = "z-postproc")]
    ZPostproc,
}

/// Element type of the stitched dataset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDtype {
    #[default]
    Float32,
    Float64,
    Uint16,
}

impl OutputDtype {
    pub fn size_of(self) -> usize {
        match self {
            OutputDtype::Float32 => 4,
            OutputDtype::Float64 => 8,
            OutputDtype::Uint16 => 2,
        }
    }

    /// Bring `value` into the representable range of this dtype.
    #[inline]
    pub fn cast(self, value: f32) -> f32 {
        match self {
            OutputDtype::Uint16 => value.round().clamp(0.0, u16::MAX as f32),
            OutputDtype::Float32 | OutputDtype::Float64 => value,
        }
    }
}

fn auto_spec<T>() -> ParamSpec<T> {
    ParamSpec::auto()
}

fn default_bunch_size() -> usize {
    50
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchingSection {
    #[serde(rename = "type", default)]
    pub stitching_type: StitchingType,
    #[serde(default = "auto_spec")]
    pub x_shifts: ParamSpec<f64>,
    #[serde(default = "auto_spec")]
    pub overlap_height: ParamSpec<usize>,
    #[serde(default = "auto_spec")]
    pub stitching_height: ParamSpec<usize>,
    #[serde(default)]
    pub stitching_strategy: OverlapStrategy,
    #[serde(default)]
    pub auto_relative_shift_params: AutoParamsInput,
    /// Boundary handling of the sub-pixel horizontal shift.
    #[serde(default)]
    pub shift_mode: BoundaryMode,
    /// Projections loaded per batch. Only bounds memory.
    #[serde(default = "default_bunch_size")]
    pub bunch_size: usize,
}

impl Default for StitchingSection {
    fn default() -> Self {
        Self {
            stitching_type: StitchingType::ZPreproc,
            x_shifts: ParamSpec::auto(),
            overlap_height: ParamSpec::auto(),
            stitching_height: ParamSpec::auto(),
            stitching_strategy: OverlapStrategy::default(),
            auto_relative_shift_params: AutoParamsInput::default(),
            shift_mode: BoundaryMode::default(),
            bunch_size: default_bunch_size(),
        }
    }
}

fn default_data_path() -> String {
    "entry_from_stitching".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    /// Root of the output store.
    pub file_path: PathBuf,
    /// Entry inside the store.
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default)]
    pub dtype: OutputDtype,
    /// Replace an existing entry instead of failing.
    #[serde(default = "default_true")]
    pub overwrite_results: bool,
    #[serde(default)]
    pub nexus_version: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputsSection {
    /// Identifiers of the input scans. Informative only.
    #[serde(default)]
    pub datasets: Vec<String>,
}

/// Complete description of one stitching run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZStitchingConfig {
    #[serde(default)]
    pub stitching: StitchingSection,
    pub output: OutputSection,
    #[serde(default)]
    pub inputs: InputsSection,
}

impl ZStitchingConfig {
    /// Defaults everywhere, writing under `file_path`.
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            stitching: StitchingSection::default(),
            output: OutputSection {
                file_path: file_path.into(),
                data_path: default_data_path(),
                dtype: OutputDtype::default(),
                overwrite_results: true,
                nexus_version: None,
            },
            inputs: InputsSection::default(),
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), StitchError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject settings this crate cannot run, without touching any scan.
    pub fn check(&self) -> Result<AutoShiftParams, StitchError> {
        if self.stitching.stitching_type != StitchingType::ZPreproc {
            return Err(StitchError::Configuration(
                "only z-preproc stitching is supported".to_string(),
            ));
        }
        if self.stitching.bunch_size == 0 {
            return Err(StitchError::Configuration(
                "bunch_size must be at least 1".to_string(),
            ));
        }
        AutoShiftParams::from_input(&self.stitching.auto_relative_shift_params)
    }

    pub fn shift_spec(&self, n_scans: usize) -> ShiftSpec {
        ShiftSpec::from_section(&self.stitching, n_scans)
    }

    /// Copy of this configuration with every `auto` replaced by its resolved value.
    pub fn resolved(
        &self,
        shifts: &ResolvedShifts,
        params: AutoShiftParams,
        datasets: Vec<String>,
    ) -> Self {
        let list = |values: Vec<PairParam<usize>>| ParamSpec::PerPair(values);
        let mut out = self.clone();
        out.stitching.x_shifts = ParamSpec::PerPair(
            shifts.x_shifts.iter().map(|&x| PairParam::Value(x)).collect(),
        );
        out.stitching.overlap_height = list(
            shifts
                .overlap_heights
                .iter()
                .map(|&o| PairParam::Value(o))
                .collect(),
        );
        out.stitching.stitching_height = list(
            shifts
                .stitching_heights
                .iter()
                .map(|&s| PairParam::Value(s))
                .collect(),
        );
        out.stitching.auto_relative_shift_params = params.into();
        out.inputs.datasets = datasets;
        out
    }
}
