use crate::config::ZStitchingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROGRAM: &str = "zstitch";

/// Record of how a stitched dataset was produced.
///
/// `configuration` is the fully resolved configuration: no `auto` entry
/// remains, so replaying it reproduces the output without any registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub program: String,
    pub version: String,
    pub date: DateTime<Utc>,
    pub configuration: ZStitchingConfig,
}

impl Provenance {
    pub fn new(configuration: ZStitchingConfig) -> Self {
        Self {
            program: PROGRAM.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            date: Utc::now(),
            configuration,
        }
    }
}
