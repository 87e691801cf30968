//! Evaluation aggregation over forward-only iterations.
//!
//! Classification-style runs fold every output scalar into running sums;
//! detection-style runs collect per-label true/false-positive records and
//! hand them to an external average-precision formula.

pub mod detection;
pub mod score;

pub use detection::{DetectionAccumulator, DetectionReport, OutputDetections};
pub use score::{ScoreAccumulator, ScoreReport};

use crate::error::{Result, RoastError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interpolation method handed to the average-precision formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApMethod {
    /// VOC2007 eleven-point interpolation.
    #[default]
    #[serde(rename = "11point")]
    ElevenPoint,
    MaxIntegral,
    Integral,
}

impl FromStr for ApMethod {
    type Err = RoastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "11point" => Ok(Self::ElevenPoint),
            "MaxIntegral" => Ok(Self::MaxIntegral),
            "Integral" => Ok(Self::Integral),
            other => Err(RoastError::usage(format!(
                "Unknown ap_version \"{other}\"; expected 11point, MaxIntegral or Integral"
            ))),
        }
    }
}

impl fmt::Display for ApMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElevenPoint => write!(f, "11point"),
            Self::MaxIntegral => write!(f, "MaxIntegral"),
            Self::Integral => write!(f, "Integral"),
        }
    }
}

/// Precision/recall curve and its scalar summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApCurve {
    pub precision: Vec<f32>,
    pub recall: Vec<f32>,
    pub average_precision: f32,
}

/// External average-precision formula.
///
/// `true_pos` and `false_pos` are parallel `(score, flag)` sequences in
/// insertion order; sorting by score is the formula's job.
pub trait ApFormula {
    fn compute(
        &self,
        true_pos: &[(f32, u32)],
        num_pos: u32,
        false_pos: &[(f32, u32)],
        method: ApMethod,
    ) -> Result<ApCurve>;
}

/// Result of a `test` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EvalReport {
    Classification(ScoreReport),
    Detection(DetectionReport),
}
