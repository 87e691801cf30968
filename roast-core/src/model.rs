//! Model contract consumed by the evaluation aggregator and benchmark timer.
//!
//! Graph construction and layer math belong to a backend; roast only drives
//! forward/backward passes and reads what comes out.

use crate::error::{Result, RoastError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Network phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

impl FromStr for Phase {
    type Err = RoastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TRAIN" => Ok(Self::Train),
            "TEST" => Ok(Self::Test),
            _ => Err(RoastError::usage("phase must be \"TRAIN\" or \"TEST\"")),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "TRAIN"),
            Self::Test => write!(f, "TEST"),
        }
    }
}

/// Level and stage tags used to include or exclude layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetState {
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub stages: Vec<String>,
}

/// Everything a backend needs to instantiate a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetSpec {
    pub source: PathBuf,
    pub phase: Phase,
    pub state: NetState,
}

impl NetSpec {
    pub fn new(source: impl Into<PathBuf>, phase: Phase, state: NetState) -> Self {
        Self {
            source: source.into(),
            phase,
            state,
        }
    }
}

/// A dense output buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Blob {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// One-dimensional blob holding `data`.
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

/// Result of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NetOutput {
    pub blobs: Vec<Blob>,
    pub loss: f32,
}

/// Optional capability of layers that can tune their own kernels.
pub trait Tunable {
    fn tune(&mut self, batch_size: usize) -> Result<()>;
}

pub trait Layer: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    /// The tuning capability, when this layer has one.
    fn as_tunable(&mut self) -> Option<&mut dyn Tunable> {
        None
    }
}

/// A model instance with its per-layer input/output bindings.
///
/// Per-layer calls use the bindings and backward-need flags the model
/// established when it was built.
pub trait Net: Send {
    fn phase(&self) -> Phase;

    /// Full forward pass; returns the output blobs and the summed loss.
    fn forward(&mut self) -> Result<NetOutput>;

    /// Full backward pass over every layer in reverse order.
    fn backward(&mut self) -> Result<()>;

    fn num_layers(&self) -> usize;

    fn layer(&self, index: usize) -> &dyn Layer;

    fn layer_mut(&mut self, index: usize) -> &mut dyn Layer;

    fn forward_layer(&mut self, index: usize) -> Result<()>;

    fn backward_layer(&mut self, index: usize) -> Result<()>;

    /// Shape of the first output buffer of layer `index`.
    fn top_shape(&self, index: usize) -> &[usize];

    fn num_outputs(&self) -> usize;

    fn output_name(&self, output: usize) -> &str;

    fn output_loss_weight(&self, output: usize) -> f32;

    /// Load trained parameters from a weight source.
    fn copy_trained_layers_from(&mut self, source: &Path) -> Result<()>;
}
