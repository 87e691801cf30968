//! Optimization driver contract and solver parameters.

use crate::device::{DeviceId, DeviceSet, ExecutionMode};
use crate::error::Result;
use crate::model::{Net, NetState};
use crate::signal::ActionFn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Solver definition read from a TOML file.
///
/// Fields the orchestrator needs are typed; backend-specific settings are
/// kept in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverParameter {
    /// Training model definition.
    pub net: PathBuf,
    /// Held-out evaluation model definitions.
    #[serde(default)]
    pub test_net: Vec<PathBuf>,
    #[serde(default)]
    pub solver_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default = "default_max_iter")]
    pub max_iter: u64,
    /// Snapshot interval in iterations; 0 disables periodic snapshots.
    #[serde(default)]
    pub snapshot: u64,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: PathBuf,
    #[serde(default = "default_true")]
    pub snapshot_after_train: bool,
    #[serde(default = "default_base_lr")]
    pub base_lr: f32,
    #[serde(default)]
    pub train_state: NetState,
    #[serde(default, flatten)]
    pub extra: toml::Table,
}

fn default_max_iter() -> u64 {
    1000
}

fn default_snapshot_prefix() -> PathBuf {
    PathBuf::from("snapshot")
}

fn default_true() -> bool {
    true
}

fn default_base_lr() -> f32 {
    0.01
}

impl SolverParameter {
    pub fn new(net: impl Into<PathBuf>) -> Self {
        Self {
            net: net.into(),
            test_net: Vec::new(),
            solver_mode: None,
            device_id: None,
            max_iter: default_max_iter(),
            snapshot: 0,
            snapshot_prefix: default_snapshot_prefix(),
            snapshot_after_train: true,
            base_lr: default_base_lr(),
            train_state: NetState::default(),
            extra: toml::Table::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn wants_gpu(&self) -> bool {
        self.solver_mode == Some(ExecutionMode::Gpu)
    }
}

/// What a completed (or stopped) solve did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    /// Iteration counter when the solve returned.
    pub iterations: u64,
    pub stopped_early: bool,
    pub snapshots: Vec<PathBuf>,
}

/// Owns optimization state and the models it trains.
pub trait Solver: Send {
    fn param(&self) -> &SolverParameter;

    /// Install the callback polled at every iteration boundary.
    fn set_action_fn(&mut self, action: ActionFn);

    /// Run until `max_iter` or a STOP request.
    fn solve(&mut self) -> Result<SolveOutcome>;

    /// Resume from a solver state written by a previous snapshot.
    fn restore(&mut self, state: &Path) -> Result<()>;

    fn iter(&self) -> u64;

    fn net_mut(&mut self) -> &mut dyn Net;

    fn num_test_nets(&self) -> usize;

    fn test_net_mut(&mut self, index: usize) -> &mut dyn Net;
}

/// Collective communication layer for synchronized multi-device solves.
pub trait Collective {
    fn run(
        &mut self,
        solver: &mut dyn Solver,
        devices: &DeviceSet,
        snapshot: Option<&Path>,
    ) -> Result<SolveOutcome>;
}
