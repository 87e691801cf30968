//! Deterministic in-process backend.
//!
//! Models are small TOML files, weights and solver state are JSON. There is
//! no collective layer and no average-precision formula.

mod devices;
mod net;
mod solver;

pub use devices::SimDevices;
pub use net::{SimLayer, SimNet, WeightFile};
pub use solver::{SimSnapshot, SimSolver};

use crate::backend::Backend;
use crate::device::DeviceLayer;
use crate::error::Result;
use crate::model::{Net, NetSpec};
use crate::solver::{Solver, SolverParameter};
use serde::{Deserialize, Serialize};

/// `[sim]` configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of simulated accelerators to enumerate.
    #[serde(default)]
    pub accelerators: usize,
}

pub struct SimBackend {
    devices: SimDevices,
}

impl SimBackend {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            devices: SimDevices::new(config.accelerators),
        }
    }

    pub fn sim_devices(&self) -> &SimDevices {
        &self.devices
    }
}

impl Backend for SimBackend {
    fn name(&self) -> &str {
        "sim"
    }

    fn devices(&mut self) -> &mut dyn DeviceLayer {
        &mut self.devices
    }

    fn build_net(&mut self, spec: &NetSpec) -> Result<Box<dyn Net>> {
        Ok(Box::new(SimNet::load(spec)?))
    }

    fn build_solver(&mut self, param: SolverParameter) -> Result<Box<dyn Solver>> {
        Ok(Box::new(SimSolver::new(param)?))
    }
}
