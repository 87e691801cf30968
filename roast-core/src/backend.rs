//! Backend seam: everything roast drives but does not implement.

use crate::device::DeviceLayer;
use crate::error::Result;
use crate::eval::ApFormula;
use crate::model::{Net, NetSpec};
use crate::solver::{Collective, Solver, SolverParameter};

/// A numerical backend providing devices, models, solvers and the optional
/// collective and average-precision capabilities.
pub trait Backend {
    fn name(&self) -> &str;

    fn devices(&mut self) -> &mut dyn DeviceLayer;

    fn build_net(&mut self, spec: &NetSpec) -> Result<Box<dyn Net>>;

    fn build_solver(&mut self, param: SolverParameter) -> Result<Box<dyn Solver>>;

    /// Collective layer for synchronized multi-device solves, if built in.
    fn collective(&mut self) -> Option<&mut dyn Collective> {
        None
    }

    /// Average-precision formula for detection evaluation, if available.
    fn ap_formula(&self) -> Option<&dyn ApFormula> {
        None
    }
}
