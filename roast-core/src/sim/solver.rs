//! Plain gradient-step solver over simulated models.

use super::net::{SimNet, WeightFile};
use crate::error::{Result, RoastError};
use crate::model::{Net, NetSpec, NetState, Phase};
use crate::signal::{ActionFn, SolverAction, no_action};
use crate::solver::{SolveOutcome, Solver, SolverParameter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk solver state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub iter: u64,
    pub created_at: DateTime<Utc>,
    pub weights: WeightFile,
}

pub struct SimSolver {
    param: SolverParameter,
    net: SimNet,
    test_nets: Vec<SimNet>,
    iter: u64,
    action: ActionFn,
}

impl SimSolver {
    pub fn new(param: SolverParameter) -> Result<Self> {
        let net = SimNet::load(&NetSpec::new(
            &param.net,
            Phase::Train,
            param.train_state.clone(),
        ))?;
        let test_nets = param
            .test_net
            .iter()
            .map(|source| SimNet::load(&NetSpec::new(source, Phase::Test, NetState::default())))
            .collect::<Result<Vec<_>>>()?;
        info!(
            net = %net.name(),
            test_nets = test_nets.len(),
            "Solver scaffolding done."
        );
        Ok(Self {
            param,
            net,
            test_nets,
            iter: 0,
            action: no_action(),
        })
    }

    pub fn sim_net(&self) -> &SimNet {
        &self.net
    }

    pub fn sim_test_net(&self, index: usize) -> &SimNet {
        &self.test_nets[index]
    }

    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}_iter_{}.solverstate.json",
            self.param.snapshot_prefix.display(),
            self.iter
        ))
    }

    fn snapshot(&self) -> Result<PathBuf> {
        let path = self.snapshot_path();
        info!("Snapshotting solver state to {}", path.display());
        let state = SimSnapshot {
            iter: self.iter,
            created_at: Utc::now(),
            weights: self.net.export_weights(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&state)?)?;
        Ok(path)
    }

    fn step(&mut self) -> Result<f32> {
        let loss = self.net.forward()?.loss;
        self.net.backward()?;
        self.net.apply_update(self.param.base_lr);
        Ok(loss)
    }

    fn interval_hit(&self) -> bool {
        self.param.snapshot > 0 && self.iter % self.param.snapshot == 0
    }
}

impl Solver for SimSolver {
    fn param(&self) -> &SolverParameter {
        &self.param
    }

    fn set_action_fn(&mut self, action: ActionFn) {
        self.action = action;
    }

    fn solve(&mut self) -> Result<SolveOutcome> {
        info!(
            "Solving {} from iteration {} to {}",
            self.net.name(),
            self.iter,
            self.param.max_iter
        );
        let mut outcome = SolveOutcome::default();
        while self.iter < self.param.max_iter {
            match (self.action)() {
                SolverAction::Stop => {
                    info!(iter = self.iter, "Optimization stopped early.");
                    outcome.stopped_early = true;
                    break;
                }
                SolverAction::Snapshot => outcome.snapshots.push(self.snapshot()?),
                SolverAction::None => {}
            }
            let loss = self.step()?;
            self.iter += 1;
            debug!(iter = self.iter, loss, "Iteration");
            if self.interval_hit() {
                outcome.snapshots.push(self.snapshot()?);
            }
        }
        if !outcome.stopped_early && self.param.snapshot_after_train && !self.interval_hit() {
            outcome.snapshots.push(self.snapshot()?);
        }
        outcome.iterations = self.iter;
        Ok(outcome)
    }

    fn restore(&mut self, state: &Path) -> Result<()> {
        info!("Restoring previous solver status from {}", state.display());
        let content = std::fs::read_to_string(state)?;
        let snapshot: SimSnapshot = serde_json::from_str(&content)?;
        if snapshot.iter > self.param.max_iter {
            return Err(RoastError::solver(format!(
                "snapshot at iteration {} is past max_iter {}",
                snapshot.iter, self.param.max_iter
            )));
        }
        self.net.load_weights(&snapshot.weights)?;
        self.iter = snapshot.iter;
        Ok(())
    }

    fn iter(&self) -> u64 {
        self.iter
    }

    fn net_mut(&mut self) -> &mut dyn Net {
        &mut self.net
    }

    fn num_test_nets(&self) -> usize {
        self.test_nets.len()
    }

    fn test_net_mut(&mut self, index: usize) -> &mut dyn Net {
        &mut self.test_nets[index]
    }
}
