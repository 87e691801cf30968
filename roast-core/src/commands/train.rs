use super::{copy_weights, require};
use crate::backend::Backend;
use crate::config::RunConfig;
use crate::device::{DeviceSet, Topology, select_devices};
use crate::error::{Result, RoastError};
use crate::signal::SignalController;
use crate::solver::{SolveOutcome, Solver, SolverParameter};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub devices: DeviceSet,
    pub outcome: SolveOutcome,
}

/// Build the controller the solve loop polls, listening for OS signals on
/// `handle` when one is given.
pub fn signal_controller(config: &RunConfig, handle: Option<&Handle>) -> Result<SignalController> {
    let interrupt = config.sigint_effect()?;
    let hangup = config.sighup_effect()?;
    match handle {
        Some(handle) => SignalController::install(handle, interrupt, hangup),
        None => Ok(SignalController::new(interrupt, hangup)),
    }
}

/// Argument checks `train` runs before any device, model or solver work.
pub fn validate_train(config: &RunConfig) -> Result<()> {
    require(config.solver.as_ref(), "Need a solver definition to train.")?;
    if config.snapshot_path().is_some() && !config.weight_sources().is_empty() {
        return Err(RoastError::usage(
            "Give a snapshot to resume training or weights to finetune but not both.",
        ));
    }
    Ok(())
}

/// Train or finetune a model.
pub fn train(
    config: &RunConfig,
    backend: &mut dyn Backend,
    signals: &SignalController,
) -> Result<TrainReport> {
    validate_train(config)?;
    let solver_file = require(config.solver.as_ref(), "Need a solver definition to train.")?;

    let mut param = SolverParameter::from_file(solver_file)?;
    param.train_state = config.net_state();

    // A GPU solver with no device flag falls back to its own device id.
    let mut spec = config.gpu.clone();
    if spec.is_empty() && param.wants_gpu() {
        spec = param.device_id.unwrap_or(0).to_string();
    }
    let devices = select_devices(&spec, backend.devices())?;
    if devices.len() > 1 && backend.collective().is_none() {
        return Err(RoastError::capability(format!(
            "multi-device training on {} devices needs a collective layer",
            devices.len()
        )));
    }

    let topology = Topology::activate(backend.devices(), devices)?;
    if let Some(primary) = topology.primary() {
        param.device_id = Some(primary);
    }

    let solved = run_solver(config, backend, signals, param, &topology);
    let teardown = topology.teardown(backend.devices());
    let outcome = solved?;
    teardown?;
    Ok(TrainReport {
        devices: topology.devices,
        outcome,
    })
}

/// Build, seed and run the solver on an activated topology.
fn run_solver(
    config: &RunConfig,
    backend: &mut dyn Backend,
    signals: &SignalController,
    param: SolverParameter,
    topology: &Topology,
) -> Result<SolveOutcome> {
    let mut solver = backend.build_solver(param)?;
    solver.set_action_fn(signals.action_fn());

    let snapshot = config.snapshot_path();
    let weights = config.weight_sources();
    if let Some(snapshot) = snapshot {
        info!("Resuming from {}", snapshot.display());
        solver.restore(snapshot)?;
    } else if !weights.is_empty() {
        copy_solver_weights(solver.as_mut(), &weights)?;
    }

    let outcome = if topology.parallelism() > 1 {
        let collective = backend.collective().ok_or_else(|| {
            RoastError::capability(format!(
                "multi-device training on {} devices needs a collective layer",
                topology.parallelism()
            ))
        })?;
        collective.run(solver.as_mut(), &topology.devices, snapshot)?
    } else {
        info!("Starting Optimization");
        solver.solve()?
    };
    info!(
        iterations = outcome.iterations,
        stopped_early = outcome.stopped_early,
        "Optimization Done."
    );
    Ok(outcome)
}

/// Seed the training net and every test net from each source in order.
fn copy_solver_weights(solver: &mut dyn Solver, sources: &[std::path::PathBuf]) -> Result<()> {
    copy_weights(solver.net_mut(), sources)?;
    for i in 0..solver.num_test_nets() {
        copy_weights(solver.test_net_mut(i), sources)?;
    }
    Ok(())
}
