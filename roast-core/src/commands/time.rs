use super::{require, single_device};
use crate::backend::Backend;
use crate::bench::{BenchReport, Benchmark};
use crate::config::RunConfig;
use crate::error::Result;
use crate::model::{NetSpec, Phase};

/// Benchmark model execution time.
pub fn time(config: &RunConfig, backend: &mut dyn Backend) -> Result<BenchReport> {
    let model = require(config.model.as_ref(), "Need a model definition to time.")?;
    let phase = config.phase_or(Phase::Train)?;

    let topology = single_device(backend, &config.gpu)?;
    let spec = NetSpec::new(model, phase, config.net_state());
    let mut net = backend.build_net(&spec)?;
    Benchmark::new(
        net.as_mut(),
        backend.devices(),
        topology.sync_device(),
        config.lt,
    )
    .run(config.iterations)
}
