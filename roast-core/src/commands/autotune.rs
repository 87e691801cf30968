use super::require;
use crate::backend::Backend;
use crate::config::RunConfig;
use crate::device::{Topology, select_devices};
use crate::error::{Result, RoastError};
use crate::model::{NetSpec, Phase};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutotuneReport {
    /// Names of the layers that were tuned, in declared order.
    pub tuned: Vec<String>,
}

/// Tune every layer that exposes the tunable capability for the batch size
/// of its first output.
pub fn autotune(config: &RunConfig, backend: &mut dyn Backend) -> Result<AutotuneReport> {
    let model = require(config.model.as_ref(), "Need a model definition to tune.")?;

    let devices = select_devices(&config.gpu, backend.devices())?;
    Topology::activate(backend.devices(), devices)?;
    let spec = NetSpec::new(model, Phase::Train, config.net_state());
    let mut net = backend.build_net(&spec)?;

    let mut report = AutotuneReport::default();
    for i in 0..net.num_layers() {
        let batch_size = net.top_shape(i).first().copied();
        let layer = net.layer_mut(i);
        let name = layer.name().to_string();
        let Some(tunable) = layer.as_tunable() else {
            continue;
        };
        let batch_size = batch_size.ok_or_else(|| {
            RoastError::model(format!("layer {name} has no output to tune against"))
        })?;
        tunable.tune(batch_size)?;
        report.tuned.push(name);
    }
    info!("Tuned {} layer(s)", report.tuned.len());
    Ok(report)
}
