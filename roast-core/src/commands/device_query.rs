use crate::backend::Backend;
use crate::config::RunConfig;
use crate::device::{DeviceId, DeviceInfo, DeviceLayer, DeviceSpec, Topology};
use crate::error::Result;
use tracing::info;

/// Log diagnostic information for the requested devices.
///
/// An empty or `all` specifier enumerates every device without activating
/// any of them.
pub fn device_query(config: &RunConfig, backend: &mut dyn Backend) -> Result<Vec<DeviceInfo>> {
    let spec: DeviceSpec = config.gpu.parse()?;
    let layer = backend.devices();

    if matches!(spec, DeviceSpec::Cpu | DeviceSpec::All) {
        let count = layer.count();
        info!("Found {count} device(s)");
        return (0..count as DeviceId).map(|id| describe(layer, id)).collect();
    }

    info!("Querying GPUs {}", config.gpu);
    let devices = spec.resolve(layer);
    layer.set_devices(&devices)?;
    let mut infos = Vec::with_capacity(devices.len());
    for &id in devices.ids() {
        layer.set_device(id)?;
        infos.push(describe(layer, id)?);
    }
    let topology = Topology {
        devices,
        mode: layer.mode(),
    };
    topology.teardown(layer)?;
    Ok(infos)
}

fn describe(layer: &dyn DeviceLayer, id: DeviceId) -> Result<DeviceInfo> {
    let info = layer.describe(id)?;
    info!("{info}");
    Ok(info)
}
