//! Simulated accelerators.

use crate::device::{DeviceId, DeviceInfo, DeviceLayer, DeviceSet, ExecutionMode};
use crate::error::{Result, RoastError};
use tracing::debug;

const SIM_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Device layer with a fixed number of simulated accelerators.
#[derive(Debug, Clone, Default)]
pub struct SimDevices {
    count: usize,
    registered: DeviceSet,
    active: Option<DeviceId>,
    mode: ExecutionMode,
    synchronize_calls: usize,
    torn_down: Vec<DeviceId>,
}

impl SimDevices {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn active(&self) -> Option<DeviceId> {
        self.active
    }

    pub fn registered(&self) -> &DeviceSet {
        &self.registered
    }

    pub fn synchronize_calls(&self) -> usize {
        self.synchronize_calls
    }

    pub fn torn_down(&self) -> &[DeviceId] {
        &self.torn_down
    }

    fn check(&self, id: DeviceId) -> Result<()> {
        if (id as usize) < self.count {
            Ok(())
        } else {
            Err(RoastError::device(format!(
                "device {id} not found; {} simulated accelerators available",
                self.count
            )))
        }
    }
}

impl DeviceLayer for SimDevices {
    fn count(&self) -> usize {
        self.count
    }

    fn describe(&self, id: DeviceId) -> Result<DeviceInfo> {
        self.check(id)?;
        Ok(DeviceInfo {
            id,
            name: format!("Simulated Accelerator {id}"),
            backend: "sim".to_string(),
            memory_bytes: SIM_MEMORY_BYTES,
            compute_units: 64,
        })
    }

    fn set_devices(&mut self, devices: &DeviceSet) -> Result<()> {
        for &id in devices.ids() {
            self.check(id)?;
        }
        self.registered = devices.clone();
        Ok(())
    }

    fn set_device(&mut self, id: DeviceId) -> Result<()> {
        self.check(id)?;
        self.active = Some(id);
        Ok(())
    }

    fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn synchronize(&mut self, id: DeviceId) -> Result<()> {
        if self.mode == ExecutionMode::Gpu {
            self.check(id)?;
        }
        self.synchronize_calls += 1;
        Ok(())
    }

    fn teardown(&mut self, id: DeviceId) -> Result<()> {
        debug!(device = id, "Tearing down simulated device");
        self.torn_down.push(id);
        Ok(())
    }
}
