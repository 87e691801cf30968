//! Device selection and the device layer contract.
//!
//! A device specifier is resolved once per command into a [`DeviceSet`]:
//! an empty specifier means CPU-only, `all` enumerates every accelerator,
//! and anything else is a comma-separated list of ids taken verbatim
//! (order and duplicates preserved).

use crate::error::{Result, RoastError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Accelerator slot identifier.
pub type DeviceId = u32;

/// Process-wide execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    #[default]
    Cpu,
    Gpu,
}

/// Diagnostic description of a single accelerator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub backend: String,
    pub memory_bytes: u64,
    pub compute_units: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device id: {} | Name: {} | Backend: {} | Memory: {} MiB | Compute units: {}",
            self.id,
            self.name,
            self.backend,
            self.memory_bytes / (1024 * 1024),
            self.compute_units
        )
    }
}

/// The external device layer: enumeration, activation, mode and barriers.
pub trait DeviceLayer {
    /// Number of accelerators currently enumerable.
    fn count(&self) -> usize;

    /// Diagnostic information for one accelerator.
    fn describe(&self, id: DeviceId) -> Result<DeviceInfo>;

    /// Register every device the command will use.
    fn set_devices(&mut self, devices: &DeviceSet) -> Result<()>;

    /// Make `id` the active device for subsequent work.
    fn set_device(&mut self, id: DeviceId) -> Result<()>;

    fn set_mode(&mut self, mode: ExecutionMode);

    fn mode(&self) -> ExecutionMode;

    /// Block until all outstanding work on `id` has completed.
    fn synchronize(&mut self, id: DeviceId) -> Result<()>;

    /// Release per-device resources. Most backends have nothing to do.
    fn teardown(&mut self, _id: DeviceId) -> Result<()> {
        Ok(())
    }
}

/// Parsed form of a device specifier string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    All,
    List(Vec<DeviceId>),
}

impl FromStr for DeviceSpec {
    type Err = RoastError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Cpu);
        }
        if s == "all" {
            return Ok(Self::All);
        }
        s.split(',')
            .map(|token| {
                token.trim().parse::<DeviceId>().map_err(|e| {
                    RoastError::usage(format!("invalid device id '{token}' in '{s}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::List)
    }
}

impl DeviceSpec {
    /// Turn the specifier into a concrete device set. Only `all` consults
    /// the device layer.
    pub fn resolve(&self, layer: &dyn DeviceLayer) -> DeviceSet {
        match self {
            Self::Cpu => DeviceSet::cpu(),
            Self::All => DeviceSet((0..layer.count() as DeviceId).collect()),
            Self::List(ids) => DeviceSet(ids.clone()),
        }
    }
}

/// Parse and resolve a device specifier in one step.
pub fn select_devices(spec: &str, layer: &dyn DeviceLayer) -> Result<DeviceSet> {
    Ok(spec.parse::<DeviceSpec>()?.resolve(layer))
}

/// Ordered device ids for one command invocation; empty means CPU-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSet(Vec<DeviceId>);

impl DeviceSet {
    pub fn cpu() -> Self {
        Self(Vec::new())
    }

    pub fn from_ids(ids: Vec<DeviceId>) -> Self {
        Self(ids)
    }

    pub fn ids(&self) -> &[DeviceId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_cpu(&self) -> bool {
        self.0.is_empty()
    }

    pub fn primary(&self) -> Option<DeviceId> {
        self.0.first().copied()
    }
}

impl fmt::Display for DeviceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Execution topology established for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub devices: DeviceSet,
    pub mode: ExecutionMode,
}

impl Topology {
    /// Register and activate the selected devices, or fall back to CPU mode
    /// when the set is empty. The first device becomes the active one.
    pub fn activate(layer: &mut dyn DeviceLayer, devices: DeviceSet) -> Result<Self> {
        let Some(primary) = devices.primary() else {
            info!("Use CPU.");
            layer.set_mode(ExecutionMode::Cpu);
            return Ok(Self {
                devices,
                mode: ExecutionMode::Cpu,
            });
        };

        layer.set_devices(&devices)?;
        info!(devices = %devices, "Using GPUs {}", devices);
        layer.set_device(primary)?;
        layer.set_mode(ExecutionMode::Gpu);
        Ok(Self {
            devices,
            mode: ExecutionMode::Gpu,
        })
    }

    /// Register every selected device but run on the first one only.
    pub fn activate_single(layer: &mut dyn DeviceLayer, selected: &DeviceSet) -> Result<Self> {
        let Some(primary) = selected.primary() else {
            return Self::activate(layer, DeviceSet::cpu());
        };

        layer.set_devices(selected)?;
        info!("Use GPU with device ID {primary}");
        layer.set_device(primary)?;
        layer.set_mode(ExecutionMode::Gpu);
        Ok(Self {
            devices: DeviceSet::from_ids(vec![primary]),
            mode: ExecutionMode::Gpu,
        })
    }

    pub fn primary(&self) -> Option<DeviceId> {
        self.devices.primary()
    }

    /// Number of devices solving concurrently; CPU counts as one.
    pub fn parallelism(&self) -> usize {
        self.devices.len().max(1)
    }

    /// Device to synchronize on; CPU work uses slot 0 by convention.
    pub fn sync_device(&self) -> DeviceId {
        self.primary().unwrap_or(0)
    }

    pub fn teardown(&self, layer: &mut dyn DeviceLayer) -> Result<()> {
        match self.primary() {
            Some(id) => layer.teardown(id),
            None => Ok(()),
        }
    }
}
