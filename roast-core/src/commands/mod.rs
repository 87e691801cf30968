//! The commands a roast invocation can dispatch to.
//!
//! Each command validates its arguments before touching any device, model
//! or solver, so a usage error never leaves partial side effects behind.

mod autotune;
mod device_query;
mod time;
mod train;

pub use autotune::{AutotuneReport, autotune};
pub use device_query::device_query;
pub use test::test;
pub use time::time;
pub use train::{TrainReport, signal_controller, train, validate_train};

use crate::backend::Backend;
use crate::device::{Topology, select_devices};
use crate::error::{Result, RoastError};
use crate::model::Net;
use std::path::{Path, PathBuf};
use tracing::info;

fn require<'a>(value: Option<&'a PathBuf>, message: &str) -> Result<&'a Path> {
    value
        .map(PathBuf::as_path)
        .ok_or_else(|| RoastError::usage(message))
}

/// Register every selected device and run on the first; test and time
/// use one.
fn single_device(backend: &mut dyn Backend, spec: &str) -> Result<Topology> {
    let selected = select_devices(spec, backend.devices())?;
    Topology::activate_single(backend.devices(), &selected)
}

fn copy_weights(net: &mut dyn Net, sources: &[PathBuf]) -> Result<()> {
    for source in sources {
        info!("Loading weights from {}", source.display());
        net.copy_trained_layers_from(source)?;
    }
    Ok(())
}
