//! Command registration and report handling.

use roast_core::commands;
use roast_core::config::RunConfig;
use roast_core::sim::SimBackend;
use roast_core::{CommandRegistry, RoastError};
use serde::Serialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tracing::{error, info};

/// Everything a registered command closes over.
pub struct Context {
    config: RunConfig,
    backend: RefCell<SimBackend>,
    signals: Handle,
    output: Option<PathBuf>,
}

impl Context {
    pub fn new(config: RunConfig, signals: Handle, output: Option<PathBuf>) -> Self {
        let backend = RefCell::new(SimBackend::new(&config.sim));
        Self {
            config,
            backend,
            signals,
            output,
        }
    }

    /// Turn a command result into an exit status, writing its report.
    fn finish<T: Serialize>(&self, name: &str, result: Result<T, RoastError>) -> i32 {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!(command = %name, "{e}");
                return 1;
            }
        };
        match &self.output {
            Some(path) => match write_report(path, &report) {
                Ok(()) => {
                    info!("Report written to {}", path.display());
                    0
                }
                Err(e) => {
                    error!(path = %path.display(), "Failed to write report: {e}");
                    1
                }
            },
            None => 0,
        }
    }
}

fn write_report<T: Serialize>(path: &Path, report: &T) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Register every command against `ctx`.
pub fn register(ctx: &Context) -> anyhow::Result<CommandRegistry<'_>> {
    let mut registry = CommandRegistry::new();

    registry.register("train", move || {
        let result = commands::validate_train(&ctx.config)
            .and_then(|()| commands::signal_controller(&ctx.config, Some(&ctx.signals)))
            .and_then(|signals| {
                commands::train(&ctx.config, &mut *ctx.backend.borrow_mut(), &signals)
            });
        ctx.finish("train", result)
    })?;
    registry.register("test", move || {
        let result = commands::test(&ctx.config, &mut *ctx.backend.borrow_mut());
        ctx.finish("test", result)
    })?;
    registry.register("time", move || {
        let result = commands::time(&ctx.config, &mut *ctx.backend.borrow_mut());
        ctx.finish("time", result)
    })?;
    registry.register("device_query", move || {
        let result = commands::device_query(&ctx.config, &mut *ctx.backend.borrow_mut());
        ctx.finish("device_query", result)
    })?;
    registry.register("autotune", move || {
        let result = commands::autotune(&ctx.config, &mut *ctx.backend.borrow_mut());
        ctx.finish("autotune", result)
    })?;

    Ok(registry)
}
