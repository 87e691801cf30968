//! # Roast Core
//!
//! Orchestration for a numerical model's train/test/benchmark lifecycle.
//! Provides the command registry, device selection, signal-driven solver
//! control, evaluation aggregation and the benchmark timer. Model math,
//! optimization algorithms and device drivers live behind the [`Backend`]
//! traits.

pub mod backend;
pub mod bench;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod eval;
pub mod model;
pub mod registry;
pub mod signal;
pub mod sim;
pub mod solver;

// Re-export commonly used types at the crate root.
pub use backend::Backend;
pub use bench::{BenchReport, Benchmark, LayerTiming};
pub use config::{CliOverrides, RunConfig, load_config};
pub use device::{DeviceId, DeviceInfo, DeviceLayer, DeviceSet, ExecutionMode, Topology};
pub use error::{Result, RoastError};
pub use eval::{ApCurve, ApFormula, ApMethod, EvalReport};
pub use model::{Blob, Layer, Net, NetOutput, NetSpec, NetState, Phase, Tunable};
pub use registry::CommandRegistry;
pub use signal::{ActionFn, SignalController, SignalKind, SolverAction};
pub use solver::{Collective, SolveOutcome, Solver, SolverParameter};
