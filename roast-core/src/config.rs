//! Configuration for a roast invocation.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace `roast.toml` -> environment -> command-line flags.

use crate::error::Result;
use crate::eval::ApMethod;
use crate::model::{NetState, Phase};
use crate::signal::SolverAction;
use crate::sim::SimConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG: &str = "roast.toml";

/// Every knob a command may read.
///
/// Enumerated knobs stay strings here so that a bad value is reported as a
/// usage error by the command that needs it, not as a load failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Device specifier: empty for CPU, `all`, or a comma-separated id list.
    pub gpu: String,
    /// Solver definition file.
    pub solver: Option<PathBuf>,
    /// Model definition file.
    pub model: Option<PathBuf>,
    /// `TRAIN` or `TEST`; each command has its own default.
    pub phase: Option<String>,
    pub level: i32,
    /// Comma-separated stage tags.
    pub stage: String,
    /// Solver state to resume from.
    pub snapshot: Option<PathBuf>,
    /// Comma-separated pretrained weight files.
    pub weights: Option<String>,
    pub iterations: usize,
    pub sigint_effect: String,
    pub sighup_effect: String,
    /// Per-layer timing in `time`.
    pub lt: bool,
    /// Detection-style evaluation in `test`.
    pub detection: bool,
    pub ap: String,
    pub sim: SimConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            gpu: String::new(),
            solver: None,
            model: None,
            phase: None,
            level: 0,
            stage: String::new(),
            snapshot: None,
            weights: None,
            iterations: 50,
            sigint_effect: "stop".to_string(),
            sighup_effect: "snapshot".to_string(),
            lt: false,
            detection: false,
            ap: "11point".to_string(),
            sim: SimConfig::default(),
        }
    }
}

impl RunConfig {
    /// Requested phase, or `default` when none was given.
    pub fn phase_or(&self, default: Phase) -> Result<Phase> {
        match self.phase.as_deref() {
            Some(phase) => phase.parse(),
            None => Ok(default),
        }
    }

    pub fn stages(&self) -> Vec<String> {
        split_list(&self.stage)
    }

    pub fn net_state(&self) -> NetState {
        NetState {
            level: self.level,
            stages: self.stages(),
        }
    }

    /// Solver state to resume from. An empty path counts as unset.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Weight sources in the order they are applied.
    pub fn weight_sources(&self) -> Vec<PathBuf> {
        self.weights
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub fn sigint_effect(&self) -> Result<SolverAction> {
        self.sigint_effect.parse()
    }

    pub fn sighup_effect(&self) -> Result<SolverAction> {
        self.sighup_effect.parse()
    }

    pub fn ap_method(&self) -> Result<ApMethod> {
        self.ap.parse()
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solver: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigint_effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sighup_effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ap: Option<String>,
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "roast", "roast")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables (prefixed with `ROAST_`)
/// 3. `config_file`, or `roast.toml` in the current directory
/// 4. User config (`~/.config/roast/config.toml`)
/// 5. Built-in defaults
pub fn load_config(config_file: Option<&Path>, overrides: &CliOverrides) -> Result<RunConfig> {
    let mut figment = Figment::from(Serialized::defaults(RunConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match config_file {
        // An explicit file must exist.
        Some(path) => figment = figment.merge(Toml::file_exact(path)),
        None => {
            let ws_config = Path::new(WORKSPACE_CONFIG);
            if ws_config.exists() {
                figment = figment.merge(Toml::file(ws_config));
            }
        }
    }

    // ROAST_GPU, ROAST_SIM__ACCELERATORS, etc.
    figment = figment.merge(Env::prefixed("ROAST_").split("__"));
    figment = figment.merge(Serialized::defaults(overrides));

    Ok(figment.extract().map_err(Box::new)?)
}
