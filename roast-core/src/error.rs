//! Error types for the roast core.
//!
//! Variants follow the failure classes of the command driver: usage errors
//! are rejected before any side effect, capability errors name a feature the
//! active backend lacks, and structural errors mean no meaningful metric can
//! be produced from what the model returned.

use thiserror::Error;

/// Top-level error type for roast operations.
#[derive(Debug, Error)]
pub enum RoastError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Capability unavailable: {0}")]
    Capability(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl RoastError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn solver(msg: impl Into<String>) -> Self {
        Self::Solver(msg.into())
    }

    /// Whether this error was raised while validating arguments, before any
    /// device, model or solver was touched.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

pub type Result<T> = std::result::Result<T, RoastError>;
