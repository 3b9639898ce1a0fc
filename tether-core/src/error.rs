//! Error types for tether-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::plugins::RuntimeError;

/// Top-level error type for tether-core
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}
