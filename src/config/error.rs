// ABOUTME: Leaf errors from resolving configuration values (env interpolation, file reads).
// ABOUTME: Wrapped into EngineError::ConfigMissing by the engine's context extensions.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigMissingError {
    #[error("environment variable not set and no default given: {0}")]
    MissingEnvVar(String),

    #[error("config/secret file not found: {0}")]
    FileMissing(PathBuf),

    #[error("failed to read config/secret file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigMissingError>;
