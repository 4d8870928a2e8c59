//! Configuration error types.
//!
//! All validation and resolution failures are reported before any task runs,
//! with file paths and line numbers where available.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while locating, parsing, validating, or resolving
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file was found walking up from the start directory.
    #[error(
        "no pt.toml or pyproject.toml with a [tool.pt] table found (searched upward from '{}')",
        start.display()
    )]
    NotFound { start: PathBuf },

    /// Failed to read a file.
    #[error("failed to read '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML. The underlying error carries line and column.
    #[error("invalid TOML in '{}': {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A schema-level or invariant violation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A task (or alias) name that does not exist.
    #[error("unknown task: '{0}'")]
    UnknownTask(String),

    /// A profile name that does not exist.
    #[error("unknown profile: '{0}'")]
    UnknownProfile(String),

    /// A pipeline name that does not exist.
    #[error("unknown pipeline: '{0}'")]
    UnknownPipeline(String),

    /// A cycle in an `extend` chain, e.g. `a -> b -> a`.
    #[error("inheritance cycle detected: {chain}")]
    ExtendCycle { chain: String },

    /// A malformed line in an env file.
    #[error("invalid line {line} in env file '{}': {message}", path.display())]
    EnvFile {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A malformed inline metadata block in a script.
    #[error("invalid inline metadata at line {line} of '{}': {message}", path.display())]
    Metadata {
        path: PathBuf,
        line: usize,
        message: String,
    },
}
