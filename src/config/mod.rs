//! Configuration: schema, discovery, parsing, and resolution.

pub mod envfile;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod resolve;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::{find_config_file_from, load_config, load_config_file, LoadedConfig};
pub use metadata::{parse_inline_metadata, ScriptMetadata};
pub use resolve::{resolve, ResolvedConfig, ResolvedTask, TaskKind};
pub use types::{
    Config, ConditionConfig, HooksConfig, OnFailure, OutputMode, PipelineConfig, ProjectConfig,
    StageConfig, TaskConfig,
};
