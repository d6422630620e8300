//! Config loading and persistence.

mod load;
mod merge;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{
    config_dir, config_path, default_store_dir, load, load_layer, load_or_default,
    load_user_config, write_config,
};
pub use merge::{
    ENV_HEARTBEAT_TIMEOUT_MS, ENV_RESEND_WINDOW_MS, ENV_STORE_DIR, apply_env_overrides,
    apply_env_overrides_from, merge_layers,
};
pub use schema::{
    Config, ConfigLayer, FileLoggingConfig, FileLoggingConfigOverride, LimitsOverride, LogFormat,
    LogRotation, LoggingConfig, LoggingConfigOverride, SessionConfig, SessionConfigOverride,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("config file {} does not exist", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
