use std::fs;
use std::path::{Path, PathBuf};

use super::merge::{apply_env_overrides, merge_layers};
use super::{Config, ConfigError, ConfigLayer};

const APP_DIR: &str = "duplex-session";

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default session store location when none is configured.
pub fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join("sessions")
}

pub fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn load_user_config() -> Result<Option<ConfigLayer>, ConfigError> {
    load_layer(&config_path())
}

/// Defaults, then the user file, then `explicit` (which must exist), then
/// the environment.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let user = load_user_config()?;
    let explicit = match explicit {
        Some(path) => Some(load_layer(path)?.ok_or_else(|| ConfigError::Missing {
            path: path.to_path_buf(),
        })?),
        None => None,
    };
    let mut config = merge_layers(user, explicit);
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load`], but falls back to defaults (plus env) on any error.
pub fn load_or_default(explicit: Option<&Path>) -> Config {
    match load(explicit) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let contents = toml::to_string_pretty(cfg)?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().ok_or_else(|| ConfigError::Missing {
        path: path.to_path_buf(),
    })?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    fs::write(temp.path(), data).map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
