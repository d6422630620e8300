use std::path::PathBuf;
use std::str::FromStr;

use super::{Config, ConfigLayer};

pub const ENV_RESEND_WINDOW_MS: &str = "DUPLEX_RESEND_WINDOW_MS";
pub const ENV_HEARTBEAT_TIMEOUT_MS: &str = "DUPLEX_HEARTBEAT_TIMEOUT_MS";
pub const ENV_STORE_DIR: &str = "DUPLEX_STORE_DIR";

/// Later layers win.
pub fn merge_layers(user: Option<ConfigLayer>, explicit: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = explicit {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_from(config, |key| std::env::var(key).ok());
}

/// Env override pass with an injectable lookup, so tests need not touch the
/// process environment.
pub fn apply_env_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if let Some(value) =
        var(ENV_RESEND_WINDOW_MS).and_then(|raw| parse_or_warn(ENV_RESEND_WINDOW_MS, &raw))
    {
        config.session.resend_window_ms = value;
    }
    if let Some(value) =
        var(ENV_HEARTBEAT_TIMEOUT_MS).and_then(|raw| parse_or_warn(ENV_HEARTBEAT_TIMEOUT_MS, &raw))
    {
        config.session.heartbeat_timeout_ms = value;
    }
    if let Some(dir) = var(ENV_STORE_DIR) {
        config.session.store_dir = Some(PathBuf::from(dir));
    }
}

fn parse_or_warn<T>(key: &str, raw: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {key}, ignoring: {err}");
            None
        }
    }
}
