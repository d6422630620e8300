use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Limits;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Unacked events are retransmitted once this long has passed since
    /// their last transmission.
    pub resend_window_ms: u64,
    /// Non-terminal sessions with no inbound traffic for this long are
    /// failed by the reaper.
    pub heartbeat_timeout_ms: u64,
    pub store_dir: Option<PathBuf>,
    pub max_cas_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resend_window_ms: 5_000,
            heartbeat_timeout_ms: 30_000,
            store_dir: None,
            max_cas_retries: 8,
        }
    }
}

impl SessionConfig {
    pub fn resend_window(&self) -> Duration {
        Duration::from_millis(self.resend_window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Tree,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_files: Some(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
        if let Some(file) = self.file.as_ref() {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub format: Option<LogFormat>,
    pub rotation: Option<LogRotation>,
    pub retention_max_files: Option<usize>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(dir) = self.dir.as_ref() {
            target.dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
        if let Some(files) = self.retention_max_files {
            target.retention_max_files = Some(files);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfigOverride {
    pub resend_window_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub store_dir: Option<PathBuf>,
    pub max_cas_retries: Option<u32>,
}

impl SessionConfigOverride {
    pub fn apply_to(&self, target: &mut SessionConfig) {
        if let Some(value) = self.resend_window_ms {
            target.resend_window_ms = value;
        }
        if let Some(value) = self.heartbeat_timeout_ms {
            target.heartbeat_timeout_ms = value;
        }
        if let Some(dir) = self.store_dir.as_ref() {
            target.store_dir = Some(dir.clone());
        }
        if let Some(value) = self.max_cas_retries {
            target.max_cas_retries = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LimitsOverride {
    pub max_buffered_events: Option<usize>,
    pub max_data_bytes: Option<usize>,
    pub max_error_message_bytes: Option<usize>,
    pub max_cbor_depth: Option<usize>,
    pub max_cbor_map_entries: Option<usize>,
    pub max_cbor_array_entries: Option<usize>,
    pub max_cbor_bytes_string_len: Option<usize>,
    pub max_cbor_text_string_len: Option<usize>,
}

impl LimitsOverride {
    pub fn apply_to(&self, limits: &mut Limits) {
        if let Some(value) = self.max_buffered_events {
            limits.max_buffered_events = value;
        }
        if let Some(value) = self.max_data_bytes {
            limits.max_data_bytes = value;
        }
        if let Some(value) = self.max_error_message_bytes {
            limits.max_error_message_bytes = value;
        }
        if let Some(value) = self.max_cbor_depth {
            limits.max_cbor_depth = value;
        }
        if let Some(value) = self.max_cbor_map_entries {
            limits.max_cbor_map_entries = value;
        }
        if let Some(value) = self.max_cbor_array_entries {
            limits.max_cbor_array_entries = value;
        }
        if let Some(value) = self.max_cbor_bytes_string_len {
            limits.max_cbor_bytes_string_len = value;
        }
        if let Some(value) = self.max_cbor_text_string_len {
            limits.max_cbor_text_string_len = value;
        }
    }
}

/// One partial config source. Unset fields leave the layer below untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub logging: LoggingConfigOverride,
    pub session: SessionConfigOverride,
    pub limits: LimitsOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut Config) {
        self.logging.apply_to(&mut base.logging);
        self.session.apply_to(&mut base.session);
        self.limits.apply_to(&mut base.limits);
    }
}
