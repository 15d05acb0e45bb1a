//! Engine configuration: load/save with safe defaults.
//!
//! Reads/writes a home-dir JSON file, writing defaults on first run. A
//! malformed or missing field falls back to a default and is reported as a
//! warning rather than propagated as a fatal parse error.

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use thiserror::Error;

/// The two outgoing ports are fixed per engine instance; `COM131` / `COM141`
/// at 115200 are the conventional defaults. They're still ordinary config
/// fields (not Rust `const`s) so tests can swap in loopback device paths —
/// see DESIGN.md.
pub const DEFAULT_OUTGOING_A: &str = "COM131";
pub const DEFAULT_OUTGOING_B: &str = "COM141";
pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub incoming_port: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_delay_max_s")]
    pub retry_delay_max_s: u64,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_outgoing_a")]
    pub outgoing_a_port: String,
    #[serde(default = "default_outgoing_b")]
    pub outgoing_b_port: String,
    #[serde(default = "default_baud")]
    pub outgoing_baud: u32,
    /// When set, a failed `acquire()` during `start()` is retried with
    /// exponential backoff (`reconnect::backoff_delay`, capped at
    /// `retry_delay_max_s`) instead of failing immediately. Off by default:
    /// `acquire()` itself stays a single-shot contract.
    #[serde(default)]
    pub retry_on_startup: bool,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_retry_delay_max_s() -> u64 {
    30
}

fn default_outgoing_a() -> String {
    DEFAULT_OUTGOING_A.to_string()
}

fn default_outgoing_b() -> String {
    DEFAULT_OUTGOING_B.to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            incoming_port: "COM54".to_string(),
            baud_rate: default_baud(),
            timeout_ms: default_timeout_ms(),
            retry_delay_max_s: default_retry_delay_max_s(),
            log_level: LogLevel::default(),
            outgoing_a_port: default_outgoing_a(),
            outgoing_b_port: default_outgoing_b(),
            outgoing_baud: default_baud(),
            retry_on_startup: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("baud_rate must be positive, got {0}")]
    InvalidBaud(u32),
    #[error("timeout_ms must be positive, got {0}")]
    InvalidTimeout(u64),
    #[error("no home directory available to locate the config file")]
    NoHomeDir,
    #[error("io error accessing config file: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterConfig {
    /// Validate the invariants `acquire`/`Engine::new` depend on: positive
    /// baud, positive timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidBaud(self.baud_rate));
        }
        if self.outgoing_baud == 0 {
            return Err(ConfigError::InvalidBaud(self.outgoing_baud));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_ms));
        }
        Ok(())
    }

    /// Honors `SERIAL_ROUTER_CONFIG_DIR` when set (tests point this at a
    /// temp dir instead of the real home directory); otherwise
    /// `~/.serial_router`.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let dir = if let Ok(custom_dir) = std::env::var("SERIAL_ROUTER_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(".serial_router")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Load from `~/.serial_router/config.json`, writing defaults on first
    /// run. A malformed file is logged at `warn` and replaced in memory by
    /// defaults — it is never treated as fatal.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir()?.join("config.json");
        if !config_path.exists() {
            let default = Self::default();
            default.save()?;
            return Ok(default);
        }

        let content = fs::read_to_string(&config_path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!(
                    "config file {} is malformed ({}), falling back to defaults",
                    config_path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_dir()?.join("config.json");
        let json = serde_json::to_string_pretty(self)
            .expect("RouterConfig always serializes: plain data, no custom Serialize impls");
        fs::write(&config_path, json)?;
        Ok(())
    }
}
