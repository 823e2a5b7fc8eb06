// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Precedence, lowest to highest: built-in defaults, TOML config file,
//! `PA_*` environment variables, command-line flags.

use crate::env;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory; set PA_DATA_DIR")]
    NoDataDir,

    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

/// Command-line overrides (highest precedence).
#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub claude_binary: Option<PathBuf>,
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub host: String,
    /// TLS termination is provided externally (fronting proxy); these
    /// keys are validated for presence and logged, nothing more.
    pub tls_enabled: bool,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub websocket: WebsocketConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub max_message_size: usize,
    /// Allowed Origin header values; empty means any origin.
    pub allowed_origins: Vec<String>,
    pub max_connections_per_ip: usize,
    /// Token-bucket connection rate: sustained per-second rate and burst.
    pub connection_rate: f64,
    pub connection_burst: u32,
    pub slow_client_deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub command_timeout_ms: u64,
    pub max_projects: usize,
    pub max_log_size: u64,
    pub max_messages_per_log: u64,
    pub claude_binary_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8443,
            host: "0.0.0.0".to_string(),
            tls_enabled: false,
            tls_cert_file: None,
            tls_key_file: None,
            data_dir: PathBuf::new(),
            websocket: WebsocketConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 10 * 60 * 1000,
            write_timeout_ms: 10 * 1000,
            ping_interval_ms: 5 * 60 * 1000,
            pong_timeout_ms: 30 * 1000,
            max_message_size: 1024 * 1024,
            allowed_origins: Vec::new(),
            max_connections_per_ip: 32,
            connection_rate: 10.0,
            connection_burst: 20,
            slow_client_deadline_ms: 5 * 1000,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5 * 60 * 1000,
            max_projects: 100,
            max_log_size: 100 * 1024 * 1024,
            max_messages_per_log: 10_000,
            claude_binary_path: PathBuf::from("claude"),
        }
    }
}

impl Config {
    /// Load configuration with full precedence handling.
    pub fn load(flags: &Flags) -> Result<Self, ConfigError> {
        let data_dir = flags
            .data_dir
            .clone()
            .or_else(env::data_dir)
            .ok_or(ConfigError::NoDataDir)?;

        // File location: --config > PA_CONFIG > <data_dir>/config.toml.
        let explicit = flags.config.clone().or_else(env::config_path);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = data_dir.join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = data_dir;
        }

        config.apply_env();
        config.apply_flags(flags);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    fn apply_env(&mut self) {
        if let Some(port) = env::port() {
            self.port = port;
        }
        if let Some(host) = env::host() {
            self.host = host;
        }
        if let Some(dir) = env::data_dir() {
            if std::env::var("PA_DATA_DIR").is_ok() {
                self.data_dir = dir;
            }
        }
        if let Some(binary) = env::claude_binary() {
            self.execution.claude_binary_path = binary;
        }
        if let Some(timeout) = env::command_timeout() {
            self.execution.command_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(max) = env::max_projects() {
            self.execution.max_projects = max;
        }
    }

    fn apply_flags(&mut self, flags: &Flags) {
        if let Some(port) = flags.port {
            self.port = port;
        }
        if let Some(host) = &flags.host {
            self.host = host.clone();
        }
        if let Some(dir) = &flags.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(binary) = &flags.claude_binary {
            self.execution.claude_binary_path = binary.clone();
        }
    }

    // Derived paths under the data directory.

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("server.log")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join("server.pid")
    }

    pub fn version_path(&self) -> PathBuf {
        self.data_dir.join("server.version")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl WebsocketConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn slow_client_deadline(&self) -> Duration {
        Duration::from_millis(self.slow_client_deadline_ms)
    }
}

impl ExecutionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
