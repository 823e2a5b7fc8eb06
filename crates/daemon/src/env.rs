// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.
//!
//! All `PA_*` variables are read here so the override surface is visible
//! in one place. Numeric parse failures fall back to the default.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve the data directory: `PA_DATA_DIR` > `~/.pocket_agent`.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("PA_DATA_DIR") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::home_dir().map(|home| home.join(".pocket_agent"))
}

/// Explicit config file path (`PA_CONFIG`).
pub fn config_path() -> Option<PathBuf> {
    std::env::var("PA_CONFIG").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

pub fn port() -> Option<u16> {
    std::env::var("PA_PORT").ok().and_then(|s| s.parse().ok())
}

pub fn host() -> Option<String> {
    std::env::var("PA_HOST").ok().filter(|s| !s.is_empty())
}

pub fn claude_binary() -> Option<PathBuf> {
    std::env::var("PA_CLAUDE_BINARY").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

pub fn command_timeout() -> Option<Duration> {
    millis("PA_COMMAND_TIMEOUT_MS")
}

pub fn max_projects() -> Option<usize> {
    std::env::var("PA_MAX_PROJECTS").ok().and_then(|s| s.parse().ok())
}

/// Shutdown drain window for in-flight executions (default 10s).
pub fn drain_timeout() -> Duration {
    millis("PA_DRAIN_TIMEOUT_MS").unwrap_or(Duration::from_secs(10))
}

/// Grace window between SIGTERM and SIGKILL for the agent process group
/// (default 5s).
pub fn kill_grace() -> Duration {
    millis("PA_KILL_GRACE_MS").unwrap_or(Duration::from_secs(5))
}

fn millis(key: &str) -> Option<Duration> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis)
}
