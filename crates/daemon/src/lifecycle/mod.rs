// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup recovery and graceful shutdown.

mod startup;
pub(crate) use startup::startup;

use crate::config::Config;
use crate::env;
use crate::listener::ListenCtx;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Lifecycle errors.
#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error("failed to acquire lock: server already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("TLS is enabled but {0} is missing")]
    TlsConfig(String),

    #[error("recovery failed: {0}")]
    Recovery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Live daemon state held by `main` between startup and shutdown.
pub(crate) struct DaemonState {
    pub config: Arc<Config>,
    pub ctx: Arc<ListenCtx>,
    // NOTE(lifetime): held to maintain the exclusive pid-file lock;
    // released on drop.
    #[allow(dead_code)]
    lock_file: File,
}

/// Result of daemon startup; the listener is spawned by `main`.
pub(crate) struct StartupResult {
    pub daemon: DaemonState,
    pub listener: tokio::net::TcpListener,
}

impl DaemonState {
    /// Graceful shutdown: stop accepting, close every session with a
    /// close frame, give in-flight executions the drain window (killing
    /// whatever remains), then remove the runtime files.
    pub async fn shutdown(&self) {
        info!("shutting down");

        self.ctx.broadcaster.close_all("server shutting down");
        self.ctx.shutdown.cancel();

        self.ctx.executor.drain(env::drain_timeout()).await;

        for path in [self.config.pid_path(), self.config.version_path()] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove runtime file");
                }
            }
        }

        info!("shutdown complete");
    }
}

/// Remove runtime files created during a failed startup.
pub(crate) fn cleanup_on_failure(paths: &[PathBuf]) {
    for path in paths {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}
