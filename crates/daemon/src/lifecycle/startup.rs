// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use super::{cleanup_on_failure, DaemonState, LifecycleError, StartupResult};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::env;
use crate::executor::{Executor, ExecutorConfig};
use crate::limits::ConnLimiter;
use crate::listener::ListenCtx;
use crate::registry::ProjectRegistry;
use fs2::FileExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Start the daemon.
pub(crate) async fn startup(config: Config) -> Result<StartupResult, LifecycleError> {
    let runtime_files = [config.pid_path(), config.version_path()];
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up on a lock failure — those files belong to
            // the already-running server.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(&runtime_files);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create directories.
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(config.projects_dir())?;

    // 2. Acquire the pid-file lock FIRST to prevent races. OpenOptions
    // avoids truncating before the lock is held, which would wipe the
    // running server's pid.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config.pid_path())?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Version file.
    std::fs::write(config.version_path(), env!("CARGO_PKG_VERSION"))?;

    // 4. TLS keys are validated but termination is external.
    if config.tls_enabled {
        for (key, value) in
            [("tls_cert_file", &config.tls_cert_file), ("tls_key_file", &config.tls_key_file)]
        {
            match value {
                Some(path) if path.exists() => {}
                _ => return Err(LifecycleError::TlsConfig(key.to_string())),
            }
        }
        warn!("tls_enabled is set; this server speaks plain WebSocket and expects an external TLS terminator");
    }

    // 5. Recover persisted projects.
    let registry = Arc::new(ProjectRegistry::new(config.projects_dir(), &config.execution));
    let recovered = registry.recover().map_err(|e| LifecycleError::Recovery(e.to_string()))?;
    info!(projects = recovered, "startup recovery complete");

    // 6. Build components.
    let shutdown = CancellationToken::new();
    let broadcaster = Arc::new(Broadcaster::new(config.websocket.slow_client_deadline()));
    let executor = Executor::new(
        ExecutorConfig {
            binary: config.execution.claude_binary_path.clone(),
            timeout: config.execution.command_timeout(),
            kill_grace: env::kill_grace(),
        },
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
        shutdown.clone(),
    );
    let limiter = ConnLimiter::new(
        config.websocket.max_connections_per_ip,
        config.websocket.connection_rate,
        config.websocket.connection_burst,
    );

    // 7. Bind LAST, only after all validation passes.
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(addr, e))?;

    let config = Arc::new(config);
    let ctx = Arc::new(ListenCtx {
        config: Arc::clone(&config),
        registry,
        broadcaster,
        executor,
        limiter,
        shutdown,
        start_time: Instant::now(),
    });

    info!(addr = %config.listen_addr(), "server started");

    Ok(StartupResult { daemon: DaemonState { config, ctx, lock_file }, listener })
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
