// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pocket Agent server (pad)
//!
//! Multi-client coordination daemon for the Claude CLI. Clients connect
//! over a single WebSocket endpoint, register project directories, and
//! share control of agent executions whose output is broadcast to every
//! subscriber of the project.
//!
//! Architecture:
//! - Listener task: accepts connections, spawns read/write pumps per session
//! - Router: typed dispatch from inbound envelopes to components
//! - Executor: per-project serialized agent subprocess invocations
//! - Registry + storage: projects and their message logs survive restarts

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod broadcast;
mod config;
mod env;
mod executor;
mod lifecycle;
mod limits;
mod listener;
mod registry;
mod router;

use crate::config::{Config, Flags};
use crate::lifecycle::{LifecycleError, StartupResult};
use crate::listener::Listener;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let flags = match parse_args() {
        ParsedArgs::Run(flags) => flags,
        ParsedArgs::Exit(code) => std::process::exit(code),
    };

    let config = Config::load(&flags)?;

    // Rotate the server's own log if it has grown too large, then set up
    // tracing before anything interesting happens.
    rotate_log_if_needed(&config.log_path());
    let _log_guard = setup_logging(&config)?;

    info!(version = VERSION, data_dir = %config.data_dir.display(), "starting pocket agent server");

    let StartupResult { daemon, listener } = match lifecycle::startup(config).await {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            eprintln!("pad is already running");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to start server");
            return Err(e.into());
        }
    };

    tokio::spawn(Listener::new(listener, Arc::clone(&daemon.ctx)).run());

    // Signal ready for a supervising process.
    println!("READY");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    // A second signal during shutdown escalates to immediate exit.
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        eprintln!("forced shutdown");
        std::process::exit(130);
    });

    daemon.shutdown().await;
    info!("server stopped");
    Ok(())
}

enum ParsedArgs {
    Run(Flags),
    Exit(i32),
}

fn parse_args() -> ParsedArgs {
    let mut flags = Flags::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("pad {VERSION}");
                return ParsedArgs::Exit(0);
            }
            "--help" | "-h" => {
                print_help();
                return ParsedArgs::Exit(0);
            }
            "--config" => match args.next() {
                Some(v) => flags.config = Some(PathBuf::from(v)),
                None => return missing_value("--config"),
            },
            "--port" => match args.next().and_then(|v| v.parse().ok()) {
                Some(v) => flags.port = Some(v),
                None => return missing_value("--port"),
            },
            "--host" => match args.next() {
                Some(v) => flags.host = Some(v),
                None => return missing_value("--host"),
            },
            "--data-dir" => match args.next() {
                Some(v) => flags.data_dir = Some(PathBuf::from(v)),
                None => return missing_value("--data-dir"),
            },
            "--claude-binary" => match args.next() {
                Some(v) => flags.claude_binary = Some(PathBuf::from(v)),
                None => return missing_value("--claude-binary"),
            },
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: pad [OPTIONS]  (see --help)");
                return ParsedArgs::Exit(1);
            }
        }
    }
    ParsedArgs::Run(flags)
}

fn missing_value(flag: &str) -> ParsedArgs {
    eprintln!("error: {flag} requires a value");
    ParsedArgs::Exit(1)
}

fn print_help() {
    println!("pad {VERSION}");
    println!("Pocket Agent server - WebSocket coordination daemon for the Claude CLI");
    println!();
    println!("USAGE:");
    println!("    pad [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>          Config file (default: <data_dir>/config.toml)");
    println!("    --port <port>            Listen port (default: 8443)");
    println!("    --host <host>            Listen address (default: 0.0.0.0)");
    println!("    --data-dir <dir>         Data directory (default: ~/.pocket_agent)");
    println!("    --claude-binary <path>   Agent binary (default: claude)");
    println!("    -h, --help               Print help information");
    println!("    -V, --version            Print version information");
    println!();
    println!("Environment variables with the PA_ prefix override config file");
    println!("keys (PA_PORT, PA_HOST, PA_DATA_DIR, PA_CLAUDE_BINARY, ...);");
    println!("command-line flags take highest precedence.");
}

/// Maximum size of the server's own log before startup rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated server logs to keep (server.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate `server.log` → `.1` → `.2` → `.3` at startup when oversized.
/// Best-effort: rotation failures never block startup.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{log_str}.{i}"), format!("{log_str}.{}", i + 1));
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = config.log_path();
    std::fs::create_dir_all(&config.data_dir)?;

    let file_appender = tracing_appender::rolling::never(
        log_path.parent().unwrap_or(&config.data_dir),
        log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("server.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
