// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket listener: accept loop, upgrade checks, per-session tasks.
//!
//! Connections are admitted through the limiter before the upgrade
//! completes, so a rejected client sees an HTTP error rather than a
//! half-open socket. Each accepted session runs a read pump and a write
//! pump; the session's CancellationToken (a child of server shutdown)
//! tears both down.

mod session;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::executor::Executor;
use crate::limits::{ConnLimiter, ConnPermit};
use crate::registry::ProjectRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Endpoint path for WebSocket upgrades.
const WS_PATH: &str = "/ws";

/// Shared daemon context for the listener, sessions, and router.
pub(crate) struct ListenCtx {
    pub config: Arc<Config>,
    pub registry: Arc<ProjectRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub executor: Arc<Executor>,
    pub limiter: Arc<ConnLimiter>,
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Listener task accepting TCP connections until shutdown.
pub(crate) struct Listener {
    tcp: TcpListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(tcp: TcpListener, ctx: Arc<ListenCtx>) -> Self {
        Self { tcp, ctx }
    }

    /// Run the accept loop, spawning a task per connection.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => {
                    info!("listener stopping");
                    break;
                }
                result = self.tcp.accept() => match result {
                    Ok((stream, addr)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, ctx).await {
                                log_connection_error(addr, e);
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }
    }
}

fn log_connection_error(addr: SocketAddr, e: ConnectionError) {
    match e {
        // Rejections produced by the upgrade callback arrive here as
        // handshake errors; they are expected traffic, not faults.
        ConnectionError::Handshake(err) => debug!(%addr, error = %err, "connection rejected"),
    }
}

/// Admit, upgrade, and run one client connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ListenCtx>,
) -> Result<(), ConnectionError> {
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(ctx.config.websocket.max_message_size))
        .max_frame_size(Some(ctx.config.websocket.max_message_size));

    // The permit escapes the callback so it lives as long as the session.
    let mut permit: Option<ConnPermit> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != WS_PATH {
            return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
        }
        if !origin_allowed(req, &ctx.config.websocket.allowed_origins) {
            return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
        }
        match ctx.limiter.try_acquire(addr.ip()) {
            Ok(p) => {
                permit = Some(p);
                Ok(resp)
            }
            Err(e) => Err(reject(StatusCode::TOO_MANY_REQUESTS, &e.to_string())),
        }
    };

    let ws =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;

    let Some(permit) = permit else {
        // Callback ran and accepted, so the permit is always present;
        // bail defensively rather than serving an unaccounted session.
        return Ok(());
    };

    session::run(ws, addr, permit, ctx).await;
    Ok(())
}

/// Origin allow-list check. An empty list admits any origin (including
/// non-browser clients that send none).
fn origin_allowed(req: &Request, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(origin) = req.headers().get("origin").and_then(|v| v.to_str().ok()) else {
        // Browser clients always send Origin; its absence means a
        // non-browser client, which the allow-list does not govern.
        return true;
    };
    allowed.iter().any(|a| a == origin)
}

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(message.to_string()));
    *resp.status_mut() = status;
    resp
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
