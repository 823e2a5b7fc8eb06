// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session read and write pumps.
//!
//! The read pump enforces the read deadline (renewed by any inbound
//! frame), decodes envelopes, and hands them to the router. The write
//! pump drains the session's bounded outbound queue under the per-write
//! deadline and emits pings at the configured interval; a pong overdue
//! past the pong timeout closes the connection. Whichever pump exits
//! first cancels the other via the session token.

use crate::broadcast::{SessionHandle, OUTBOUND_QUEUE_CAPACITY};
use crate::limits::ConnPermit;
use crate::listener::ListenCtx;
use crate::router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pa_core::ClientId;
use pa_wire::Outbound;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Run one accepted session to completion.
///
/// The connection permit is held for the session's lifetime so the
/// per-address ceiling tracks live sessions, not historical ones.
pub(crate) async fn run(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    _permit: ConnPermit,
    ctx: Arc<ListenCtx>,
) {
    let client_id = ClientId::generate();
    let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_CAPACITY);
    let (ctrl_tx, ctrl_rx) = mpsc::channel::<Message>(4);
    let cancel = ctx.shutdown.child_token();
    let handle = SessionHandle::new(client_id.clone(), tx, cancel);
    ctx.broadcaster.register(Arc::clone(&handle));
    info!(session = %client_id, %addr, "session connected");

    let (sink, stream) = ws.split();
    let last_rx = Arc::new(Mutex::new(Instant::now()));

    let writer = tokio::spawn(write_pump(
        sink,
        rx,
        ctrl_rx,
        Arc::clone(&handle),
        Arc::clone(&ctx),
        Arc::clone(&last_rx),
    ));

    read_pump(stream, ctrl_tx, &handle, &ctx, &last_rx).await;

    // Read side done (disconnect, deadline, or protocol error): tear the
    // write pump down too, then leave every joined project.
    handle.cancel.cancel();
    let _ = writer.await;

    let joined = ctx.broadcaster.unregister(&client_id);
    for project_id in &joined {
        ctx.broadcaster
            .send_to_project(project_id, &Outbound::client_left(project_id, &client_id));
    }
    info!(session = %client_id, projects = joined.len(), "session closed");
}

async fn read_pump(
    mut stream: WsStream,
    ctrl_tx: mpsc::Sender<Message>,
    handle: &Arc<SessionHandle>,
    ctx: &Arc<ListenCtx>,
    last_rx: &Arc<Mutex<Instant>>,
) {
    let read_timeout = ctx.config.websocket.read_timeout();

    loop {
        let frame = tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => break,
            frame = tokio::time::timeout(read_timeout, stream.next()) => frame,
        };

        let msg = match frame {
            // Neither data nor pong inside the read deadline.
            Err(_) => {
                debug!(session = %handle.id, "read deadline elapsed, closing idle session");
                handle.close("idle timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                // Includes frames over the configured size cap.
                warn!(session = %handle.id, error = %e, "websocket read error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        *last_rx.lock() = Instant::now();

        match msg {
            Message::Text(text) => router::dispatch(ctx, handle, text.as_str()).await,
            Message::Ping(payload) => {
                let _ = ctrl_tx.try_send(Message::Pong(payload));
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                let err = pa_core::ServerError::InvalidMessage(
                    "binary frames not supported".to_string(),
                );
                handle.deliver(Outbound::error(&err, None));
            }
            Message::Frame(_) => {}
        }
    }
}

async fn write_pump(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<Outbound>,
    mut ctrl_rx: mpsc::Receiver<Message>,
    handle: Arc<SessionHandle>,
    ctx: Arc<ListenCtx>,
    last_rx: Arc<Mutex<Instant>>,
) {
    let write_timeout = ctx.config.websocket.write_timeout();
    let ping_interval = ctx.config.websocket.ping_interval();
    let pong_timeout = ctx.config.websocket.pong_timeout();

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        // Biased: a close request must win over a backed-up queue, and a
        // due ping must not starve behind steady broadcast traffic.
        tokio::select! {
            biased;

            _ = handle.cancel.cancelled() => {
                let reason = handle.close_reason().unwrap_or("closing");
                let frame = CloseFrame { code: CloseCode::Away, reason: reason.into() };
                let _ = tokio::time::timeout(
                    write_timeout,
                    sink.send(Message::Close(Some(frame))),
                )
                .await;
                break;
            }

            frame = ctrl_rx.recv() => match frame {
                Some(frame) => {
                    let _ = tokio::time::timeout(write_timeout, sink.send(frame)).await;
                }
                // Control sender dropped: the read pump is gone.
                None => break,
            },

            _ = ping.tick() => {
                // The previous ping got no frame back within the pong
                // window: consider the peer gone.
                if last_rx.lock().elapsed() > ping_interval + pong_timeout {
                    warn!(session = %handle.id, "pong overdue, closing session");
                    break;
                }
                let send = sink.send(Message::Ping(Bytes::new()));
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    warn!(session = %handle.id, "ping write deadline elapsed");
                    break;
                }
            }

            msg = rx.recv() => match msg {
                Some(msg) => {
                    let send = sink.send(Message::text(msg.encode()));
                    match tokio::time::timeout(write_timeout, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(session = %handle.id, error = %e, "write failed");
                            break;
                        }
                        Err(_) => {
                            warn!(session = %handle.id, "write deadline elapsed");
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }

    // Stop the read pump if it is still running.
    handle.cancel.cancel();
}
