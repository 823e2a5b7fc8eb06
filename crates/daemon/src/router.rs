// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed dispatch from inbound envelopes to components.
//!
//! One switch on the type tag; the error arm of every handler is
//! translated into an `error` envelope for the originating session only.
//! Handlers run under panic recovery: a panic becomes an INTERNAL_ERROR
//! reply with a logged backtrace, and the session stays open.

use crate::broadcast::SessionHandle;
use crate::listener::ListenCtx;
use futures_util::FutureExt;
use pa_core::{ProjectId, ServerError};
use pa_wire::{
    CreateProjectPayload, ExecutePayload, GetMessagesPayload, Inbound, InboundKind, Outbound,
    ServerStatsBody,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Records included in the `project_joined` snapshot.
const JOIN_SNAPSHOT_RECORDS: usize = 100;

/// Default and hard cap for `get_messages` replies.
const GET_MESSAGES_DEFAULT_LIMIT: usize = 1000;
const GET_MESSAGES_MAX_LIMIT: usize = 10_000;

/// Decode and dispatch one text frame from a session.
pub(crate) async fn dispatch(ctx: &Arc<ListenCtx>, session: &Arc<SessionHandle>, raw: &str) {
    let inbound: Inbound = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(session = %session.id, error = %e, "undecodable envelope");
            let err = ServerError::InvalidMessage(format!("malformed envelope: {e}"));
            session.deliver(Outbound::error(&err, None));
            return;
        }
    };

    let kind = inbound.kind;
    let project_id = inbound.project_id().map(ProjectId::from);

    let result = AssertUnwindSafe(handle(ctx, session, inbound)).catch_unwind().await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            debug!(session = %session.id, kind = ?kind, error = %err, "request failed");
            session.deliver(Outbound::error(&err, project_id.as_ref()));
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                session = %session.id,
                kind = ?kind,
                panic = %message,
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "handler panicked"
            );
            let err = ServerError::Internal(format!("handler panicked: {message}"));
            session.deliver(Outbound::error(&err, project_id.as_ref()));
        }
    }
}

async fn handle(
    ctx: &Arc<ListenCtx>,
    session: &Arc<SessionHandle>,
    msg: Inbound,
) -> Result<(), ServerError> {
    match msg.kind {
        InboundKind::ProjectCreate => {
            let payload: CreateProjectPayload = decode_payload(&msg)?;
            let project = ctx.registry.create(&payload.path)?;
            info!(
                session = %session.id,
                project = %project.id,
                path = %project.path.display(),
                "project created"
            );
            session.deliver(Outbound::project_state(&project.snapshot()));
        }

        InboundKind::ProjectDelete => {
            let id = require_project_id(&msg)?;
            ctx.registry.delete(&id)?;
            let deleted = Outbound::project_deleted(&id);
            ctx.broadcaster.send_to_project(&id, &deleted);
            if !ctx.broadcaster.is_subscribed(&id, &session.id) {
                session.deliver(deleted);
            }
            ctx.broadcaster.remove_project(&id);
        }

        InboundKind::ProjectList => {
            session.deliver(Outbound::project_list(&ctx.registry.list()));
        }

        InboundKind::ProjectJoin => {
            let id = require_project_id(&msg)?;
            let project = ctx.registry.get(&id)?;

            let newly_joined = ctx.broadcaster.join(&id, &session.id);
            let recent = project
                .log
                .tail(JOIN_SNAPSHOT_RECORDS)
                .map_err(|e| ServerError::Internal(format!("history read failed: {e}")))?;
            session.deliver(Outbound::project_joined(&project.snapshot(), &recent));

            if newly_joined {
                ctx.broadcaster.send_to_project_except(
                    &id,
                    Some(&session.id),
                    &Outbound::client_joined(&id, &session.id),
                );
            }
        }

        InboundKind::ProjectLeave => {
            let id = require_project_id(&msg)?;
            ctx.broadcaster.leave(&id, &session.id);
            session.deliver(Outbound::project_left(&id));
            ctx.broadcaster.send_to_project(&id, &Outbound::client_left(&id, &session.id));
        }

        InboundKind::Execute => {
            let id = require_project_id(&msg)?;
            let payload: ExecutePayload = decode_payload(&msg)?;
            let project = ctx.registry.get(&id)?;
            ctx.executor.execute(project, payload.prompt, session.id.clone())?;
        }

        InboundKind::AgentKill => {
            let id = require_project_id(&msg)?;
            ctx.registry.get(&id)?;
            ctx.executor.kill(&id)?;
        }

        InboundKind::AgentNewSession => {
            let id = require_project_id(&msg)?;
            let snapshot = ctx.registry.reset_session(&id)?;
            let state = Outbound::project_state(&snapshot);
            session.deliver(state.clone());
            ctx.broadcaster.send_to_project_except(&id, Some(&session.id), &state);
        }

        InboundKind::GetMessages => {
            let id = require_project_id(&msg)?;
            let payload: GetMessagesPayload = msg.payload().unwrap_or_default();
            let project = ctx.registry.get(&id)?;

            let limit = payload
                .limit
                .unwrap_or(GET_MESSAGES_DEFAULT_LIMIT)
                .min(GET_MESSAGES_MAX_LIMIT);
            let records = project
                .log
                .since(payload.since, Some(limit))
                .map_err(|e| ServerError::Internal(format!("history read failed: {e}")))?;
            session.deliver(Outbound::messages(&id, &records));
        }

        InboundKind::ServerStats => {
            session.deliver(Outbound::server_stats(&ServerStatsBody {
                sessions: ctx.broadcaster.session_count(),
                projects: ctx.registry.count(),
                uptime_secs: ctx.start_time.elapsed().as_secs(),
            }));
        }
    }
    Ok(())
}

fn decode_payload<T: serde::de::DeserializeOwned>(msg: &Inbound) -> Result<T, ServerError> {
    msg.payload().map_err(|e| {
        ServerError::InvalidMessage(format!("invalid payload for {:?}: {e}", msg.kind))
    })
}

fn require_project_id(msg: &Inbound) -> Result<ProjectId, ServerError> {
    msg.project_id()
        .map(ProjectId::from)
        .ok_or_else(|| ServerError::InvalidMessage("missing project_id".to_string()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
