// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::error_code::ErrorBody;
use pa_core::{now_ms, ClientId, LogRecord, ProjectId, ProjectSnapshot, ServerError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Closed set of outbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    ProjectState,
    ProjectDeleted,
    ProjectListResponse,
    ProjectJoined,
    ProjectLeft,
    ClientJoined,
    ClientLeft,
    AgentMessage,
    Messages,
    ServerStats,
    Error,
}

/// Outbound envelope to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Epoch milliseconds at envelope construction.
    pub timestamp: u64,
}

/// Payload of `server_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatsBody {
    pub sessions: usize,
    pub projects: usize,
    pub uptime_secs: u64,
}

impl Outbound {
    fn new(kind: OutboundKind, project_id: Option<String>, data: Option<Value>) -> Self {
        Self { kind, project_id, data, timestamp: now_ms() }
    }

    /// Current state of a project (reply and broadcast form).
    pub fn project_state(snapshot: &ProjectSnapshot) -> Self {
        let id = snapshot.id.to_string();
        let data = serde_json::to_value(snapshot).unwrap_or(Value::Null);
        Self::new(OutboundKind::ProjectState, Some(id), Some(data))
    }

    pub fn project_deleted(project_id: &ProjectId) -> Self {
        Self::new(OutboundKind::ProjectDeleted, Some(project_id.to_string()), None)
    }

    pub fn project_list(snapshots: &[ProjectSnapshot]) -> Self {
        let data = json!({ "projects": snapshots });
        Self::new(OutboundKind::ProjectListResponse, None, Some(data))
    }

    /// Join confirmation carrying the project snapshot and recent history.
    pub fn project_joined(snapshot: &ProjectSnapshot, messages: &[LogRecord]) -> Self {
        let id = snapshot.id.to_string();
        let data = json!({ "project": snapshot, "messages": messages });
        Self::new(OutboundKind::ProjectJoined, Some(id), Some(data))
    }

    pub fn project_left(project_id: &ProjectId) -> Self {
        Self::new(OutboundKind::ProjectLeft, Some(project_id.to_string()), None)
    }

    pub fn client_joined(project_id: &ProjectId, client: &ClientId) -> Self {
        let data = json!({ "session_id": client });
        Self::new(OutboundKind::ClientJoined, Some(project_id.to_string()), Some(data))
    }

    pub fn client_left(project_id: &ProjectId, client: &ClientId) -> Self {
        let data = json!({ "session_id": client });
        Self::new(OutboundKind::ClientLeft, Some(project_id.to_string()), Some(data))
    }

    /// One agent stdout object, broadcast to project subscribers.
    pub fn agent_message(project_id: &ProjectId, payload: Value) -> Self {
        Self::new(OutboundKind::AgentMessage, Some(project_id.to_string()), Some(payload))
    }

    /// Reply to `get_messages`.
    pub fn messages(project_id: &ProjectId, records: &[LogRecord]) -> Self {
        let data = json!({ "messages": records });
        Self::new(OutboundKind::Messages, Some(project_id.to_string()), Some(data))
    }

    pub fn server_stats(body: &ServerStatsBody) -> Self {
        let data = serde_json::to_value(body).unwrap_or(Value::Null);
        Self::new(OutboundKind::ServerStats, None, Some(data))
    }

    /// Error envelope from a [`ServerError`].
    pub fn error(err: &ServerError, project_id: Option<&ProjectId>) -> Self {
        Self::error_body(ErrorBody::from(err), project_id)
    }

    pub fn error_body(body: ErrorBody, project_id: Option<&ProjectId>) -> Self {
        let data = serde_json::to_value(&body).unwrap_or(Value::Null);
        Self::new(OutboundKind::Error, project_id.map(ToString::to_string), Some(data))
    }

    /// Serialize for the socket. Serialization of these types cannot
    /// fail in practice; a failure degrades to an internal-error envelope.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"type":"error","data":{{"code":"INTERNAL_ERROR","message":"encode failure"}},"timestamp":{}}}"#,
                now_ms()
            )
        })
    }
}

#[cfg(test)]
#[path = "outbound_tests.rs"]
mod tests;
