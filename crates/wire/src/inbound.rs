// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of inbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    ProjectCreate,
    ProjectDelete,
    ProjectList,
    ProjectJoin,
    ProjectLeave,
    Execute,
    AgentKill,
    AgentNewSession,
    GetMessages,
    ServerStats,
}

/// Inbound envelope from a client.
///
/// `project_id` may arrive at the envelope level or inside `data`
/// (clients differ); [`Inbound::project_id`] resolves both, envelope
/// first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(rename = "type")]
    pub kind: InboundKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Inbound {
    /// New envelope with no project id and no payload.
    pub fn new(kind: InboundKind) -> Self {
        Self { kind, project_id: None, data: None }
    }

    /// Resolve the target project id from the envelope or the payload.
    pub fn project_id(&self) -> Option<&str> {
        if let Some(id) = self.project_id.as_deref() {
            return Some(id);
        }
        self.data.as_ref()?.get("project_id")?.as_str()
    }

    /// Deserialize the `data` payload into a typed struct.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data)
    }
}

/// Payload of `project_create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProjectPayload {
    pub path: String,
}

/// Payload of `execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutePayload {
    pub prompt: String,
}

/// Payload of `get_messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetMessagesPayload {
    /// Epoch-millisecond cursor; records at or after it are returned.
    #[serde(default)]
    pub since: u64,
    /// Optional cap on the number of returned records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[cfg(test)]
#[path = "inbound_tests.rs"]
mod tests;
