// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message log records.
//!
//! A record is one line of a project's JSONL log: a timestamp, a
//! provenance tag, and an arbitrary JSON payload. Records are append-only;
//! there is no update or delete.

use crate::clock::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Client-originated: the prompt submitted via `execute`.
    Prompt,
    /// Agent-originated: one stdout JSON object from the subprocess.
    AgentMessage,
}

/// One line of a project's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub payload: Value,
}

impl LogRecord {
    /// Record for a submitted prompt, stamped now.
    pub fn prompt(prompt: &str) -> Self {
        Self {
            timestamp_ms: now_ms(),
            kind: RecordKind::Prompt,
            payload: serde_json::json!({ "prompt": prompt }),
        }
    }

    /// Record for one agent stdout object, stamped now.
    pub fn agent_message(payload: Value) -> Self {
        Self { timestamp_ms: now_ms(), kind: RecordKind::AgentMessage, payload }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
