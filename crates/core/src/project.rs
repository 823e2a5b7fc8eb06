// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project model: state machine, persisted metadata, and wire snapshot.

use crate::id::ProjectId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Execution state of a project.
///
/// Legal transitions:
/// - IDLE → EXECUTING (execute)
/// - EXECUTING → IDLE (complete | kill | timeout)
/// - EXECUTING → ERROR (failure)
/// - ERROR → EXECUTING (retry execute)
/// - ERROR → IDLE (explicit new-session reset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectState {
    Idle,
    Executing,
    Error,
}

impl ProjectState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// Anything else is an internal invariant violation; callers log it
    /// rather than applying the transition.
    pub fn can_transition_to(self, next: ProjectState) -> bool {
        use ProjectState::*;
        matches!(
            (self, next),
            (Idle, Executing) | (Executing, Idle) | (Executing, Error) | (Error, Executing) | (Error, Idle)
        )
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProjectState::Idle => "IDLE",
            ProjectState::Executing => "EXECUTING",
            ProjectState::Error => "ERROR",
        })
    }
}

/// Persisted shape of `metadata.json`.
///
/// Execution state is deliberately absent: a restart always reconstructs
/// projects as IDLE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub id: ProjectId,
    pub path: PathBuf,
    /// Opaque continuation token last reported by the agent; empty until
    /// the first successful execution.
    #[serde(default)]
    pub session_id: String,
    pub created_at_ms: u64,
    pub last_active_ms: u64,
}

/// Deep-copied view of a live project, safe to hand to callers and to
/// serialize into `project_state` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: ProjectId,
    pub path: PathBuf,
    pub state: ProjectState,
    pub session_id: String,
    pub created_at_ms: u64,
    pub last_active_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
