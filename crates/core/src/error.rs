// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed error set for client-visible failures.
//!
//! Every kind maps 1:1 to a wire error code (the mapping itself lives in
//! `pa-wire` so this crate stays protocol-agnostic).

use thiserror::Error;

/// Server-side operation failures reported to clients.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed envelope, unknown type tag, or missing payload field.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Candidate path is relative, traverses upward, or is not a directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Candidate path equals or nests with an already-registered project.
    #[error("project path conflicts with existing project: {0}")]
    ProjectNesting(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The configured project ceiling has been reached.
    #[error("project limit reached ({0} projects)")]
    ProjectLimit(usize),

    /// The project is EXECUTING and the operation requires it not to be.
    #[error("project has an active execution")]
    ProcessActive,

    #[error("execution timed out after {0}s")]
    ExecutionTimeout(u64),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Connection-level ceilings (per-address count, connection rate).
    #[error("resource limit: {0}")]
    ResourceLimit(String),

    /// Anything the closed set cannot describe; details stay server-side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable name, used for logs and the wire mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidMessage(_) => "INVALID_MESSAGE",
            ServerError::InvalidPath(_) => "INVALID_PATH",
            ServerError::ProjectNesting(_) => "PROJECT_NESTING",
            ServerError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            ServerError::ProjectLimit(_) => "PROJECT_LIMIT",
            ServerError::ProcessActive => "PROCESS_ACTIVE",
            ServerError::ExecutionTimeout(_) => "EXECUTION_TIMEOUT",
            ServerError::ExecutionFailed(_) => "EXECUTION_FAILED",
            ServerError::ResourceLimit(_) => "RESOURCE_LIMIT",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}
