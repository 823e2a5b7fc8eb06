// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use pa_core::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidPath,
    ProjectNesting,
    ProjectNotFound,
    ProjectLimit,
    ProcessActive,
    ExecutionTimeout,
    ExecutionFailed,
    ResourceLimit,
    InternalError,
}

impl From<&ServerError> for ErrorCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            ServerError::InvalidPath(_) => ErrorCode::InvalidPath,
            ServerError::ProjectNesting(_) => ErrorCode::ProjectNesting,
            ServerError::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
            ServerError::ProjectLimit(_) => ErrorCode::ProjectLimit,
            ServerError::ProcessActive => ErrorCode::ProcessActive,
            ServerError::ExecutionTimeout(_) => ErrorCode::ExecutionTimeout,
            ServerError::ExecutionFailed(_) => ErrorCode::ExecutionFailed,
            ServerError::ResourceLimit(_) => ErrorCode::ResourceLimit,
            ServerError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }
}

impl From<&ServerError> for ErrorBody {
    fn from(err: &ServerError) -> Self {
        Self { code: ErrorCode::from(err), message: err.to_string(), details: None }
    }
}
