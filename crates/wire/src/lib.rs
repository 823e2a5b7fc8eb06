// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol for client/server communication.
//!
//! Wire format: one JSON envelope per text frame.
//! Inbound: `{type, project_id?, data?}`.
//! Outbound: `{type, project_id?, data?, timestamp}` with `timestamp` in
//! epoch milliseconds.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod error_code;
mod inbound;
mod outbound;

pub use error_code::{ErrorBody, ErrorCode};
pub use inbound::{
    CreateProjectPayload, ExecutePayload, GetMessagesPayload, Inbound, InboundKind,
};
pub use outbound::{Outbound, OutboundKind, ServerStatsBody};
