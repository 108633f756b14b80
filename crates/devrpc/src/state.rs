// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC lifecycle state machine
//!
//! Pure transition logic, no I/O. Stores call [`RpcStateMachine::transition`]
//! while holding the record, which makes every status write a
//! compare-and-swap on the current status. The scheduler maps its events
//! through [`RpcStateMachine::apply`] before writing.
//!
//! ```text
//! QUEUED --accepted--> SENT --delivered--> DELIVERED (oneway: terminal)
//!   |                   |                      |
//!   |                   |                      +--response--> SUCCESSFUL
//!   |                   |                      +--nack------> FAILED
//!   |                   |                      +--grace-----> EXPIRED (twoway)
//!   +-------------------+--deadline--> TIMEOUT
//!
//! any non-deleted state --delete--> DELETED
//! ```

use crate::error::{RpcError, RpcResult};
use crate::types::{RpcKind, RpcStatus};
use serde_json::Value;

/// Something that happened to an RPC
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    /// Transport accepted the request
    Accepted,
    /// Transport confirmed on-wire delivery
    Delivered,
    /// Device answered a twoway call
    Responded(Value),
    /// Negative acknowledgement or malformed response
    Failed(String),
    /// Deadline passed without delivery
    TimedOut,
    /// Delivered twoway call got no response within the grace window
    Expired,
    /// Operator delete
    Deleted,
}

impl RpcEvent {
    /// Status this event moves the record to
    pub fn target(&self) -> RpcStatus {
        match self {
            Self::Accepted => RpcStatus::Sent,
            Self::Delivered => RpcStatus::Delivered,
            Self::Responded(_) => RpcStatus::Successful,
            Self::Failed(_) => RpcStatus::Failed,
            Self::TimedOut => RpcStatus::Timeout,
            Self::Expired => RpcStatus::Expired,
            Self::Deleted => RpcStatus::Deleted,
        }
    }

    /// Payload to store alongside the new status
    pub fn into_response(self) -> Option<Value> {
        match self {
            Self::Responded(payload) => Some(payload),
            _ => None,
        }
    }
}

/// A validated status change and the response to store with it
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: RpcStatus,
    pub to: RpcStatus,
    /// Response to record (SUCCESSFUL only)
    pub response: Option<Value>,
}

/// Transition rules
pub struct RpcStateMachine;

impl RpcStateMachine {
    /// Validate `from -> to` for an RPC of the given kind.
    pub fn check(kind: RpcKind, from: RpcStatus, to: RpcStatus) -> RpcResult<()> {
        use RpcStatus::*;

        let allowed = match (from, to) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            _ if from.is_terminal(kind) => false,
            (Queued, Sent) => true,
            (Queued | Sent, Delivered) => true,
            (Queued | Sent | Delivered, Successful) => kind == RpcKind::TwoWay,
            (Queued | Sent | Delivered, Failed) => true,
            (Queued | Sent, Timeout) => true,
            (Delivered, Expired) => kind == RpcKind::TwoWay,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(RpcError::InvalidState { from, to })
        }
    }

    /// Validate `from -> to` and decide the stored response.
    ///
    /// `response` is kept only for SUCCESSFUL; `current_response` is
    /// carried over otherwise.
    pub fn transition(
        kind: RpcKind,
        from: RpcStatus,
        to: RpcStatus,
        response: Option<Value>,
        current_response: Option<Value>,
    ) -> RpcResult<Transition> {
        Self::check(kind, from, to)?;

        let response = if to == RpcStatus::Successful {
            response
        } else {
            current_response
        };

        Ok(Transition { from, to, response })
    }

    /// Map `(kind, current, event)` to the resulting transition.
    pub fn apply(kind: RpcKind, current: RpcStatus, event: RpcEvent) -> RpcResult<Transition> {
        let to = event.target();
        Self::transition(kind, current, to, event.into_response(), None)
    }
}
