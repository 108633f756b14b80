// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for device RPC operations.

use crate::config::ConfigError;
use crate::types::RpcStatus;
use thiserror::Error;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur while submitting, tracking or querying RPCs
#[derive(Debug, Error)]
pub enum RpcError {
    /// Unknown id, or the id belongs to another tenant
    #[error("RPC not found: {0}")]
    NotFound(String),

    /// Missing method/device, malformed params or paging
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Illegal status transition (usually a stale event)
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidState { from: RpcStatus, to: RpcStatus },

    /// Device could not be reached by the transport
    #[error("Device transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Record with the same id already exists
    #[error("RPC already exists: {0}")]
    Conflict(String),

    /// Background task already started
    #[error("Already running")]
    AlreadyRunning,

    /// Background task not started
    #[error("Not running")]
    NotRunning,

    /// Service was shut down and cannot be restarted
    #[error("RPC service shut down")]
    Shutdown,

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RpcError {
    /// Create a not-found error for an id
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// True for errors caused by a racing writer having already moved the record.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// True when the same operation may succeed later (device offline).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_))
    }
}

impl From<rusqlite::Error> for RpcError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("JSON encoding: {}", e))
    }
}
