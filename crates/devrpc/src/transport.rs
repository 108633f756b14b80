// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device transport abstraction
//!
//! The engine never talks to devices itself. It hands requests to a
//! [`DeviceTransport`] (a session/connection manager owned by someone else)
//! and learns about acks, responses and reconnects through an [`EventSink`].
//!
//! # Integration
//!
//! ```ignore
//! impl DeviceTransport for SessionManager {
//!     fn send(&self, request: DeviceRequest) -> Result<(), TransportError> {
//!         let session = self.session(&request.device_id)
//!             .ok_or(TransportError::Unreachable(request.device_id))?;
//!         session.push(request)
//!     }
//!     // ...
//! }
//! ```

use crate::error::RpcError;
use crate::types::{DeviceId, Rpc, RpcId, RpcKind, TenantId};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Request handed to the transport for one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRequest {
    /// Correlation id for acks and responses
    pub rpc_id: RpcId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub method: String,
    pub params: Value,
    pub kind: RpcKind,
    /// Unix ms after which the engine no longer waits
    pub expiration_time: u64,
}

impl From<&Rpc> for DeviceRequest {
    fn from(rpc: &Rpc) -> Self {
        Self {
            rpc_id: rpc.id,
            tenant_id: rpc.tenant_id,
            device_id: rpc.device_id,
            method: rpc.method.clone(),
            params: rpc.params.clone(),
            kind: rpc.kind,
            expiration_time: rpc.expiration_time,
        }
    }
}

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No session for the device; the record stays pending
    #[error("device {0} is unreachable")]
    Unreachable(DeviceId),

    /// Transport refused the request outright
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unreachable(_) => Self::TransportUnavailable(e.to_string()),
            TransportError::Rejected(reason) => Self::InvalidArgument(reason),
        }
    }
}

/// Asynchronous notifications from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Request confirmed on the wire
    Delivered { rpc_id: RpcId },
    /// Device answered a twoway call
    Response { rpc_id: RpcId, payload: Value },
    /// Negative acknowledgement or malformed response
    Failed { rpc_id: RpcId, reason: String },
    /// Device (re)opened a session
    DeviceConnected {
        tenant_id: TenantId,
        device_id: DeviceId,
    },
}

/// Callback-based event receiver
pub trait EventSink: Send + Sync {
    /// Called for every transport event; must not block
    fn on_event(&self, event: TransportEvent);
}

/// Abstract device transport
pub trait DeviceTransport: Send + Sync {
    /// Hand a request to the device's session
    ///
    /// `Ok` means the transport accepted it (status SENT). Delivery and
    /// responses are reported later through the registered [`EventSink`].
    fn send(&self, request: DeviceRequest) -> Result<(), TransportError>;

    /// Register the receiver for transport events
    fn register_event_sink(&self, sink: Arc<dyn EventSink>);
}

// ============================================================================
// Loopback Implementation
// ============================================================================

/// Transport that answers every request itself
///
/// Nothing is retained per request: each send reports delivery and, for a
/// twoway call, a response echoing the params. Used by the gateway until a
/// real session layer is plugged in.
#[derive(Default)]
pub struct LoopbackTransport {
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, event: TransportEvent) {
        let sinks = lock(&self.sinks).clone();
        for sink in sinks {
            sink.on_event(event.clone());
        }
    }
}

impl DeviceTransport for LoopbackTransport {
    fn send(&self, request: DeviceRequest) -> Result<(), TransportError> {
        let rpc_id = request.rpc_id;
        self.emit(TransportEvent::Delivered { rpc_id });
        if request.kind == RpcKind::TwoWay {
            self.emit(TransportEvent::Response {
                rpc_id,
                payload: request.params,
            });
        }
        Ok(())
    }

    fn register_event_sink(&self, sink: Arc<dyn EventSink>) {
        lock(&self.sinks).push(sink);
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock device transport
///
/// Every device is online unless marked offline. With `auto_deliver` (the
/// default) each accepted request is immediately reported as delivered.
pub struct MockDeviceTransport {
    auto_deliver: bool,
    offline: Mutex<HashSet<DeviceId>>,
    sent: Mutex<Vec<DeviceRequest>>,
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockDeviceTransport {
    /// Create a new mock transport that auto-delivers
    pub fn new() -> Self {
        Self {
            auto_deliver: true,
            offline: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that accepts requests but reports nothing on its own
    pub fn manual() -> Self {
        Self {
            auto_deliver: false,
            ..Self::new()
        }
    }

    /// Mark a device as unreachable
    pub fn set_offline(&self, device_id: DeviceId) {
        lock(&self.offline).insert(device_id);
    }

    /// Bring a device back and announce the reconnect
    pub fn set_online(&self, tenant_id: TenantId, device_id: DeviceId) {
        lock(&self.offline).remove(&device_id);
        self.emit(TransportEvent::DeviceConnected {
            tenant_id,
            device_id,
        });
    }

    /// Requests accepted so far
    pub fn sent(&self) -> Vec<DeviceRequest> {
        lock(&self.sent).clone()
    }

    /// Report on-wire delivery
    pub fn deliver(&self, rpc_id: RpcId) {
        self.emit(TransportEvent::Delivered { rpc_id });
    }

    /// Report a device response
    pub fn respond(&self, rpc_id: RpcId, payload: Value) {
        self.emit(TransportEvent::Response { rpc_id, payload });
    }

    /// Report a negative acknowledgement
    pub fn fail(&self, rpc_id: RpcId, reason: impl Into<String>) {
        self.emit(TransportEvent::Failed {
            rpc_id,
            reason: reason.into(),
        });
    }

    fn emit(&self, event: TransportEvent) {
        let sinks = lock(&self.sinks).clone();
        for sink in sinks {
            sink.on_event(event.clone());
        }
    }
}

impl Default for MockDeviceTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTransport for MockDeviceTransport {
    fn send(&self, request: DeviceRequest) -> Result<(), TransportError> {
        if lock(&self.offline).contains(&request.device_id) {
            return Err(TransportError::Unreachable(request.device_id));
        }

        let rpc_id = request.rpc_id;
        lock(&self.sent).push(request);

        if self.auto_deliver {
            self.deliver(rpc_id);
        }
        Ok(())
    }

    fn register_event_sink(&self, sink: Arc<dyn EventSink>) {
        lock(&self.sinks).push(sink);
    }
}
