// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC store abstraction
//!
//! Defines the trait for storage backends (SQLite, in-memory).

use crate::error::{RpcError, RpcResult};
use crate::types::{DeviceId, PageData, PageLink, Rpc, RpcId, RpcKind, RpcStatus, TenantId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Record counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_status: BTreeMap<RpcStatus, u64>,
}

impl StoreStats {
    pub fn count(&self, status: RpcStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// RPC store trait
///
/// Backend-agnostic interface for storing and querying RPC records.
/// Every mutation is atomic per record: status writes are validated against
/// the stored status through [`crate::RpcStateMachine`] under the same lock
/// or transaction that performs the write.
///
/// # Implementations
///
/// - `SqliteStore` -- Durable, default
/// - `MemoryStore` -- Process-local, for tests and volatile deployments
pub trait RpcStore: Send + Sync {
    /// Insert a new record
    ///
    /// Fails with `InvalidArgument` when `method` or `device_id` is missing
    /// and with `Conflict` when the id already exists.
    fn insert(&self, rpc: &Rpc) -> RpcResult<RpcId>;

    /// Fetch a record owned by `tenant_id` (DELETED records included)
    fn get_by_id(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<Rpc>;

    /// Move a record to `status`, storing `response` for SUCCESSFUL
    ///
    /// Returns the updated record, `NotFound`, or `InvalidState` when the
    /// stored status does not allow the transition.
    fn update_status(
        &self,
        id: &RpcId,
        status: RpcStatus,
        response: Option<Value>,
    ) -> RpcResult<Rpc>;

    /// Soft delete: status write to DELETED
    ///
    /// `NotFound` for unknown ids, other tenants' ids and already deleted
    /// records.
    fn delete(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<()>;

    /// Page through a device's records ordered by `(created_time, id)`
    ///
    /// # Arguments
    ///
    /// - `status` -- Only this status; `None` means every status but DELETED
    fn list_by_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>>;

    /// Page through all of a tenant's records (same filter rules)
    fn list_by_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>>;

    /// Non-terminal records with `expiration_time <= before_expiration`,
    /// across tenants, ordered by expiration time
    fn list_pending(&self, before_expiration: u64) -> RpcResult<Vec<Rpc>>;

    /// QUEUED records created at or before `created_before` that have not
    /// expired at `expires_after`, oldest first
    ///
    /// Used to pick up records whose dispatch hand-off was dropped.
    fn list_undispatched(&self, created_before: u64, expires_after: u64) -> RpcResult<Vec<Rpc>>;

    /// Persistent QUEUED/SENT records of a device, oldest first
    fn list_queued_for_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> RpcResult<Vec<Rpc>>;

    /// Count records per status
    fn stats(&self) -> RpcResult<StoreStats>;
}

/// Checks shared by all backends before a record is written.
pub(crate) fn validate_new(rpc: &Rpc) -> RpcResult<()> {
    if rpc.method.trim().is_empty() {
        return Err(RpcError::InvalidArgument("method is required".into()));
    }
    if rpc.device_id.is_nil() {
        return Err(RpcError::InvalidArgument("deviceId is required".into()));
    }
    if rpc.status != RpcStatus::Queued {
        return Err(RpcError::InvalidArgument(format!(
            "new RPC must be QUEUED, got {}",
            rpc.status
        )));
    }
    Ok(())
}

/// Listing filter: explicit status, or everything except soft-deleted rows.
pub(crate) fn status_matches(status: RpcStatus, filter: Option<RpcStatus>) -> bool {
    match filter {
        Some(wanted) => status == wanted,
        None => status != RpcStatus::Deleted,
    }
}

/// Whether the expiry scan should look at this record at all.
pub(crate) fn is_scannable(status: RpcStatus, kind: RpcKind) -> bool {
    matches!(status, RpcStatus::Queued | RpcStatus::Sent)
        || (status == RpcStatus::Delivered && kind == RpcKind::TwoWay)
}
