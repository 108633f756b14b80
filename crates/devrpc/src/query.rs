// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tenant-facing read and delete operations.

use crate::error::{RpcError, RpcResult};
use crate::store::RpcStore;
use crate::types::{DeviceId, PageData, PageLink, Rpc, RpcId, RpcStatus, TenantId};
use std::sync::Arc;

/// RPC query service
///
/// Thin layer over the store that applies tenant-facing visibility rules:
/// soft-deleted records are invisible to `get`, but remain listable with an
/// explicit DELETED filter.
pub struct RpcQueryService<S: RpcStore> {
    store: Arc<S>,
}

impl<S: RpcStore> Clone for RpcQueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RpcStore> RpcQueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fetch a live record.
    pub fn get(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<Rpc> {
        let rpc = self.store.get_by_id(tenant_id, id)?;
        if rpc.status == RpcStatus::Deleted {
            return Err(RpcError::not_found(id));
        }
        Ok(rpc)
    }

    /// Soft-delete a record. Deleting twice yields `NotFound`.
    pub fn delete(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<()> {
        self.store.delete(tenant_id, id)?;
        tracing::info!("RPC {} deleted", id);
        Ok(())
    }

    /// List a device's records; `None` lists everything but DELETED.
    pub fn list_by_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>> {
        page.validate()?;
        self.store.list_by_device(tenant_id, device_id, status, page)
    }

    /// List a tenant's records across devices.
    pub fn list_by_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>> {
        page.validate()?;
        self.store.list_by_tenant(tenant_id, status, page)
    }
}
