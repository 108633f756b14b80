// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory RPC backend
//!
//! Records live in a sharded map; a status update holds the entry's shard
//! lock for the whole check-and-write, so racing writers on one record are
//! serialized without blocking unrelated records.

use crate::error::{RpcError, RpcResult};
use crate::state::RpcStateMachine;
use crate::store::{is_scannable, status_matches, validate_new, RpcStore, StoreStats};
use crate::types::{DeviceId, PageData, PageLink, Rpc, RpcId, RpcStatus, TenantId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

/// Process-local RPC store
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<RpcId, Rpc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn transition(
        &self,
        tenant_id: Option<&TenantId>,
        id: &RpcId,
        status: RpcStatus,
        response: Option<Value>,
    ) -> RpcResult<Rpc> {
        let mut entry = self
            .records
            .get_mut(id)
            .filter(|rpc| tenant_id.map_or(true, |tenant| rpc.tenant_id == *tenant))
            .ok_or_else(|| RpcError::not_found(id))?;

        if status == RpcStatus::Deleted && entry.status == RpcStatus::Deleted {
            return Err(RpcError::not_found(id));
        }

        let change = RpcStateMachine::transition(
            entry.kind,
            entry.status,
            status,
            response,
            entry.response.clone(),
        )?;

        entry.status = change.to;
        entry.response = change.response;
        Ok(entry.clone())
    }

    /// Filter, order by `(created_time, id)` and page.
    fn list_matching<F>(&self, filter: F, page: PageLink) -> RpcResult<PageData<Rpc>>
    where
        F: Fn(&Rpc) -> bool,
    {
        page.validate()?;

        let mut matching: Vec<Rpc> = self
            .records
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|rpc| (rpc.created_time, rpc.id));

        Ok(PageData::from_sorted(matching, page))
    }
}

impl RpcStore for MemoryStore {
    fn insert(&self, rpc: &Rpc) -> RpcResult<RpcId> {
        validate_new(rpc)?;

        match self.records.entry(rpc.id) {
            Entry::Occupied(_) => Err(RpcError::Conflict(rpc.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(rpc.clone());
                Ok(rpc.id)
            }
        }
    }

    fn get_by_id(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<Rpc> {
        self.records
            .get(id)
            .filter(|rpc| rpc.tenant_id == *tenant_id)
            .map(|rpc| rpc.clone())
            .ok_or_else(|| RpcError::not_found(id))
    }

    fn update_status(
        &self,
        id: &RpcId,
        status: RpcStatus,
        response: Option<Value>,
    ) -> RpcResult<Rpc> {
        self.transition(None, id, status, response)
    }

    fn delete(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<()> {
        self.transition(Some(tenant_id), id, RpcStatus::Deleted, None)
            .map(|_| ())
    }

    fn list_by_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>> {
        self.list_matching(
            |rpc| {
                rpc.tenant_id == *tenant_id
                    && rpc.device_id == *device_id
                    && status_matches(rpc.status, status)
            },
            page,
        )
    }

    fn list_by_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>> {
        self.list_matching(
            |rpc| rpc.tenant_id == *tenant_id && status_matches(rpc.status, status),
            page,
        )
    }

    fn list_pending(&self, before_expiration: u64) -> RpcResult<Vec<Rpc>> {
        let mut pending: Vec<Rpc> = self
            .records
            .iter()
            .filter(|entry| {
                entry.expiration_time <= before_expiration
                    && is_scannable(entry.status, entry.kind)
            })
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|rpc| (rpc.expiration_time, rpc.id));
        Ok(pending)
    }

    fn list_undispatched(&self, created_before: u64, expires_after: u64) -> RpcResult<Vec<Rpc>> {
        let mut queued: Vec<Rpc> = self
            .records
            .iter()
            .filter(|entry| {
                entry.status == RpcStatus::Queued
                    && entry.created_time <= created_before
                    && entry.expiration_time > expires_after
            })
            .map(|entry| entry.value().clone())
            .collect();
        queued.sort_by_key(|rpc| (rpc.created_time, rpc.id));
        Ok(queued)
    }

    fn list_queued_for_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> RpcResult<Vec<Rpc>> {
        let mut queued: Vec<Rpc> = self
            .records
            .iter()
            .filter(|entry| {
                entry.tenant_id == *tenant_id
                    && entry.device_id == *device_id
                    && entry.persistent
                    && matches!(entry.status, RpcStatus::Queued | RpcStatus::Sent)
            })
            .map(|entry| entry.value().clone())
            .collect();
        queued.sort_by_key(|rpc| (rpc.created_time, rpc.id));
        Ok(queued)
    }

    fn stats(&self) -> RpcResult<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in self.records.iter() {
            stats.total += 1;
            *stats.by_status.entry(entry.status).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RpcKind, SubmitRequest};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn rpc_for(tenant_id: TenantId, device_id: DeviceId, kind: RpcKind, created: u64) -> Rpc {
        Rpc::new_at(
            tenant_id,
            device_id,
            kind,
            SubmitRequest::new("setGpio").timeout_ms(1000),
            10_000,
            created,
        )
    }

    fn ids() -> (TenantId, DeviceId) {
        (
            TenantId::from_uuid(Uuid::new_v4()),
            DeviceId::from_uuid(Uuid::new_v4()),
        )
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let (t, d) = ids();
        let rpc = rpc_for(t, d, RpcKind::OneWay, 5);

        let id = store.insert(&rpc).unwrap();
        assert_eq!(store.get_by_id(&t, &id).unwrap(), rpc);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.insert(&rpc), Err(RpcError::Conflict(_))));
    }

    #[test]
    fn test_memory_store_delete_idempotence() {
        let store = MemoryStore::new();
        let (t, d) = ids();
        let id = store.insert(&rpc_for(t, d, RpcKind::OneWay, 5)).unwrap();

        store.delete(&t, &id).unwrap();
        assert!(matches!(store.delete(&t, &id), Err(RpcError::NotFound(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_response_only_on_success() {
        let store = MemoryStore::new();
        let (t, d) = ids();
        let id = store.insert(&rpc_for(t, d, RpcKind::TwoWay, 5)).unwrap();

        let failed = store
            .update_status(&id, RpcStatus::Failed, Some(json!("ignored")))
            .unwrap();
        assert_eq!(failed.response, None);
    }

    #[test]
    fn test_memory_store_list_order_and_filter() {
        let store = MemoryStore::new();
        let (t, d) = ids();
        let second = store.insert(&rpc_for(t, d, RpcKind::OneWay, 20)).unwrap();
        let first = store.insert(&rpc_for(t, d, RpcKind::OneWay, 10)).unwrap();
        let gone = store.insert(&rpc_for(t, d, RpcKind::OneWay, 30)).unwrap();
        store.delete(&t, &gone).unwrap();

        let page = store.list_by_device(&t, &d, None, PageLink::all()).unwrap();
        assert_eq!(
            page.data.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![first, second]
        );

        let deleted = store
            .list_by_device(&t, &d, Some(RpcStatus::Deleted), PageLink::all())
            .unwrap();
        assert_eq!(deleted.data.len(), 1);

        assert!(store
            .list_by_device(&t, &d, None, PageLink::new(0, 0))
            .is_err());
    }

    #[test]
    fn test_memory_store_list_undispatched() {
        let store = MemoryStore::new();
        let (t, d) = ids();
        // expiration = created + 1000
        let old = store.insert(&rpc_for(t, d, RpcKind::OneWay, 100)).unwrap();
        let fresh = store.insert(&rpc_for(t, d, RpcKind::OneWay, 900)).unwrap();
        let expired = store.insert(&rpc_for(t, d, RpcKind::OneWay, 0)).unwrap();
        let sent = store.insert(&rpc_for(t, d, RpcKind::OneWay, 200)).unwrap();
        store.update_status(&sent, RpcStatus::Sent, None).unwrap();

        let ids: Vec<_> = store
            .list_undispatched(500, 1000)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![old]);
        assert!(!ids.contains(&fresh) && !ids.contains(&expired));
    }

    #[test]
    fn test_memory_store_concurrent_writers_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let (t, d) = ids();
        let id = store.insert(&rpc_for(t, d, RpcKind::OneWay, 0)).unwrap();

        let handles: Vec<_> = [RpcStatus::Delivered, RpcStatus::Timeout, RpcStatus::Deleted]
            .into_iter()
            .map(|status| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.update_status(&id, status, None).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        // DELETED may follow a terminal write; the other two exclude each other
        let final_status = store.get_by_id(&t, &id).unwrap().status;
        assert!(wins == 1 || (wins == 2 && final_status == RpcStatus::Deleted));
    }
}
