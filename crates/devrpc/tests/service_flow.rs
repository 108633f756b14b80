// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end flows through `RpcService`.

use devrpc::{
    now_ms, DeviceId, DeviceTransport, MemoryStore, MockDeviceTransport, PageLink, RpcError,
    RpcId, RpcService, RpcStatus, RpcStore, ServiceConfig, SqliteStore, SubmitRequest, TenantId,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn ids() -> (TenantId, DeviceId) {
    (
        TenantId::from_uuid(Uuid::new_v4()),
        DeviceId::from_uuid(Uuid::new_v4()),
    )
}

fn config() -> ServiceConfig {
    ServiceConfig::builder()
        .tick_interval_ms(3_600_000)
        .expiry_grace_ms(0)
        .build()
}

fn memory_service(
    transport: MockDeviceTransport,
) -> (
    RpcService<MemoryStore, MockDeviceTransport>,
    Arc<MockDeviceTransport>,
) {
    let transport = Arc::new(transport);
    let service = RpcService::new(config(), Arc::new(MemoryStore::new()), transport.clone())
        .expect("service");
    (service, transport)
}

fn gpio() -> SubmitRequest {
    SubmitRequest::new("setGpio")
        .params(json!({"pin": 7, "value": 1}))
        .persistent(true)
        .timeout_ms(5000)
}

async fn wait_for<S, T>(
    service: &RpcService<S, T>,
    tenant: &TenantId,
    id: &RpcId,
    want: RpcStatus,
) -> RpcStatus
where
    S: RpcStore + 'static,
    T: DeviceTransport + 'static,
{
    let mut status = service.query().get(tenant, id).expect("get").status;
    for _ in 0..200 {
        if status == want {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = service.query().get(tenant, id).expect("get").status;
    }
    status
}

#[test]
fn test_set_gpio_scenario() {
    let (service, _transport) = memory_service(MockDeviceTransport::manual());
    let (tenant, device) = ids();

    let id = service.submit_oneway(tenant, device, gpio()).unwrap();
    let rpc = service.query().get(&tenant, &id).unwrap();

    assert_eq!(rpc.device_id, device);
    assert_eq!(rpc.method, "setGpio");
    assert_eq!(rpc.params, json!({"pin": 7, "value": 1}));
    assert_eq!(rpc.expiration_time, rpc.created_time + 5000);
    assert_eq!(rpc.status, RpcStatus::Queued);
}

#[test]
fn test_delete_then_get_and_delete_again() {
    let (service, _transport) = memory_service(MockDeviceTransport::manual());
    let (tenant, device) = ids();
    let id = service.submit_oneway(tenant, device, gpio()).unwrap();

    service.query().delete(&tenant, &id).unwrap();
    assert!(matches!(
        service.query().get(&tenant, &id),
        Err(RpcError::NotFound(_))
    ));
    assert!(matches!(
        service.query().delete(&tenant, &id),
        Err(RpcError::NotFound(_))
    ));
}

#[test]
fn test_list_queued_and_deleted_filters() {
    let (service, _transport) = memory_service(MockDeviceTransport::manual());
    let (tenant, device) = ids();
    let id = service.submit_oneway(tenant, device, gpio()).unwrap();

    let queued = service
        .query()
        .list_by_device(&tenant, &device, Some(RpcStatus::Queued), PageLink::new(0, 10))
        .unwrap();
    assert!(queued.data.iter().any(|rpc| rpc.id == id));

    service.query().delete(&tenant, &id).unwrap();

    let deleted = service
        .query()
        .list_by_device(&tenant, &device, Some(RpcStatus::Deleted), PageLink::new(0, 10))
        .unwrap();
    assert_eq!(deleted.data.len(), 1);
    assert_eq!(deleted.data[0].id, id);

    let live = service
        .query()
        .list_by_device(&tenant, &device, None, PageLink::new(0, 10))
        .unwrap();
    assert_eq!(live.total_elements, 0);
}

#[test]
fn test_elapsed_records_time_out_on_tick() {
    let (service, _transport) = memory_service(MockDeviceTransport::manual());
    let (tenant, device) = ids();
    let id = service
        .submit_twoway(tenant, device, SubmitRequest::new("getState").timeout_ms(1))
        .unwrap();

    let report = service.scheduler().tick(now_ms() + 10).unwrap();
    assert_eq!(report.timed_out, 1);
    assert_eq!(
        service.query().get(&tenant, &id).unwrap().status,
        RpcStatus::Timeout
    );
}

#[tokio::test]
async fn test_oneway_delivered_end_to_end() {
    let (service, transport) = memory_service(MockDeviceTransport::new());
    service.start().unwrap();
    let (tenant, device) = ids();

    let id = service.submit_oneway(tenant, device, gpio()).unwrap();
    assert_eq!(
        wait_for(&service, &tenant, &id, RpcStatus::Delivered).await,
        RpcStatus::Delivered
    );
    assert_eq!(transport.sent()[0].method, "setGpio");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_response_wins_over_late_timeout() {
    let (service, transport) = memory_service(MockDeviceTransport::manual());
    service.start().unwrap();
    let (tenant, device) = ids();

    let id = service
        .submit_twoway(tenant, device, SubmitRequest::new("getState").timeout_ms(5000))
        .unwrap();
    assert_eq!(
        wait_for(&service, &tenant, &id, RpcStatus::Sent).await,
        RpcStatus::Sent
    );

    transport.respond(id, json!({"state": "on"}));
    assert_eq!(
        wait_for(&service, &tenant, &id, RpcStatus::Successful).await,
        RpcStatus::Successful
    );

    let report = service.scheduler().tick(now_ms() + 60_000).unwrap();
    assert_eq!(report.timed_out, 0);

    let rpc = service.query().get(&tenant, &id).unwrap();
    assert_eq!(rpc.status, RpcStatus::Successful);
    assert_eq!(rpc.response, Some(json!({"state": "on"})));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delivery_after_delete_is_dropped() {
    let (service, transport) = memory_service(MockDeviceTransport::manual());
    service.start().unwrap();
    let (tenant, device) = ids();

    let id = service.submit_oneway(tenant, device, gpio()).unwrap();
    wait_for(&service, &tenant, &id, RpcStatus::Sent).await;
    service.query().delete(&tenant, &id).unwrap();

    transport.deliver(id);
    for _ in 0..100 {
        if service.dispatcher_stats().stale > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(service.dispatcher_stats().stale, 1);
    assert!(matches!(
        service.query().get(&tenant, &id),
        Err(RpcError::NotFound(_))
    ));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_offline_device_redelivered_on_reconnect() {
    let (service, transport) = memory_service(MockDeviceTransport::manual());
    let (tenant, device) = ids();
    transport.set_offline(device);
    service.start().unwrap();

    let id = service.submit_oneway(tenant, device, gpio()).unwrap();
    for _ in 0..100 {
        if service.dispatcher_stats().unreachable > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        service.query().get(&tenant, &id).unwrap().status,
        RpcStatus::Queued
    );

    transport.set_online(tenant, device);
    assert_eq!(
        wait_for(&service, &tenant, &id, RpcStatus::Sent).await,
        RpcStatus::Sent
    );
    assert_eq!(transport.sent().len(), 1);

    service.shutdown().await.unwrap();
}

#[test]
fn test_records_survive_restart_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devrpc.db");
    let path = path.to_str().unwrap();
    let (tenant, device) = ids();

    let id = {
        let service = RpcService::new(
            config(),
            Arc::new(SqliteStore::new(path).unwrap()),
            Arc::new(MockDeviceTransport::manual()),
        )
        .unwrap();
        service.submit_oneway(tenant, device, gpio()).unwrap()
    };

    let service = RpcService::new(
        config(),
        Arc::new(SqliteStore::new(path).unwrap()),
        Arc::new(MockDeviceTransport::manual()),
    )
    .unwrap();
    let rpc = service.query().get(&tenant, &id).unwrap();
    assert_eq!(rpc.device_id, device);
    assert!(rpc.persistent);
    assert_eq!(service.store_stats().unwrap().count(RpcStatus::Queued), 1);
}

#[tokio::test]
async fn test_deleted_before_start_is_never_sent() {
    let (service, transport) = memory_service(MockDeviceTransport::new());
    let (tenant, device) = ids();

    let id = service.submit_twoway(tenant, device, gpio()).unwrap();
    service.query().delete(&tenant, &id).unwrap();
    service.start().unwrap();

    for _ in 0..100 {
        if service.dispatcher_stats().stale > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(service.dispatcher_stats().stale, 1);
    assert!(transport.sent().is_empty());
    assert_eq!(service.store_stats().unwrap().count(RpcStatus::Deleted), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_dispatch_queue_is_caught_up() {
    let transport = Arc::new(MockDeviceTransport::manual());
    let config = ServiceConfig::builder()
        .tick_interval_ms(20)
        .dispatch_queue_capacity(1)
        .build();
    let service = RpcService::new(config, Arc::new(MemoryStore::new()), transport.clone())
        .expect("service");
    let (tenant, device) = ids();

    // The second id does not fit in the queue
    let first = service.submit_oneway(tenant, device, gpio()).unwrap();
    let second = service.submit_oneway(tenant, device, gpio()).unwrap();
    service.start().unwrap();

    assert_eq!(
        wait_for(&service, &tenant, &first, RpcStatus::Sent).await,
        RpcStatus::Sent
    );
    assert_eq!(
        wait_for(&service, &tenant, &second, RpcStatus::Sent).await,
        RpcStatus::Sent
    );
    assert_eq!(transport.sent().len(), 2);
    assert!(service.dispatcher_stats().caught_up >= 1);

    service.shutdown().await.unwrap();
}

#[test]
fn test_oversized_timeout_is_rejected() {
    let (service, _transport) = memory_service(MockDeviceTransport::manual());
    let (tenant, device) = ids();

    let result = service.submit_oneway(tenant, device, gpio().timeout_ms(u64::MAX));
    assert!(matches!(result, Err(RpcError::InvalidArgument(_))));
    assert_eq!(service.store_stats().unwrap().total, 0);
}
