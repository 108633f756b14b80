// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC dispatcher
//!
//! Hands queued records to the device transport and folds transport
//! events back into record status.
//!
//! # Operation
//!
//! 1. Receive ids of freshly queued records from the submit path
//! 2. Re-read each record and, if still QUEUED, send it through the
//!    [`DeviceTransport`] and mark it SENT
//! 3. Apply delivery acks, responses and nacks as they arrive
//! 4. Re-send a device's persistent backlog when it reconnects
//! 5. Periodically pick up QUEUED records the hand-off queue never carried

use crate::error::{RpcError, RpcResult};
use crate::state::RpcEvent;
use crate::store::RpcStore;
use crate::transport::{DeviceRequest, DeviceTransport, EventSink, TransportEvent};
use crate::types::{now_ms, DeviceId, Rpc, RpcId, RpcStatus, TenantId};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

/// Default period of the catch-up scan
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// What happened to one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Transport accepted the request; record is SENT (or further along)
    Sent,
    /// Device unreachable; record stays pending for redelivery or timeout
    Pending,
    /// Transport rejected the request; record is FAILED
    Failed,
    /// Record was no longer dispatchable (terminal, deleted or gone)
    Stale,
}

/// Dispatcher statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Dispatch attempts
    pub dispatched: u64,
    /// Attempts accepted by the transport
    pub accepted: u64,
    /// Attempts that found the device offline
    pub unreachable: u64,
    /// Delivery acks applied
    pub delivered: u64,
    /// Responses applied
    pub succeeded: u64,
    /// Records moved to FAILED
    pub failed: u64,
    /// Events or writes dropped because the record had moved on
    pub stale: u64,
    /// Records sent by the catch-up scan
    pub caught_up: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    accepted: AtomicU64,
    unreachable: AtomicU64,
    delivered: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
    caught_up: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            unreachable: self.unreachable.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            caught_up: self.caught_up.load(Ordering::Relaxed),
        }
    }
}

/// Bridges transport callbacks into the dispatcher's event queue.
pub(crate) struct EventBridge {
    tx: mpsc::Sender<TransportEvent>,
}

impl EventBridge {
    pub(crate) fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for EventBridge {
    fn on_event(&self, event: TransportEvent) {
        if let Err(e) = self.tx.try_send(event) {
            // A lost ack leaves the record pending; the scheduler settles it.
            tracing::warn!("Dropping transport event: {}", e);
        }
    }
}

/// RPC dispatcher
///
/// Stateless apart from its counters: every decision is made against the
/// record currently in the store.
pub struct RpcDispatcher<S: RpcStore, T: DeviceTransport> {
    store: Arc<S>,
    transport: Arc<T>,
    retry_interval: Duration,
    stats: Counters,
}

impl<S: RpcStore, T: DeviceTransport> RpcDispatcher<S, T> {
    /// Create a new dispatcher
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            store,
            transport,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            stats: Counters::default(),
        }
    }

    /// Set the catch-up period (also the minimum age of a record it picks up)
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval.max(Duration::from_millis(1));
        self
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStats {
        self.stats.snapshot()
    }

    /// Send a freshly queued record to its device.
    ///
    /// The record is re-read first: anything no longer QUEUED (deleted,
    /// timed out, already sent by a catch-up) is skipped as stale.
    pub fn dispatch(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<DispatchOutcome> {
        let rpc = match self.store.get_by_id(tenant_id, id) {
            Ok(rpc) => rpc,
            Err(RpcError::NotFound(_)) => {
                Counters::bump(&self.stats.stale);
                tracing::debug!("RPC {} vanished before dispatch", id);
                return Ok(DispatchOutcome::Stale);
            }
            Err(e) => return Err(e),
        };

        if rpc.status != RpcStatus::Queued {
            Counters::bump(&self.stats.stale);
            tracing::debug!("RPC {} is {}, not dispatching", id, rpc.status);
            return Ok(DispatchOutcome::Stale);
        }

        self.send_record(&rpc)
    }

    /// Hand a QUEUED or SENT record to the transport.
    ///
    /// QUEUED records move to SENT on acceptance. SENT records (redelivery
    /// after a reconnect) are re-sent without a status write.
    fn send_record(&self, rpc: &Rpc) -> RpcResult<DispatchOutcome> {
        Counters::bump(&self.stats.dispatched);

        let err = match self.transport.send(DeviceRequest::from(rpc)) {
            Ok(()) => {
                Counters::bump(&self.stats.accepted);
                if rpc.status == RpcStatus::Queued {
                    self.apply(&rpc.id, RpcEvent::Accepted)?;
                }
                tracing::debug!("RPC {} sent to device {}", rpc.id, rpc.device_id);
                return Ok(DispatchOutcome::Sent);
            }
            Err(e) => RpcError::from(e),
        };

        if err.is_retryable() {
            Counters::bump(&self.stats.unreachable);
            tracing::debug!("RPC {} stays {}: {}", rpc.id, rpc.status, err);
            return Ok(DispatchOutcome::Pending);
        }

        tracing::warn!("Transport rejected RPC {}: {}", rpc.id, err);
        match self.apply(&rpc.id, RpcEvent::Failed(err.to_string()))? {
            Some(_) => Ok(DispatchOutcome::Failed),
            None => Ok(DispatchOutcome::Stale),
        }
    }

    /// Send QUEUED records older than one retry interval, oldest first.
    ///
    /// Picks up records whose id never made it through the dispatch queue
    /// (queue full) and records whose device was unreachable on the first
    /// attempt. Returns how many the transport accepted.
    pub fn catch_up(&self, now: u64) -> RpcResult<usize> {
        let min_age = u64::try_from(self.retry_interval.as_millis()).unwrap_or(u64::MAX);
        let backlog = self
            .store
            .list_undispatched(now.saturating_sub(min_age), now)?;

        let mut sent = 0;
        for rpc in &backlog {
            match self.send_record(rpc) {
                Ok(DispatchOutcome::Sent) => {
                    Counters::bump(&self.stats.caught_up);
                    sent += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Catch-up of RPC {} failed: {}", rpc.id, e),
            }
        }

        if sent > 0 {
            tracing::info!("Catch-up sent {} queued RPC(s)", sent);
        }
        Ok(sent)
    }

    /// Apply one transport event
    pub fn handle_event(&self, event: TransportEvent) -> RpcResult<()> {
        match event {
            TransportEvent::Delivered { rpc_id } => {
                self.apply(&rpc_id, RpcEvent::Delivered)?;
            }
            TransportEvent::Response { rpc_id, payload } => {
                self.apply(&rpc_id, RpcEvent::Responded(payload))?;
            }
            TransportEvent::Failed { rpc_id, reason } => {
                tracing::debug!("RPC {} failed on device: {}", rpc_id, reason);
                self.apply(&rpc_id, RpcEvent::Failed(reason))?;
            }
            TransportEvent::DeviceConnected {
                tenant_id,
                device_id,
            } => {
                self.redeliver(&tenant_id, &device_id)?;
            }
        }
        Ok(())
    }

    /// Re-send a device's persistent QUEUED/SENT records, oldest first.
    ///
    /// Returns how many the transport accepted.
    pub fn redeliver(&self, tenant_id: &TenantId, device_id: &DeviceId) -> RpcResult<usize> {
        let backlog = self.store.list_queued_for_device(tenant_id, device_id)?;
        if backlog.is_empty() {
            return Ok(0);
        }

        tracing::info!(
            "Device {} connected, redelivering {} persistent RPC(s)",
            device_id,
            backlog.len()
        );

        let mut sent = 0;
        for rpc in &backlog {
            match self.send_record(rpc) {
                Ok(DispatchOutcome::Sent) => sent += 1,
                // Device dropped again; the rest will wait for the next connect
                Ok(DispatchOutcome::Pending) => break,
                Ok(_) => {}
                Err(e) => tracing::warn!("Redelivery of RPC {} failed: {}", rpc.id, e),
            }
        }
        Ok(sent)
    }

    /// Write the event's status, dropping it if the record has moved on.
    ///
    /// `Ok(None)` means the event was stale.
    fn apply(&self, id: &RpcId, event: RpcEvent) -> RpcResult<Option<Rpc>> {
        let target = event.target();
        match self.store.update_status(id, target, event.into_response()) {
            Ok(rpc) => {
                match target {
                    RpcStatus::Delivered => Counters::bump(&self.stats.delivered),
                    RpcStatus::Successful => Counters::bump(&self.stats.succeeded),
                    RpcStatus::Failed => Counters::bump(&self.stats.failed),
                    _ => {}
                }
                Ok(Some(rpc))
            }
            Err(e @ RpcError::InvalidState { .. }) => {
                Counters::bump(&self.stats.stale);
                tracing::debug!("Dropping stale event for RPC {}: {}", id, e);
                Ok(None)
            }
            Err(RpcError::NotFound(_)) => {
                Counters::bump(&self.stats.stale);
                tracing::debug!("Dropping event for unknown RPC {}", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the dispatch loop until `shutdown` flips or its sender is dropped.
    pub async fn run(
        self: Arc<Self>,
        mut dispatch_rx: mpsc::Receiver<(TenantId, RpcId)>,
        mut event_rx: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("RpcDispatcher started (catch-up every {:?})", self.retry_interval);

        let mut retry = interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some((tenant_id, id)) = dispatch_rx.recv() => {
                    if let Err(e) = self.dispatch(&tenant_id, &id) {
                        tracing::warn!("Dispatch of RPC {} failed: {}", id, e);
                    }
                }
                Some(event) = event_rx.recv() => {
                    if let Err(e) = self.handle_event(event) {
                        tracing::warn!("Transport event handling failed: {}", e);
                    }
                }
                _ = retry.tick() => {
                    if let Err(e) = self.catch_up(now_ms()) {
                        tracing::warn!("Catch-up scan failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("RpcDispatcher stopped ({:?})", self.stats());
    }
}
