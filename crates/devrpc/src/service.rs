// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC service
//!
//! Owns the store, dispatcher, scheduler and query service, and the
//! background tasks that drive them.

use crate::config::ServiceConfig;
use crate::dispatcher::{DispatcherStats, EventBridge, RpcDispatcher};
use crate::error::{RpcError, RpcResult};
use crate::query::RpcQueryService;
use crate::scheduler::{RpcExpiryScheduler, SchedulerHandle};
use crate::store::{RpcStore, StoreStats};
use crate::transport::{DeviceTransport, TransportEvent};
use crate::types::{DeviceId, Rpc, RpcId, RpcKind, SubmitRequest, TenantId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

enum Lifecycle {
    /// Built, queues buffering until `start`
    Idle {
        dispatch_rx: mpsc::Receiver<(TenantId, RpcId)>,
        event_rx: mpsc::Receiver<TransportEvent>,
    },
    Running {
        shutdown_tx: watch::Sender<bool>,
        dispatcher_task: JoinHandle<()>,
        scheduler: SchedulerHandle,
    },
    Stopped,
}

/// Device RPC service
///
/// # Type Parameters
///
/// - `S` -- Storage backend (e.g., `SqliteStore`)
/// - `T` -- Device transport implementation
pub struct RpcService<S: RpcStore, T: DeviceTransport> {
    config: ServiceConfig,
    store: Arc<S>,
    dispatcher: Arc<RpcDispatcher<S, T>>,
    scheduler: Arc<RpcExpiryScheduler<S>>,
    query: RpcQueryService<S>,
    dispatch_tx: mpsc::Sender<(TenantId, RpcId)>,
    state: Mutex<Lifecycle>,
}

impl<S: RpcStore + 'static, T: DeviceTransport + 'static> RpcService<S, T> {
    /// Create a new service and register it with the transport.
    ///
    /// Submits are accepted immediately; nothing is dispatched until
    /// [`start`](Self::start).
    pub fn new(config: ServiceConfig, store: Arc<S>, transport: Arc<T>) -> RpcResult<Self> {
        config.validate()?;

        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_capacity);
        let (bridge, event_rx) = EventBridge::channel(config.event_queue_capacity);
        transport.register_event_sink(bridge);

        Ok(Self {
            dispatcher: Arc::new(
                RpcDispatcher::new(Arc::clone(&store), transport)
                    .with_retry_interval(config.tick_interval()),
            ),
            scheduler: Arc::new(RpcExpiryScheduler::new(Arc::clone(&store), &config)),
            query: RpcQueryService::new(Arc::clone(&store)),
            store,
            config,
            dispatch_tx,
            state: Mutex::new(Lifecycle::Idle {
                dispatch_rx,
                event_rx,
            }),
        })
    }

    /// Spawn the dispatcher and expiry scheduler on the current runtime.
    pub fn start(&self) -> RpcResult<()> {
        let mut state = self.state.lock();

        match std::mem::replace(&mut *state, Lifecycle::Stopped) {
            Lifecycle::Idle {
                dispatch_rx,
                event_rx,
            } => {
                let scheduler = match self.scheduler.start() {
                    Ok(handle) => handle,
                    Err(e) => {
                        *state = Lifecycle::Idle {
                            dispatch_rx,
                            event_rx,
                        };
                        return Err(e);
                    }
                };

                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let dispatcher_task = tokio::spawn(Arc::clone(&self.dispatcher).run(
                    dispatch_rx,
                    event_rx,
                    shutdown_rx,
                ));

                *state = Lifecycle::Running {
                    shutdown_tx,
                    dispatcher_task,
                    scheduler,
                };
                tracing::info!("RPC service started");
                Ok(())
            }
            running @ Lifecycle::Running { .. } => {
                *state = running;
                Err(RpcError::AlreadyRunning)
            }
            Lifecycle::Stopped => Err(RpcError::Shutdown),
        }
    }

    /// Stop background tasks. Records stay in the store.
    ///
    /// Fails with `NotRunning` if the service was never started; calling
    /// it again after a shutdown is a no-op.
    pub async fn shutdown(&self) -> RpcResult<()> {
        let previous = {
            let mut state = self.state.lock();
            if matches!(*state, Lifecycle::Idle { .. }) {
                return Err(RpcError::NotRunning);
            }
            std::mem::replace(&mut *state, Lifecycle::Stopped)
        };

        if let Lifecycle::Running {
            shutdown_tx,
            dispatcher_task,
            scheduler,
        } = previous
        {
            let _ = shutdown_tx.send(true);
            scheduler.stop().await;
            if let Err(e) = dispatcher_task.await {
                tracing::warn!("Dispatcher task ended abnormally: {}", e);
            }
            tracing::info!("RPC service stopped");
        }
        Ok(())
    }

    /// Whether background tasks are running
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), Lifecycle::Running { .. })
    }

    /// Queue a fire-and-forget command
    pub fn submit_oneway(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        request: SubmitRequest,
    ) -> RpcResult<RpcId> {
        self.submit(tenant_id, device_id, RpcKind::OneWay, request)
    }

    /// Queue a request that expects a device response
    pub fn submit_twoway(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        request: SubmitRequest,
    ) -> RpcResult<RpcId> {
        self.submit(tenant_id, device_id, RpcKind::TwoWay, request)
    }

    /// Store the record, then hand it to the dispatcher without waiting.
    fn submit(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        kind: RpcKind,
        request: SubmitRequest,
    ) -> RpcResult<RpcId> {
        if matches!(*self.state.lock(), Lifecycle::Stopped) {
            return Err(RpcError::Shutdown);
        }
        request.validate()?;

        let rpc = Rpc::new(
            tenant_id,
            device_id,
            kind,
            request,
            self.config.default_timeout_ms,
        );
        let id = self.store.insert(&rpc)?;

        tracing::debug!(
            "RPC {} queued: {} {} -> device {}",
            id,
            kind,
            rpc.method,
            device_id
        );

        match self.dispatch_tx.try_send((tenant_id, id)) {
            Ok(()) => {}
            // The record is stored; the dispatcher's catch-up scan sends it.
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Dispatch queue full, RPC {} left for catch-up", id);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Dispatcher gone, RPC {} stays queued", id);
            }
        }

        Ok(id)
    }

    /// Tenant-facing query operations
    pub fn query(&self) -> &RpcQueryService<S> {
        &self.query
    }

    /// Expiry scheduler (for manual sweeps)
    pub fn scheduler(&self) -> &Arc<RpcExpiryScheduler<S>> {
        &self.scheduler
    }

    /// Dispatcher counters
    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Record counts per status
    pub fn store_stats(&self) -> RpcResult<StoreStats> {
        self.store.stats()
    }

    /// Active configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
