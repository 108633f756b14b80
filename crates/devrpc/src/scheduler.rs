// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Expiry scheduler
//!
//! Periodically settles records whose deadline has passed:
//!
//! - QUEUED / SENT past `expiration_time` become TIMEOUT
//! - twoway DELIVERED past `expiration_time + expiry_grace_ms` become EXPIRED
//!
//! The scan reads without locking; each write goes through the store's
//! status check, so a record that completed between scan and write is
//! simply skipped.

use crate::config::ServiceConfig;
use crate::error::{RpcError, RpcResult};
use crate::state::{RpcEvent, RpcStateMachine};
use crate::store::RpcStore;
use crate::types::{now_ms, Rpc, RpcKind, RpcStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Outcome of one scan
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Records moved to TIMEOUT
    pub timed_out: u64,
    /// Records moved to EXPIRED
    pub expired: u64,
    /// Records that changed under us and were skipped
    pub stale: u64,
    /// Per-record write failures
    pub errors: u64,
}

impl TickReport {
    /// Nothing was touched
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Expiry scheduler
pub struct RpcExpiryScheduler<S: RpcStore> {
    store: Arc<S>,
    tick_interval: Duration,
    expiry_grace_ms: u64,
    running: Arc<AtomicBool>,
}

/// Handle to a started scheduler loop
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Check if the loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Expiry scheduler task ended abnormally: {}", e);
        }
        self.running.store(false, Ordering::Release);
    }
}

impl<S: RpcStore + 'static> RpcExpiryScheduler<S> {
    /// Create a scheduler using the tick interval and grace window from `config`
    pub fn new(store: Arc<S>, config: &ServiceConfig) -> Self {
        Self {
            store,
            tick_interval: config.tick_interval(),
            expiry_grace_ms: config.expiry_grace_ms,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if a loop started by this scheduler is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one scan at `now` (Unix ms).
    ///
    /// One record's failure never aborts the scan.
    pub fn tick(&self, now: u64) -> RpcResult<TickReport> {
        let mut report = TickReport::default();

        for rpc in self.store.list_pending(now)? {
            let Some(event) = self.settle_event(&rpc, now) else {
                continue;
            };
            let change = match RpcStateMachine::apply(rpc.kind, rpc.status, event) {
                Ok(change) => change,
                Err(e) => {
                    tracing::debug!("Skipping RPC {}: {}", rpc.id, e);
                    report.stale += 1;
                    continue;
                }
            };

            match self.store.update_status(&rpc.id, change.to, change.response) {
                Ok(_) => {
                    tracing::debug!("RPC {} {} -> {}", rpc.id, change.from, change.to);
                    if change.to == RpcStatus::Timeout {
                        report.timed_out += 1;
                    } else {
                        report.expired += 1;
                    }
                }
                Err(e @ RpcError::InvalidState { .. }) | Err(e @ RpcError::NotFound(_)) => {
                    tracing::debug!("Skipping RPC {}: {}", rpc.id, e);
                    report.stale += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to settle RPC {}: {}", rpc.id, e);
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Event an elapsed record should receive, if any yet.
    fn settle_event(&self, rpc: &Rpc, now: u64) -> Option<RpcEvent> {
        match (rpc.status, rpc.kind) {
            (RpcStatus::Queued | RpcStatus::Sent, _) => Some(RpcEvent::TimedOut),
            (RpcStatus::Delivered, RpcKind::TwoWay)
                if now >= rpc.expiration_time.saturating_add(self.expiry_grace_ms) =>
            {
                Some(RpcEvent::Expired)
            }
            _ => None,
        }
    }

    /// Start the periodic loop on the current tokio runtime.
    ///
    /// Only one loop per scheduler: a second call while running fails with
    /// `AlreadyRunning`.
    pub fn start(self: &Arc<Self>) -> RpcResult<SchedulerHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RpcError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);

        tracing::info!(
            "Expiry scheduler started (tick {:?}, grace {} ms)",
            self.tick_interval,
            self.expiry_grace_ms
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval(scheduler.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match scheduler.tick(now_ms()) {
                            Ok(report) if !report.is_empty() => {
                                tracing::info!("Expiry tick: {:?}", report);
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("Expiry scan failed: {}", e),
                        }
                    }
                }
            }

            tracing::info!("Expiry scheduler stopped");
        });

        Ok(SchedulerHandle {
            running: Arc::clone(&self.running),
            shutdown_tx,
            task,
        })
    }
}
