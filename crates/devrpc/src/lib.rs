// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent Device RPC Engine
//!
//! Accepts commands addressed to devices, stores each one as a durable
//! record, delivers it through a pluggable transport and tracks it to a
//! terminal outcome.
//!
//! # Features
//!
//! - **Oneway and twoway calls** -- Fire-and-forget or wait for a response
//! - **SQLite Backend** -- Records survive restarts (in-memory store for tests)
//! - **Race-safe lifecycle** -- Every status write is checked against the stored status
//! - **Expiry** -- Periodic TIMEOUT / EXPIRED sweep
//! - **Redelivery** -- Persistent records are re-sent when a device reconnects
//! - **Catch-up** -- QUEUED records that missed the dispatch queue are sent later
//!
//! # Architecture
//!
//! ```text
//! RpcService
//! +-- RpcDispatcher        (transport send + ack/response handling)
//! +-- RpcExpiryScheduler   (periodic deadline sweep)
//! +-- RpcQueryService      (get / delete / paged listing)
//! +-- RpcStore             (SQLite or in-memory backend)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use devrpc::{RpcService, ServiceConfig, SqliteStore, SubmitRequest};
//!
//! let config = ServiceConfig::builder().default_timeout_ms(5000).build();
//! let store = Arc::new(SqliteStore::new("devrpc.db")?);
//! let service = RpcService::new(config, store, transport)?;
//! service.start()?;
//!
//! let id = service.submit_oneway(
//!     tenant,
//!     device,
//!     SubmitRequest::new("setGpio").params(json!({"pin": 7, "value": 1})),
//! )?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod query;
pub mod scheduler;
pub mod service;
pub mod sqlite;
pub mod state;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{ConfigError, ServiceConfig, ServiceConfigBuilder};
pub use dispatcher::{DispatchOutcome, DispatcherStats, RpcDispatcher};
pub use error::{RpcError, RpcResult};
pub use memory::MemoryStore;
pub use query::RpcQueryService;
pub use scheduler::{RpcExpiryScheduler, SchedulerHandle, TickReport};
pub use service::RpcService;
pub use sqlite::SqliteStore;
pub use state::{RpcEvent, RpcStateMachine, Transition};
pub use store::{RpcStore, StoreStats};
pub use transport::{
    DeviceRequest, DeviceTransport, EventSink, LoopbackTransport, MockDeviceTransport,
    TransportError, TransportEvent,
};
pub use types::{
    now_ms, DeviceId, PageData, PageLink, Rpc, RpcId, RpcKind, RpcStatus, SubmitRequest, TenantId,
    MAX_TIMEOUT_MS,
};
