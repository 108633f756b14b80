// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! devrpc Gateway - REST API for the persistent device RPC engine
//!
//! Runs an `RpcService` backed by SQLite and exposes submit, lookup, delete
//! and paged listing over HTTP. The caller's tenant is taken from the
//! `X-Tenant-Id` header; authentication is expected upstream.
//!
//! # Usage
//!
//! ```bash
//! # Start gateway on default port 8080
//! devrpc-gateway
//!
//! # Custom port, database and config
//! devrpc-gateway --port 9000 --db /var/lib/devrpc.db --config devrpc.toml
//! ```
//!
//! # Endpoints
//!
//! - `POST /api/rpc/oneway/{deviceId}` - Queue a oneway RPC
//! - `POST /api/rpc/twoway/{deviceId}` - Queue a twoway RPC
//! - `GET /api/rpc/persistent/{rpcId}` - Fetch an RPC
//! - `DELETE /api/rpc/persistent/{rpcId}` - Soft-delete an RPC
//! - `GET /api/rpc/persistent/device/{deviceId}` - Page through a device's RPCs

mod handlers;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use devrpc::{LoopbackTransport, RpcService, ServiceConfig, SqliteStore};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// devrpc REST API Gateway
#[derive(Parser, Debug)]
#[command(name = "devrpc-gateway")]
#[command(about = "REST gateway for the persistent device RPC engine")]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides the configuration)
    #[arg(short, long)]
    db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Shared application state
pub struct AppState {
    service: RpcService<SqliteStore, LoopbackTransport>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ServiceConfig::default(),
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let store = SqliteStore::new(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path))?;

    // No device sessions are wired in yet; the loopback transport acks every request.
    let transport = Arc::new(LoopbackTransport::new());
    let service = RpcService::new(config.clone(), Arc::new(store), transport)?;
    service.start()?;

    let state = Arc::new(AppState { service });
    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", args.bind, args.port);
    info!("devrpc Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP server: http://{}", addr);
    info!("Database: {}", config.db_path);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Server error")?;

    info!("Shutting down");
    state.service.shutdown().await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
