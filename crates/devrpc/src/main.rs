// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! devrpc store administration CLI
//!
//! Inspects and maintains the RPC database of a stopped or running service.
//!
//! # Usage
//!
//! ```bash
//! # Show one record
//! devrpc --db devrpc.db get <tenant> <rpc-id>
//!
//! # Page through a device's records
//! devrpc list <tenant> --device <device> --status QUEUED --page-size 20
//!
//! # Settle elapsed records once
//! devrpc --config devrpc.toml sweep
//!
//! # Write a default configuration file
//! devrpc gen-config > devrpc.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devrpc::{
    now_ms, DeviceId, PageLink, RpcExpiryScheduler, RpcId, RpcQueryService, RpcStatus, RpcStore,
    ServiceConfig, SqliteStore, TenantId,
};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "devrpc")]
#[command(about = "Persistent device RPC store administration", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides the configuration)
    #[arg(short, long)]
    db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show one RPC as JSON
    Get {
        tenant: TenantId,
        id: RpcId,
    },
    /// List RPCs of a tenant or device
    List {
        tenant: TenantId,
        /// Restrict to one device
        #[arg(long)]
        device: Option<DeviceId>,
        /// Status filter (default: everything but DELETED)
        #[arg(long)]
        status: Option<RpcStatus>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Soft-delete an RPC
    Delete {
        tenant: TenantId,
        id: RpcId,
    },
    /// Show record counts per status
    Stats,
    /// Run one expiry scan now
    Sweep,
    /// Print the default configuration as TOML
    GenConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ServiceConfig::default(),
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }

    if let Commands::GenConfig = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let store = Arc::new(
        SqliteStore::new(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path))?,
    );

    handle_command(args.command, &config, store)
}

fn handle_command(cmd: Commands, config: &ServiceConfig, store: Arc<SqliteStore>) -> Result<()> {
    let query = RpcQueryService::new(Arc::clone(&store));

    match cmd {
        Commands::Get { tenant, id } => {
            let rpc = query.get(&tenant, &id)?;
            println!("{}", serde_json::to_string_pretty(&rpc)?);
        }
        Commands::List {
            tenant,
            device,
            status,
            page,
            page_size,
        } => {
            let link = PageLink::new(page, page_size);
            let data = match device {
                Some(device) => query.list_by_device(&tenant, &device, status, link)?,
                None => query.list_by_tenant(&tenant, status, link)?,
            };

            println!("{}", page_banner(page, data.total_pages, data.total_elements));
            for rpc in &data.data {
                println!(
                    "  {}  {:<10} {:<8} {:<20} device={} expires={}",
                    rpc.id, rpc.status, rpc.kind, rpc.method, rpc.device_id, rpc.expiration_time
                );
            }
        }
        Commands::Delete { tenant, id } => {
            query.delete(&tenant, &id)?;
            println!("RPC {} deleted.", id);
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("Total RPCs stored: {}", stats.total);
            for (status, count) in &stats.by_status {
                println!("  {:<10} {}", status, count);
            }
        }
        Commands::Sweep => {
            let scheduler = RpcExpiryScheduler::new(store, config);
            let report = scheduler.tick(now_ms())?;
            println!(
                "Timed out: {}, expired: {}, skipped: {}, errors: {}",
                report.timed_out, report.expired, report.stale, report.errors
            );
        }
        Commands::GenConfig => print!("{}", config.to_toml()?),
    }

    Ok(())
}

/// One-based page header; `page` comes straight from the command line.
fn page_banner(page: u32, total_pages: u32, total_elements: u64) -> String {
    format!(
        "Page {} of {} ({} records total)",
        u64::from(page) + 1,
        total_pages.max(1),
        total_elements
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_banner_last_page_index() {
        assert_eq!(page_banner(0, 0, 0), "Page 1 of 1 (0 records total)");
        assert_eq!(
            page_banner(u32::MAX, 3, 25),
            "Page 4294967296 of 3 (25 records total)"
        );
    }
}
