// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC service configuration
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.

use crate::types::MAX_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// RPC service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Timeout applied when a submit call does not specify one (ms)
    pub default_timeout_ms: u64,

    /// Expiry scan period (ms)
    pub tick_interval_ms: u64,

    /// Extra time a delivered twoway call may wait for its response
    /// after `expiration_time` before it is marked EXPIRED (ms)
    pub expiry_grace_ms: u64,

    /// Capacity of the submit -> dispatcher queue
    pub dispatch_queue_capacity: usize,

    /// Capacity of the transport -> dispatcher event queue
    pub event_queue_capacity: usize,

    /// SQLite database path
    pub db_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
            expiry_grace_ms: 30_000,
            dispatch_queue_capacity: 1024,
            event_queue_capacity: 1024,
            db_path: "devrpc.db".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create a new config builder
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text. Missing keys take defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML (used by `devrpc gen-config`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.default_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "default_timeout_ms must not exceed {}",
                MAX_TIMEOUT_MS
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }
        if self.dispatch_queue_capacity == 0 || self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be greater than zero".into(),
            ));
        }
        if self.db_path.is_empty() {
            return Err(ConfigError::Invalid("db_path is empty".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    default_timeout_ms: Option<u64>,
    tick_interval_ms: Option<u64>,
    expiry_grace_ms: Option<u64>,
    dispatch_queue_capacity: Option<usize>,
    event_queue_capacity: Option<usize>,
    db_path: Option<String>,
}

impl ServiceConfigBuilder {
    /// Set default RPC timeout (ms)
    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = Some(ms);
        self
    }

    /// Set expiry scan period (ms)
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = Some(ms);
        self
    }

    /// Set twoway response grace window (ms)
    pub fn expiry_grace_ms(mut self, ms: u64) -> Self {
        self.expiry_grace_ms = Some(ms);
        self
    }

    /// Set submit queue capacity
    pub fn dispatch_queue_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_queue_capacity = Some(capacity);
        self
    }

    /// Set transport event queue capacity
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = Some(capacity);
        self
    }

    /// Set SQLite database path
    pub fn db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServiceConfig {
        let defaults = ServiceConfig::default();

        ServiceConfig {
            default_timeout_ms: self
                .default_timeout_ms
                .unwrap_or(defaults.default_timeout_ms),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(defaults.tick_interval_ms),
            expiry_grace_ms: self.expiry_grace_ms.unwrap_or(defaults.expiry_grace_ms),
            dispatch_queue_capacity: self
                .dispatch_queue_capacity
                .unwrap_or(defaults.dispatch_queue_capacity),
            event_queue_capacity: self
                .event_queue_capacity
                .unwrap_or(defaults.event_queue_capacity),
            db_path: self.db_path.unwrap_or(defaults.db_path),
        }
    }
}
