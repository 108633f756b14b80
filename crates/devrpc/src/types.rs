// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core RPC record types.
//!
//! An [`Rpc`] is one command addressed to one device. Identity, ownership,
//! method, params and expiration are fixed when the record is created; only
//! `status` and `response` change afterwards.

use crate::error::{RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// True for the all-zero UUID
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = RpcError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    RpcError::InvalidArgument(format!(
                        "invalid {} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Globally unique RPC identifier, assigned once at creation
    RpcId
);
uuid_id!(
    /// Opaque owning tenant
    TenantId
);
uuid_id!(
    /// Opaque target device
    DeviceId
);

impl RpcId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RpcId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcStatus {
    Queued,
    Sent,
    Delivered,
    Successful,
    Timeout,
    Expired,
    Failed,
    Deleted,
}

impl RpcStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [RpcStatus; 8] = [
        Self::Queued,
        Self::Sent,
        Self::Delivered,
        Self::Successful,
        Self::Timeout,
        Self::Expired,
        Self::Failed,
        Self::Deleted,
    ];

    /// Wire/storage name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Successful => "SUCCESSFUL",
            Self::Timeout => "TIMEOUT",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
        }
    }

    /// Whether no further transition (other than delete) is allowed.
    ///
    /// `DELIVERED` ends a oneway call but a twoway call still waits for
    /// the device response.
    pub fn is_terminal(self, kind: RpcKind) -> bool {
        match self {
            Self::Queued | Self::Sent => false,
            Self::Delivered => kind == RpcKind::OneWay,
            Self::Successful | Self::Timeout | Self::Expired | Self::Failed | Self::Deleted => true,
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpcStatus {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| RpcError::InvalidArgument(format!("unknown RPC status '{}'", s)))
    }
}

/// Whether an application response is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcKind {
    /// Ends at confirmed transport delivery
    OneWay,
    /// Waits for a response correlated by RPC id
    TwoWay,
}

impl RpcKind {
    /// Wire/storage name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneWay => "ONE_WAY",
            Self::TwoWay => "TWO_WAY",
        }
    }
}

impl fmt::Display for RpcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpcKind {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONE_WAY" => Ok(Self::OneWay),
            "TWO_WAY" => Ok(Self::TwoWay),
            other => Err(RpcError::InvalidArgument(format!(
                "unknown RPC kind '{}'",
                other
            ))),
        }
    }
}

/// Longest accepted RPC timeout (one year, in ms).
pub const MAX_TIMEOUT_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Body of a submit call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Remote operation name
    #[serde(default)]
    pub method: String,

    /// Opaque parameters document
    #[serde(default = "empty_params")]
    pub params: Value,

    /// Keep the record for redelivery across device reconnects
    #[serde(default)]
    pub persistent: bool,

    /// Timeout in milliseconds (None = service default)
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl SubmitRequest {
    /// Create a request with empty params and the default timeout
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: empty_params(),
            persistent: false,
            timeout: None,
        }
    }

    /// Set params
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Set persistence
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set timeout in milliseconds
    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reject requests the engine cannot queue.
    pub fn validate(&self) -> RpcResult<()> {
        if self.method.trim().is_empty() {
            return Err(RpcError::InvalidArgument("method is required".into()));
        }
        match self.timeout {
            Some(0) => {
                return Err(RpcError::InvalidArgument(
                    "timeout must be greater than zero".into(),
                ));
            }
            Some(timeout) if timeout > MAX_TIMEOUT_MS => {
                return Err(RpcError::InvalidArgument(format!(
                    "timeout must not exceed {} ms",
                    MAX_TIMEOUT_MS
                )));
            }
            _ => {}
        }
        if matches!(self.params, Value::Bool(_) | Value::Number(_)) {
            return Err(RpcError::InvalidArgument(
                "params must be an object, array, string or null".into(),
            ));
        }
        Ok(())
    }
}

/// A device RPC record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rpc {
    pub id: RpcId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub method: String,
    pub params: Value,
    pub kind: RpcKind,
    pub persistent: bool,

    /// Timeout in milliseconds
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,

    pub status: RpcStatus,

    /// Creation time (Unix milliseconds)
    pub created_time: u64,

    /// `created_time + timeout_ms`, fixed at creation
    pub expiration_time: u64,

    /// Device response, set only on SUCCESSFUL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Rpc {
    /// Create a QUEUED record stamped with the current time
    pub fn new(
        tenant_id: TenantId,
        device_id: DeviceId,
        kind: RpcKind,
        request: SubmitRequest,
        default_timeout_ms: u64,
    ) -> Self {
        Self::new_at(
            tenant_id,
            device_id,
            kind,
            request,
            default_timeout_ms,
            now_ms(),
        )
    }

    /// Create a QUEUED record with an explicit creation time
    pub fn new_at(
        tenant_id: TenantId,
        device_id: DeviceId,
        kind: RpcKind,
        request: SubmitRequest,
        default_timeout_ms: u64,
        created_time: u64,
    ) -> Self {
        let timeout_ms = request.timeout.unwrap_or(default_timeout_ms);
        let params = if request.params.is_null() {
            empty_params()
        } else {
            request.params
        };

        Self {
            id: RpcId::new(),
            tenant_id,
            device_id,
            method: request.method,
            params,
            kind,
            persistent: request.persistent,
            timeout_ms,
            status: RpcStatus::Queued,
            created_time,
            expiration_time: created_time.saturating_add(timeout_ms),
            response: None,
        }
    }

}

/// Page request: 0-based page index and page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    pub page: u32,
    pub page_size: u32,
}

impl PageLink {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Everything in one page
    pub fn all() -> Self {
        Self::new(0, u32::MAX)
    }

    pub fn validate(&self) -> RpcResult<()> {
        if self.page_size == 0 {
            return Err(RpcError::InvalidArgument(
                "pageSize must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Number of rows to skip
    pub fn offset(&self) -> u64 {
        u64::from(self.page).saturating_mul(u64::from(self.page_size))
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    pub data: Vec<T>,
    pub total_pages: u32,
    pub total_elements: u64,
    pub has_next: bool,
}

impl<T> PageData<T> {
    /// Build a page from its rows and the total number of matching rows
    pub fn new(data: Vec<T>, total_elements: u64, link: PageLink) -> Self {
        let size = u64::from(link.page_size.max(1));
        let total_pages = total_elements.div_ceil(size).min(u64::from(u32::MAX)) as u32;
        let has_next = link.offset().saturating_add(size) < total_elements;

        Self {
            data,
            total_pages,
            total_elements,
            has_next,
        }
    }

    /// Slice an already filtered and ordered result set
    pub fn from_sorted(all: Vec<T>, link: PageLink) -> Self {
        let total = all.len() as u64;
        let offset = usize::try_from(link.offset()).unwrap_or(usize::MAX);
        let limit = link.page_size as usize;
        let data = all.into_iter().skip(offset).take(limit).collect();
        Self::new(data, total, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gpio_request() -> SubmitRequest {
        SubmitRequest::new("setGpio")
            .params(json!({"pin": 7, "value": 1}))
            .persistent(true)
            .timeout_ms(5000)
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in RpcStatus::ALL {
            assert_eq!(status.as_str().parse::<RpcStatus>().unwrap(), status);
        }
        assert_eq!("deleted".parse::<RpcStatus>().unwrap(), RpcStatus::Deleted);
        assert!("BOGUS".parse::<RpcStatus>().is_err());
    }

    #[test]
    fn test_delivered_terminal_only_for_oneway() {
        assert!(RpcStatus::Delivered.is_terminal(RpcKind::OneWay));
        assert!(!RpcStatus::Delivered.is_terminal(RpcKind::TwoWay));
        assert!(!RpcStatus::Queued.is_terminal(RpcKind::OneWay));
        assert!(RpcStatus::Deleted.is_terminal(RpcKind::TwoWay));
    }

    #[test]
    fn test_rpc_expiration_fixed_at_creation() {
        let rpc = Rpc::new_at(
            TenantId::from_uuid(Uuid::new_v4()),
            DeviceId::from_uuid(Uuid::new_v4()),
            RpcKind::OneWay,
            gpio_request(),
            10_000,
            1_000,
        );

        assert_eq!(rpc.status, RpcStatus::Queued);
        assert_eq!(rpc.timeout_ms, 5000);
        assert_eq!(rpc.expiration_time, 6_000);
        assert!(rpc.persistent);
    }

    #[test]
    fn test_default_timeout_and_null_params() {
        let request = SubmitRequest::new("reboot").params(Value::Null);
        let rpc = Rpc::new_at(
            TenantId::from_uuid(Uuid::new_v4()),
            DeviceId::from_uuid(Uuid::new_v4()),
            RpcKind::TwoWay,
            request,
            10_000,
            0,
        );
        assert_eq!(rpc.timeout_ms, 10_000);
        assert_eq!(rpc.params, json!({}));
    }

    #[test]
    fn test_submit_request_validation() {
        assert!(gpio_request().validate().is_ok());
        assert!(SubmitRequest::new("  ").validate().is_err());
        assert!(SubmitRequest::new("m").timeout_ms(0).validate().is_err());
        assert!(SubmitRequest::new("m").params(json!(42)).validate().is_err());
        assert!(SubmitRequest::new("m")
            .timeout_ms(MAX_TIMEOUT_MS)
            .validate()
            .is_ok());
        assert!(matches!(
            SubmitRequest::new("m").timeout_ms(u64::MAX).validate(),
            Err(RpcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_submit_request_from_json_body() {
        let body = r#"{"method":"setGpio","params":{"pin":7,"value":1},
                       "persistent":true,"timeout":5000}"#;
        let request: SubmitRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request, gpio_request());

        let missing: SubmitRequest = serde_json::from_str("{}").unwrap();
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_rpc_json_shape() {
        let rpc = Rpc::new_at(
            TenantId::from_uuid(Uuid::new_v4()),
            DeviceId::from_uuid(Uuid::new_v4()),
            RpcKind::OneWay,
            gpio_request(),
            10_000,
            0,
        );
        let json = serde_json::to_value(&rpc).unwrap();
        assert_eq!(json["deviceId"], json!(rpc.device_id.to_string()));
        assert_eq!(json["status"], json!("QUEUED"));
        assert_eq!(json["timeout"], json!(5000));
        assert!(json.get("response").is_none());
    }

    #[test]
    fn test_page_data_math() {
        let page = PageData::from_sorted((0..10).collect::<Vec<_>>(), PageLink::new(1, 4));
        assert_eq!(page.data, vec![4, 5, 6, 7]);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_elements, 10);
        assert!(page.has_next);

        let last = PageData::from_sorted((0..10).collect::<Vec<_>>(), PageLink::new(2, 4));
        assert_eq!(last.data, vec![8, 9]);
        assert!(!last.has_next);

        let all = PageData::from_sorted((0..3).collect::<Vec<_>>(), PageLink::all());
        assert_eq!(all.data.len(), 3);
        assert_eq!(all.total_pages, 1);
        assert!(!all.has_next);
    }

    #[test]
    fn test_page_link_validation() {
        assert!(PageLink::new(0, 0).validate().is_err());
        assert_eq!(
            PageLink::new(u32::MAX, u32::MAX).offset(),
            u64::from(u32::MAX) * u64::from(u32::MAX)
        );
    }
}
