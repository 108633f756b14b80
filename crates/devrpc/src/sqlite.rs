// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite RPC backend
//!
//! Durable storage for RPC records with per-record compare-and-swap status
//! updates.

use crate::error::{RpcError, RpcResult};
use crate::state::RpcStateMachine;
use crate::store::{validate_new, RpcStore, StoreStats};
use crate::types::{DeviceId, PageData, PageLink, Rpc, RpcId, RpcStatus, TenantId};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::Value;
use std::str::FromStr;

const COLUMNS: &str = "id, tenant_id, device_id, method, params, kind, persistent, timeout_ms, \
                       status, created_time, expiration_time, response";

/// SQLite RPC store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync). The mutex
/// also serializes the read-check-write of a status update, so racing
/// writers on one record resolve first-writer-wins.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE rpc (
///     id TEXT PRIMARY KEY,
///     tenant_id TEXT NOT NULL,
///     device_id TEXT NOT NULL,
///     method TEXT NOT NULL,
///     params TEXT NOT NULL,
///     kind TEXT NOT NULL,
///     persistent INTEGER NOT NULL,
///     timeout_ms INTEGER NOT NULL,
///     status TEXT NOT NULL,
///     created_time INTEGER NOT NULL,
///     expiration_time INTEGER NOT NULL,
///     response TEXT
/// );
/// CREATE INDEX idx_rpc_device ON rpc(tenant_id, device_id, status, created_time);
/// CREATE INDEX idx_rpc_tenant ON rpc(tenant_id, status, created_time);
/// CREATE INDEX idx_rpc_expiration ON rpc(status, expiration_time);
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store with a file-based database
    pub fn new(path: &str) -> RpcResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            RpcError::Storage(format!("Failed to open SQLite database at {}: {}", path, e))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn new_in_memory() -> RpcResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RpcError::Storage(format!("Failed to create in-memory SQLite database: {}", e))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> RpcResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rpc (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                method TEXT NOT NULL,
                params TEXT NOT NULL,
                kind TEXT NOT NULL,
                persistent INTEGER NOT NULL,
                timeout_ms INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_time INTEGER NOT NULL,
                expiration_time INTEGER NOT NULL,
                response TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rpc_device
             ON rpc(tenant_id, device_id, status, created_time)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rpc_tenant ON rpc(tenant_id, status, created_time)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rpc_expiration ON rpc(status, expiration_time)",
            [],
        )?;

        Ok(())
    }

    /// Helper function to map a row to an Rpc
    fn row_to_rpc(row: &Row) -> rusqlite::Result<Rpc> {
        let params: String = row.get(4)?;
        let response: Option<String> = row.get(11)?;

        Ok(Rpc {
            id: parse_column(row, 0)?,
            tenant_id: parse_column(row, 1)?,
            device_id: parse_column(row, 2)?,
            method: row.get(3)?,
            params: json_column(4, &params)?,
            kind: parse_column(row, 5)?,
            persistent: row.get(6)?,
            timeout_ms: u64_column(row, 7)?,
            status: parse_column(row, 8)?,
            created_time: u64_column(row, 9)?,
            expiration_time: u64_column(row, 10)?,
            response: response
                .map(|text| json_column(11, &text))
                .transpose()?,
        })
    }

    fn select_one(conn: &Connection, id: &RpcId) -> RpcResult<Option<Rpc>> {
        let rpc = conn
            .query_row(
                &format!("SELECT {} FROM rpc WHERE id = ?1", COLUMNS),
                [id.to_string()],
                Self::row_to_rpc,
            )
            .optional()?;
        Ok(rpc)
    }

    /// Read, validate and write one status change inside a transaction.
    fn transition(
        &self,
        tenant_id: Option<&TenantId>,
        id: &RpcId,
        status: RpcStatus,
        response: Option<Value>,
    ) -> RpcResult<Rpc> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut rpc = Self::select_one(&tx, id)?
            .filter(|rpc| tenant_id.map_or(true, |tenant| rpc.tenant_id == *tenant))
            .ok_or_else(|| RpcError::not_found(id))?;

        if status == RpcStatus::Deleted && rpc.status == RpcStatus::Deleted {
            return Err(RpcError::not_found(id));
        }

        let change = RpcStateMachine::transition(
            rpc.kind,
            rpc.status,
            status,
            response,
            rpc.response.take(),
        )?;
        let response_text = change
            .response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Guarded on the status we validated against
        let changed = tx.execute(
            "UPDATE rpc SET status = ?1, response = ?2 WHERE id = ?3 AND status = ?4",
            params![
                status.as_str(),
                response_text,
                id.to_string(),
                rpc.status.as_str()
            ],
        )?;
        if changed != 1 {
            return Err(RpcError::InvalidState {
                from: rpc.status,
                to: status,
            });
        }
        tx.commit()?;

        rpc.status = change.to;
        rpc.response = change.response;
        Ok(rpc)
    }

    /// Count + page query sharing one WHERE clause.
    fn list_where(
        &self,
        mut clause: String,
        mut args: Vec<SqlValue>,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>> {
        page.validate()?;

        match status {
            Some(status) => {
                args.push(SqlValue::Text(status.as_str().to_string()));
                clause.push_str(&format!(" AND status = ?{}", args.len()));
            }
            None => clause.push_str(" AND status != 'DELETED'"),
        }

        let conn = self.conn.lock();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM rpc WHERE {}", clause),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let limit = i64::from(page.page_size);
        let offset = page.offset().min(i64::MAX as u64) as i64;
        args.push(SqlValue::Integer(limit));
        args.push(SqlValue::Integer(offset));
        let query = format!(
            "SELECT {} FROM rpc WHERE {} ORDER BY created_time ASC, id ASC LIMIT ?{} OFFSET ?{}",
            COLUMNS,
            clause,
            args.len() - 1,
            args.len()
        );

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), Self::row_to_rpc)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageData::new(rows, total.max(0) as u64, page))
    }
}

fn parse_column<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn u64_column(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// INTEGER columns are signed; refuse values SQLite cannot hold.
fn to_sql_int(field: &str, value: u64) -> RpcResult<i64> {
    i64::try_from(value)
        .map_err(|_| RpcError::InvalidArgument(format!("{} out of range: {}", field, value)))
}

fn json_column(idx: usize, text: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl RpcStore for SqliteStore {
    fn insert(&self, rpc: &Rpc) -> RpcResult<RpcId> {
        validate_new(rpc)?;
        let timeout_ms = to_sql_int("timeout", rpc.timeout_ms)?;
        let created_time = to_sql_int("createdTime", rpc.created_time)?;
        let expiration_time = to_sql_int("expirationTime", rpc.expiration_time)?;

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO rpc (id, tenant_id, device_id, method, params, kind, persistent,
                              timeout_ms, status, created_time, expiration_time, response)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)",
            params![
                rpc.id.to_string(),
                rpc.tenant_id.to_string(),
                rpc.device_id.to_string(),
                rpc.method,
                serde_json::to_string(&rpc.params)?,
                rpc.kind.as_str(),
                rpc.persistent,
                timeout_ms,
                rpc.status.as_str(),
                created_time,
                expiration_time,
            ],
        );

        match result {
            Ok(_) => Ok(rpc.id),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(RpcError::Conflict(rpc.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_by_id(&self, tenant_id: &TenantId, id: &RpcId) -> RpcResult<Rpc> {
        let conn = self.conn.lock();
        Self::select_one(&conn, id)?
            .filter(|rpc| rpc.tenant_id == *tenant_id)
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
        self.list_where(
            "tenant_id = ?1 AND device_id = ?2".to_string(),
            vec![
                SqlValue::Text(tenant_id.to_string()),
                SqlValue::Text(device_id.to_string()),
            ],
            status,
            page,
        )
    }

    fn list_by_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RpcStatus>,
        page: PageLink,
    ) -> RpcResult<PageData<Rpc>> {
        self.list_where(
            "tenant_id = ?1".to_string(),
            vec![SqlValue::Text(tenant_id.to_string())],
            status,
            page,
        )
    }

    fn list_pending(&self, before_expiration: u64) -> RpcResult<Vec<Rpc>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rpc
             WHERE expiration_time <= ?1
             AND (status IN ('QUEUED', 'SENT') OR (status = 'DELIVERED' AND kind = 'TWO_WAY'))
             ORDER BY expiration_time ASC, id ASC",
            COLUMNS
        ))?;

        let before = before_expiration.min(i64::MAX as u64) as i64;
        let rpcs = stmt
            .query_map([before], Self::row_to_rpc)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rpcs)
    }

    fn list_undispatched(&self, created_before: u64, expires_after: u64) -> RpcResult<Vec<Rpc>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rpc
             WHERE status = 'QUEUED' AND created_time <= ?1 AND expiration_time > ?2
             ORDER BY created_time ASC, id ASC",
            COLUMNS
        ))?;

        let created_before = created_before.min(i64::MAX as u64) as i64;
        let expires_after = expires_after.min(i64::MAX as u64) as i64;
        let rpcs = stmt
            .query_map([created_before, expires_after], Self::row_to_rpc)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rpcs)
    }

    fn list_queued_for_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> RpcResult<Vec<Rpc>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rpc
             WHERE tenant_id = ?1 AND device_id = ?2 AND persistent = 1
             AND status IN ('QUEUED', 'SENT')
             ORDER BY created_time ASC, id ASC",
            COLUMNS
        ))?;

        let rpcs = stmt
            .query_map(
                [tenant_id.to_string(), device_id.to_string()],
                Self::row_to_rpc,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rpcs)
    }

    fn stats(&self) -> RpcResult<StoreStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM rpc GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                let status = parse_column::<RpcStatus>(row, 0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = StoreStats::default();
        for (status, count) in rows {
            stats.total += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }
}
