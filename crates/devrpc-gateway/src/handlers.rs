// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the RPC REST API.

use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use devrpc::{
    DeviceId, PageData, PageLink, Rpc, RpcError, RpcId, RpcStatus, SubmitRequest, TenantId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the caller's tenant (authentication happens upstream)
pub const TENANT_HEADER: &str = "x-tenant-id";

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        let status = match err {
            RpcError::NotFound(_) => StatusCode::NOT_FOUND,
            RpcError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RpcError::Conflict(_) => StatusCode::CONFLICT,
            RpcError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

fn tenant(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    let value = headers
        .get(TENANT_HEADER)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing X-Tenant-Id header"))?;
    let text = value
        .to_str()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "malformed X-Tenant-Id header"))?;
    Ok(text.parse()?)
}

/// Submit response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub rpc_id: RpcId,
}

/// Device listing query string
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub page: u32,
    pub page_size: u32,
    pub rpc_status: Option<String>,
}

/// POST /api/rpc/oneway/:device_id
pub async fn submit_oneway(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let tenant_id = tenant(&headers)?;
    let device_id: DeviceId = device_id.parse()?;
    let Json(request) = body?;

    let rpc_id = state.service.submit_oneway(tenant_id, device_id, request)?;
    Ok(Json(SubmitResponse { rpc_id }))
}

/// POST /api/rpc/twoway/:device_id
pub async fn submit_twoway(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let tenant_id = tenant(&headers)?;
    let device_id: DeviceId = device_id.parse()?;
    let Json(request) = body?;

    let rpc_id = state.service.submit_twoway(tenant_id, device_id, request)?;
    Ok(Json(SubmitResponse { rpc_id }))
}

/// GET /api/rpc/persistent/:rpc_id
pub async fn get_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(rpc_id): Path<String>,
) -> Result<Json<Rpc>, ApiError> {
    let tenant_id = tenant(&headers)?;
    let rpc_id: RpcId = rpc_id.parse()?;

    Ok(Json(state.service.query().get(&tenant_id, &rpc_id)?))
}

/// DELETE /api/rpc/persistent/:rpc_id
pub async fn delete_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(rpc_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = tenant(&headers)?;
    let rpc_id: RpcId = rpc_id.parse()?;

    state.service.query().delete(&tenant_id, &rpc_id)?;
    Ok(StatusCode::OK)
}

/// GET /api/rpc/persistent/device/:device_id?page&pageSize&rpcStatus
pub async fn list_device_rpcs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<PageData<Rpc>>, ApiError> {
    let tenant_id = tenant(&headers)?;
    let device_id: DeviceId = device_id.parse()?;
    let Query(params) = params?;

    let status = params
        .rpc_status
        .as_deref()
        .map(str::parse::<RpcStatus>)
        .transpose()?;
    let page = PageLink::new(params.page, params.page_size);

    Ok(Json(state.service.query().list_by_device(
        &tenant_id, &device_id, status, page,
    )?))
}

/// GET /api/rpc/info - Gateway info
pub async fn info() -> Response {
    let info = json!({
        "name": "devrpc-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /api/rpc/oneway/{deviceId}",
            "POST /api/rpc/twoway/{deviceId}",
            "GET /api/rpc/persistent/{rpcId}",
            "DELETE /api/rpc/persistent/{rpcId}",
            "GET /api/rpc/persistent/device/{deviceId}"
        ]
    });

    (StatusCode::OK, Json(info)).into_response()
}
