// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions for the RPC REST API.

use crate::handlers;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// RPC API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rpc/oneway/:device_id", post(handlers::submit_oneway))
        .route("/api/rpc/twoway/:device_id", post(handlers::submit_twoway))
        .route(
            "/api/rpc/persistent/:rpc_id",
            get(handlers::get_rpc).delete(handlers::delete_rpc),
        )
        .route(
            "/api/rpc/persistent/device/:device_id",
            get(handlers::list_device_rpcs),
        )
        .route("/api/rpc/info", get(handlers::info))
}

#[cfg(test)]
mod tests {
    use crate::{build_router, AppState};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use devrpc::{LoopbackTransport, RpcService, ServiceConfig, SqliteStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        let service = RpcService::new(
            ServiceConfig::default(),
            Arc::new(SqliteStore::new_in_memory().expect("store")),
            Arc::new(LoopbackTransport::new()),
        )
        .expect("service");
        build_router(Arc::new(AppState { service }))
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        tenant: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", tenant)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .expect("valid request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    fn gpio() -> Value {
        json!({
            "method": "setGpio",
            "params": {"pin": 7, "value": 1},
            "persistent": true,
            "timeout": 5000
        })
    }

    #[tokio::test]
    async fn test_submit_get_delete_flow() {
        let app = app();
        let tenant = Uuid::new_v4().to_string();
        let device = Uuid::new_v4().to_string();

        let (status, created) = call(
            &app,
            "POST",
            &format!("/api/rpc/oneway/{}", device),
            &tenant,
            Some(gpio()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rpc_id = created["rpcId"].as_str().expect("rpcId").to_string();

        let uri = format!("/api/rpc/persistent/{}", rpc_id);
        let (status, rpc) = call(&app, "GET", &uri, &tenant, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rpc["deviceId"], json!(device));
        assert_eq!(rpc["status"], json!("QUEUED"));

        let (status, _) = call(&app, "DELETE", &uri, &tenant, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, error) = call(&app, "GET", &uri, &tenant, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error["status"], json!(404));

        let (status, _) = call(&app, "DELETE", &uri, &tenant, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_by_device_with_status_filter() {
        let app = app();
        let tenant = Uuid::new_v4().to_string();
        let device = Uuid::new_v4().to_string();

        let (_, created) = call(
            &app,
            "POST",
            &format!("/api/rpc/twoway/{}", device),
            &tenant,
            Some(gpio()),
        )
        .await;
        let rpc_id = created["rpcId"].clone();

        let queued_uri = format!(
            "/api/rpc/persistent/device/{}?page=0&pageSize={}&rpcStatus=QUEUED",
            device,
            i32::MAX
        );
        let (status, page) = call(&app, "GET", &queued_uri, &tenant, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"][0]["id"], rpc_id);
        assert_eq!(page["totalElements"], json!(1));

        let deleted_uri = format!(
            "/api/rpc/persistent/device/{}?page=0&pageSize=10&rpcStatus=DELETED",
            device
        );
        let (status, page) = call(&app, "GET", &deleted_uri, &tenant, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"], json!([]));
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = app();
        let tenant = Uuid::new_v4().to_string();
        let device = Uuid::new_v4().to_string();

        let (status, error) = call(
            &app,
            "POST",
            &format!("/api/rpc/oneway/{}", device),
            &tenant,
            Some(json!({"params": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["status"], json!(400));

        let (status, _) = call(&app, "GET", "/api/rpc/persistent/not-a-uuid", &tenant, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/rpc/persistent/device/{}?pageSize=0", device);
        let (status, _) = call(&app, "GET", &uri, &tenant, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/rpc/persistent/device/{}?pageSize=5&rpcStatus=BOGUS", device);
        let (status, _) = call(&app, "GET", &uri, &tenant, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_running_gateway_echoes_twoway_response() {
        let service = RpcService::new(
            ServiceConfig::default(),
            Arc::new(SqliteStore::new_in_memory().expect("store")),
            Arc::new(LoopbackTransport::new()),
        )
        .expect("service");
        service.start().expect("start");
        let state = Arc::new(AppState { service });
        let app = build_router(Arc::clone(&state));
        let tenant = Uuid::new_v4().to_string();

        let (_, created) = call(
            &app,
            "POST",
            &format!("/api/rpc/twoway/{}", Uuid::new_v4()),
            &tenant,
            Some(gpio()),
        )
        .await;
        let uri = format!("/api/rpc/persistent/{}", created["rpcId"].as_str().expect("rpcId"));

        let mut rpc = Value::Null;
        for _ in 0..100 {
            rpc = call(&app, "GET", &uri, &tenant, None).await.1;
            if rpc["status"] == json!("SUCCESSFUL") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rpc["status"], json!("SUCCESSFUL"));
        assert_eq!(rpc["response"], json!({"pin": 7, "value": 1}));

        state.service.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_other_tenant_gets_not_found() {
        let app = app();
        let device = Uuid::new_v4().to_string();

        let (_, created) = call(
            &app,
            "POST",
            &format!("/api/rpc/oneway/{}", device),
            &Uuid::new_v4().to_string(),
            Some(gpio()),
        )
        .await;
        let uri = format!("/api/rpc/persistent/{}", created["rpcId"].as_str().expect("rpcId"));

        let (status, _) = call(&app, "GET", &uri, &Uuid::new_v4().to_string(), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
