//! Thin HTTP surface over the core: one handler per endpoint, each doing
//! argument extraction and response shaping only — every actual mutation
//! goes through the `add_*`/`remove_*`/`spawn_ap` functions in the parent
//! module. Modeled on the dashboard route handlers' style:
//! `State<Arc<AppState>>` extraction, `impl IntoResponse` returns, JSON
//! bodies via `serde_json::json!` for ad hoc shapes and typed structs for
//! the rest.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::address::Address;
use crate::error::ApiError;

use super::tree::{ApState, HubState, SimulatorRoot};
use super::{add_hub, add_network, remove_hub, remove_network, spawn_ap, AppState, CreateApParams, CreateHubParams, CreateNetworkParams};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/network/", post(create_network).get(list_networks))
        .route("/network/{n}", get(get_network).delete(delete_network))
        .route("/network/{n}/hub/", post(create_hub))
        .route("/network/{n}/hub/{h}", get(get_hub).delete(delete_hub))
        .route("/network/{n}/hub/{h}/ap/", post(create_ap))
        .route("/network/{n}/hub/{h}/ap/{a}", get(get_ap).delete(delete_ap))
        .route("/metrics", get(metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct NetworkRead {
    address: Address,
    csi: String,
    csni: String,
    state: &'static str,
}

#[derive(Serialize)]
struct HubRead {
    address: Address,
    auid: String,
    state: &'static str,
}

#[derive(Serialize)]
struct ApRead {
    address: Address,
    auid: String,
    state: &'static str,
}

fn hub_state_label(s: &HubState) -> &'static str {
    match s {
        HubState::Unregistered => "unregistered",
        HubState::Registered => "registered",
    }
}

fn ap_state_label(s: &ApState) -> &'static str {
    match s {
        ApState::Unregistered => "unregistered",
        ApState::Registered => "registered",
        ApState::RegistrationFailed => "registration_failed",
    }
}

fn render_network(tree: &SimulatorRoot, idx: u32) -> Option<NetworkRead> {
    let network = tree.network(idx)?;
    Some(NetworkRead {
        address: network.address.clone(),
        csi: network.csi.clone(),
        csni: network.csni.clone(),
        // A network has no registration state of its own distinct from its
        // having been accepted by the NMS, which is a precondition of it
        // existing in the tree at all.
        state: "registered",
    })
}

fn render_hub(tree: &SimulatorRoot, address: &Address) -> Option<HubRead> {
    let hub = tree.hub(address)?;
    Some(HubRead {
        address: hub.address.clone(),
        auid: hub.auid.clone(),
        state: hub_state_label(&hub.state),
    })
}

fn render_ap(tree: &SimulatorRoot, address: &Address) -> Option<ApRead> {
    let ap = tree.ap(address)?;
    Some(ApRead {
        address: ap.address.clone(),
        auid: ap.auid.clone(),
        state: ap_state_label(&ap.state),
    })
}

#[derive(Deserialize)]
struct NetworkCreateRequest {
    csi: Option<String>,
    email_domain: String,
    #[serde(default)]
    hubs: u32,
    #[serde(default)]
    aps_per_hub: u32,
    ap_heartbeat_seconds: Option<u64>,
    #[serde(default)]
    rts_per_ap: u32,
    rt_heartbeat_seconds: Option<u64>,
    index: Option<u32>,
}

async fn create_network(State(state): State<Arc<AppState>>, Json(req): Json<NetworkCreateRequest>) -> Result<impl IntoResponse, ApiError> {
    let default_heartbeat = state.settings.default_heartbeat_seconds;
    let params = CreateNetworkParams {
        csi: req.csi.unwrap_or_else(|| state.settings.csi.clone()),
        email_domain: req.email_domain,
        hubs: req.hubs,
        aps_per_hub: req.aps_per_hub,
        ap_heartbeat_seconds: req.ap_heartbeat_seconds.unwrap_or(default_heartbeat),
        rts_per_ap: req.rts_per_ap,
        rt_heartbeat_seconds: req.rt_heartbeat_seconds.unwrap_or(default_heartbeat),
        index: req.index,
    };
    let idx = add_network(&state, params).await?;
    let body = {
        let tree = state.tree.lock().await;
        render_network(&tree, idx).ok_or_else(|| ApiError::NotFound(format!("network {idx}")))?
    };
    Ok((StatusCode::CREATED, Json(body)))
}

async fn list_networks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tree = state.tree.lock().await;
    let map: BTreeMap<u32, NetworkRead> = tree
        .networks
        .keys()
        .filter_map(|&idx| render_network(&tree, idx).map(|n| (idx, n)))
        .collect();
    Json(map)
}

async fn get_network(State(state): State<Arc<AppState>>, AxumPath(n): AxumPath<u32>) -> Result<impl IntoResponse, ApiError> {
    let tree = state.tree.lock().await;
    render_network(&tree, n)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("network {n}")))
}

async fn delete_network(State(state): State<Arc<AppState>>, AxumPath(n): AxumPath<u32>) -> Result<impl IntoResponse, ApiError> {
    remove_network(&state, n).await?;
    Ok(Json(serde_json::json!({ "message": format!("network {n} removed") })))
}

#[derive(Deserialize)]
struct HubCreateRequest {
    #[serde(default)]
    num_aps: u32,
    ap_heartbeat_seconds: Option<u64>,
    #[serde(default)]
    num_rts_per_ap: u32,
    rt_heartbeat_seconds: Option<u64>,
    index: Option<u32>,
}

async fn create_hub(
    State(state): State<Arc<AppState>>,
    AxumPath(n): AxumPath<u32>,
    Json(req): Json<HubCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let default_heartbeat = state.settings.default_heartbeat_seconds;
    let params = CreateHubParams {
        num_aps: req.num_aps,
        ap_heartbeat_seconds: req.ap_heartbeat_seconds.unwrap_or(default_heartbeat),
        num_rts_per_ap: req.num_rts_per_ap,
        rt_heartbeat_seconds: req.rt_heartbeat_seconds.unwrap_or(default_heartbeat),
        index: req.index,
    };
    let hub_idx = add_hub(&state, n, params).await?;
    let address = Address::hub(n, hub_idx);
    let body = {
        let tree = state.tree.lock().await;
        render_hub(&tree, &address).ok_or_else(|| ApiError::NotFound(format!("hub {address}")))?
    };
    Ok((StatusCode::CREATED, Json(body)))
}

async fn get_hub(State(state): State<Arc<AppState>>, AxumPath((n, h)): AxumPath<(u32, u32)>) -> Result<impl IntoResponse, ApiError> {
    let tree = state.tree.lock().await;
    let address = Address::hub(n, h);
    render_hub(&tree, &address)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("hub {address}")))
}

async fn delete_hub(State(state): State<Arc<AppState>>, AxumPath((n, h)): AxumPath<(u32, u32)>) -> Result<impl IntoResponse, ApiError> {
    let address = Address::hub(n, h);
    remove_hub(&state, &address).await?;
    Ok(Json(serde_json::json!({ "message": format!("hub {address} removed") })))
}

#[derive(Deserialize)]
struct ApCreateRequest {
    #[serde(default)]
    num_rts: u32,
    heartbeat_seconds: Option<u64>,
    rt_heartbeat_seconds: Option<u64>,
    #[serde(default)]
    azimuth_deg: u32,
    index: Option<u32>,
}

async fn create_ap(
    State(state): State<Arc<AppState>>,
    AxumPath((n, h)): AxumPath<(u32, u32)>,
    Json(req): Json<ApCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let default_heartbeat = state.settings.default_heartbeat_seconds;
    let hub_address = Address::hub(n, h);
    let params = CreateApParams {
        heartbeat_seconds: req.heartbeat_seconds.unwrap_or(default_heartbeat),
        num_rts: req.num_rts,
        rt_heartbeat_seconds: req.rt_heartbeat_seconds.unwrap_or(default_heartbeat),
        azimuth_deg: req.azimuth_deg,
        index: req.index,
    };
    let address = spawn_ap(&state, &hub_address, params).await?;
    let body = {
        let tree = state.tree.lock().await;
        render_ap(&tree, &address).ok_or_else(|| ApiError::NotFound(format!("ap {address}")))?
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}

async fn get_ap(State(state): State<Arc<AppState>>, AxumPath((n, h, a)): AxumPath<(u32, u32, u32)>) -> Result<impl IntoResponse, ApiError> {
    let tree = state.tree.lock().await;
    let address = Address::ap(n, h, a);
    render_ap(&tree, &address)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("ap {address}")))
}

async fn delete_ap(State(state): State<Arc<AppState>>, AxumPath((n, h, a)): AxumPath<(u32, u32, u32)>) -> Result<impl IntoResponse, ApiError> {
    let address = Address::ap(n, h, a);
    let mut tree = state.tree.lock().await;
    let hub = tree.hub_mut(&Address::hub(n, h)).ok_or_else(|| ApiError::NotFound(format!("hub for ap {address}")))?;
    hub.aps.remove(&a).ok_or_else(|| ApiError::NotFound(format!("ap {address}")))?;
    Ok(Json(serde_json::json!({ "message": format!("ap {address} removed") })))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::bus::Downlink;
    use crate::config::Settings;
    use crate::nms_client::NmsClient;
    use crate::prom_metrics::Metrics;

    fn test_settings() -> Settings {
        Settings {
            app_host: "127.0.0.1".into(),
            app_port: 0,
            log_level: "info".into(),
            nbapi_url: "http://127.0.0.1:0".into(),
            sbapi_url: "http://127.0.0.1:0".into(),
            verify_ssl_cert: false,
            httpx_timeout_secs: 1,
            pub_port: 0,
            pull_port: 0,
            default_heartbeat_seconds: 30,
            default_hubs_per_network: 1,
            default_aps_per_hub: 1,
            default_rts_per_ap: 1,
            secret_key: "test-secret".into(),
            secret_key_rt: "test-secret-rt".into(),
            algorithm: "HS256".into(),
            token_expiry_seconds: 3600,
            csi: "CBNG001".into(),
            installer_key: "installer".into(),
            max_concurrent_worker_commands: 8,
            worker_httpx_poolsize: 4,
        }
    }

    async fn test_state() -> Arc<AppState> {
        let settings = test_settings();
        let nms = NmsClient::new(&(&settings).into()).unwrap();
        let downlink = Downlink::bind("127.0.0.1:0").await.unwrap();
        let metrics = Metrics::new();
        Arc::new(AppState::new(settings, nms, downlink, metrics))
    }

    #[tokio::test]
    async fn unknown_network_returns_404() {
        let state = test_state().await;
        let app = build_router(state);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/network/7").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text() {
        let state = test_state().await;
        let app = build_router(state);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!bytes.is_empty());
    }
}
