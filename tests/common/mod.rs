#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::Path;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const CSI: &str = "CBNG001";

use hubsim::bus::{Downlink, Uplink};
use hubsim::config::Settings;
use hubsim::controller::AppState;
use hubsim::nms_client::NmsClient;
use hubsim::prom_metrics::Metrics;

/// Spins up a minimal in-process HTTP server standing in for both the NMS's
/// northbound and southbound REST surfaces. Every call succeeds with a
/// canned response; nothing here is persisted or validated, since the
/// dispatcher/tree tests only care that the controller's own state updates
/// correctly once the NMS has answered.
pub async fn start_mock_nms() -> String {
    let csni_counter = Arc::new(AtomicU64::new(0));

    let app = Router::new()
        .route(
            &format!("/api/v1/network/csi/{CSI}"),
            post({
                let csni_counter = csni_counter.clone();
                move || {
                    let csni_counter = csni_counter.clone();
                    async move {
                        let n = csni_counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({ "csni": format!("CSNI_{n}") }))
                    }
                }
            }),
        )
        .route(
            "/api/v1/node/hub/{auid}",
            post(|Path(_auid): Path<String>| async { Json(json!({ "auid": "T-hub-mock" })) }),
        )
        .route(
            "/api/v1/node/ap/{auid}",
            post(|Path(_auid): Path<String>| async { Json(json!({ "auid": "T-ap-mock" })) }),
        )
        .route(
            "/api/v1/node/rt/{auid}",
            post(|Path(_auid): Path<String>| async { Json(json!({ "auid": "T-rt-mock" })) }),
        )
        .route("/ap/register_secret/", post(|| async { Json(Value::Object(Default::default())) }))
        .route("/ap/register_candidate", post(|| async { Json(Value::Object(Default::default())) }))
        .route(
            "/api/v1/{auid}/rt-registration",
            post(|Path(_auid): Path<String>| async { Json(Value::Object(Default::default())) }),
        )
        .route(
            "/api/v1/{auid}/heartbeat",
            post(|Path(_auid): Path<String>| async { Json(Value::Object(Default::default())) }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Settings pointed at a mock NMS rather than the dummy `:0` address the
/// in-crate unit tests use, so tests here can exercise real NBAPI/SBAPI
/// round-trips through [`start_mock_nms`].
pub fn test_settings(nms_url: &str) -> Settings {
    Settings {
        app_host: "127.0.0.1".into(),
        app_port: 0,
        log_level: "info".into(),
        nbapi_url: nms_url.to_string(),
        sbapi_url: nms_url.to_string(),
        verify_ssl_cert: false,
        httpx_timeout_secs: 5,
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

/// Builds a full `AppState` plus its bound uplink, both wired to loopback
/// ephemeral ports. The uplink is handed back separately (rather than
/// stashed on `AppState`, which has no field for it) so a test can either
/// drive `dispatcher::run` against it directly or connect a bus client to
/// feed it frames.
pub async fn test_state(nms_url: &str) -> (Arc<AppState>, Uplink) {
    let settings = test_settings(nms_url);
    let nms = NmsClient::new(&(&settings).into()).unwrap();
    let downlink = Downlink::bind("127.0.0.1:0").await.unwrap();
    let uplink = Uplink::bind("127.0.0.1:0").await.unwrap();
    let metrics = Metrics::new();
    (Arc::new(AppState::new(settings, nms, downlink, metrics)), uplink)
}
