//! The controller process: owns the node tree, drives NMS network/hub
//! creation directly, and delegates AP/RT registration to the per-hub
//! worker subprocess over the pub/sub bus.
//!
//! State is one [`AppState`] per process, mirroring the dashboard's
//! `AppState { fleet: Mutex<Fleet>, deployments: Mutex<DeploymentManager>,
//! ... }` shape: related state grouped per concern behind its own
//! `Mutex`, rather than one giant lock guarding everything. Here there is
//! exactly one thing to guard (the node tree), so there is exactly one
//! `Mutex`; it is never held across an `.await`.

pub mod api;
pub mod dispatcher;
pub mod tree;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;

use crate::address::Address;
use crate::bus::Downlink;
use crate::config::{Settings, WorkerSettings};
use crate::error::ApiError;
use crate::message::Message;
use crate::nms_client::NmsClient;
use crate::prom_metrics::Metrics;

use tree::{ApManager, ApState, HeartbeatStats, HubManager, HubState, NetworkManager, RtManager, RtState, SimulatorRoot};

/// Bound on how long `remove_hub` waits for a worker to exit on its own
/// before hard-killing it.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct AppState {
    pub tree: Mutex<SimulatorRoot>,
    pub nms: NmsClient,
    pub downlink: Downlink,
    pub settings: Settings,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: Settings, nms: NmsClient, downlink: Downlink, metrics: Metrics) -> Self {
        AppState {
            tree: Mutex::new(SimulatorRoot::default()),
            nms,
            downlink,
            settings,
            metrics,
        }
    }
}

/// Mints the network's own bootstrap `auid`, used only before the NMS has
/// assigned a `csni` to scope anything under. Every other node's `auid` is
/// derived instead (see [`default_auid`]), per invariant 3.
fn new_auid(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// A node's default `auid`: its parent's `auid_prefix` (propagated
/// unchanged down the tree) concatenated with its own address tag.
fn default_auid(auid_prefix: &str, address: &Address) -> String {
    format!("{auid_prefix}{}", address.tag())
}

/// Parameters accepted by `POST /networks`.
pub struct CreateNetworkParams {
    pub csi: String,
    pub email_domain: String,
    pub hubs: u32,
    pub aps_per_hub: u32,
    pub ap_heartbeat_seconds: u64,
    pub rts_per_ap: u32,
    pub rt_heartbeat_seconds: u64,
    pub index: Option<u32>,
}

pub struct CreateHubParams {
    pub num_aps: u32,
    pub ap_heartbeat_seconds: u64,
    pub num_rts_per_ap: u32,
    pub rt_heartbeat_seconds: u64,
    pub index: Option<u32>,
}

pub struct CreateApParams {
    pub heartbeat_seconds: u64,
    pub num_rts: u32,
    pub rt_heartbeat_seconds: u64,
    pub azimuth_deg: u32,
    pub index: Option<u32>,
}

pub struct CreateRtParams {
    pub heartbeat_seconds: u64,
    pub index: Option<u32>,
}

/// Creates a network: posts it to the NMS first (to learn its `csni`),
/// mirroring the original ordering where the NMS-assigned identifier is
/// known before the local index is allocated, then fans hub creation out
/// concurrently.
pub async fn add_network(
    state: &Arc<AppState>,
    params: CreateNetworkParams,
) -> Result<u32, ApiError> {
    let auid = new_auid("net");
    let response = state
        .nms
        .create_network(&auid, &params.email_domain, &params.csi)
        .await?;

    let net_idx = {
        let mut tree = state.tree.lock().await;
        let used = tree.network_indices();
        let idx = tree::allocate_index(&used, params.index).map_err(ApiError::BadRequest)?;
        tree.networks.insert(
            idx,
            NetworkManager {
                index: idx,
                address: Address::network(idx),
                auid: auid.clone(),
                auid_prefix: response.csni.clone(),
                csi: params.csi.clone(),
                csni: response.csni.clone(),
                hubs: BTreeMap::new(),
            },
        );
        idx
    };

    let mut joins = JoinSet::new();
    for _ in 0..params.hubs {
        let state = state.clone();
        let hub_params = CreateHubParams {
            num_aps: params.aps_per_hub,
            ap_heartbeat_seconds: params.ap_heartbeat_seconds,
            num_rts_per_ap: params.rts_per_ap,
            rt_heartbeat_seconds: params.rt_heartbeat_seconds,
            index: None,
        };
        joins.spawn(async move { add_hub(&state, net_idx, hub_params).await });
    }
    while let Some(res) = joins.join_next().await {
        match res {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "hub creation failed during network bootstrap"),
            Err(e) => tracing::warn!(error = %e, "hub creation task panicked"),
        }
    }

    Ok(net_idx)
}

/// Creates a hub: inserts the tree entry and spawns the worker *before*
/// the worker is awaited, so uplink frames that arrive mid-spawn still
/// route to a node that exists; then posts the hub object to the NMS,
/// then fans AP creation out across it.
pub async fn add_hub(
    state: &Arc<AppState>,
    net_idx: u32,
    params: CreateHubParams,
) -> Result<u32, ApiError> {
    let (connected_tx, connected_rx) = oneshot::channel();
    let (lat_deg, lon_deg) = crate::nms_client::random_hub_location();

    let (hub_idx, auid) = {
        let mut tree = state.tree.lock().await;
        let network = tree
            .network_mut(net_idx)
            .ok_or_else(|| ApiError::NotFound(format!("network {net_idx}")))?;
        let auid_prefix = network.auid_prefix.clone();
        let used: BTreeMap<u32, ()> = network.hubs.keys().map(|&k| (k, ())).collect();
        let idx = tree::allocate_index(&used, params.index).map_err(ApiError::BadRequest)?;
        let address = Address::hub(net_idx, idx);
        let auid = default_auid(&auid_prefix, &address);
        network.hubs.insert(
            idx,
            HubManager {
                index: idx,
                address,
                auid: auid.clone(),
                auid_prefix,
                state: HubState::Unregistered,
                lat_deg,
                lon_deg,
                process: None,
                connected_tx: Some(connected_tx),
                aps: BTreeMap::new(),
            },
        );
        (idx, auid)
    };

    let address = Address::hub(net_idx, hub_idx);
    let worker_settings: WorkerSettings = (&state.settings).into();
    let child = spawn_worker(&state.settings, &worker_settings, net_idx, hub_idx)
        .map_err(|e| ApiError::UpstreamFailure(format!("failed to spawn hub worker: {e}")))?;

    {
        let mut tree = state.tree.lock().await;
        if let Some(hub) = tree.hub_mut(&address) {
            hub.process = Some(child);
        }
    }

    // No timeout: a hub that never connects leaves add_hub pending
    // indefinitely. Left unresolved deliberately (see controller design
    // notes) rather than guessing an arbitrary bound.
    let _ = connected_rx.await;

    let hub_response = state
        .nms
        .create_hub(&auid, &network_csni(state, net_idx).await?, lat_deg, lon_deg)
        .await;
    match hub_response {
        Ok(resp) => {
            let mut tree = state.tree.lock().await;
            if let Some(hub) = tree.hub_mut(&address) {
                hub.state = HubState::Registered;
                hub.auid = resp.auid;
            }
        }
        Err(e) => {
            let mut tree = state.tree.lock().await;
            if let Some(network) = tree.network_mut(net_idx) {
                network.hubs.remove(&hub_idx);
            }
            return Err(e);
        }
    }

    let mut joins = JoinSet::new();
    for _ in 0..params.num_aps {
        let state = state.clone();
        let ap_params = CreateApParams {
            heartbeat_seconds: params.ap_heartbeat_seconds,
            num_rts: params.num_rts_per_ap,
            rt_heartbeat_seconds: params.rt_heartbeat_seconds,
            azimuth_deg: 0,
            index: None,
        };
        let address = address.clone();
        joins.spawn(async move { add_ap(&state, &address, ap_params).await });
    }
    while let Some(res) = joins.join_next().await {
        if let Ok(Err(e)) = res {
            tracing::warn!(error = %e, "ap creation failed during hub bootstrap");
        }
    }

    if let Err(e) = start_heartbeats(state, &address).await {
        tracing::warn!(error = %e, "failed to auto-start heartbeats after hub creation");
    }

    Ok(hub_idx)
}

async fn network_csni(state: &Arc<AppState>, net_idx: u32) -> Result<String, ApiError> {
    let tree = state.tree.lock().await;
    tree.network(net_idx)
        .map(|n| n.csni.clone())
        .ok_or_else(|| ApiError::NotFound(format!("network {net_idx}")))
}

/// Allocates the AP's tree entry in `Unregistered` state and dispatches
/// `AP_REGISTER_REQ` down to the owning hub's worker. Returns as soon as
/// the request has been published, handing back the address and the
/// one-shot receiver the dispatcher will fulfil once the matching
/// `AP_REGISTER_RSP` arrives. This is the split the 202-Accepted HTTP
/// handler needs: it can respond immediately with the address while a
/// background task (or, internally, [`add_ap`]) awaits the outcome.
async fn allocate_ap(
    state: &Arc<AppState>,
    hub_address: &Address,
    params: &CreateApParams,
) -> Result<(Address, oneshot::Receiver<bool>), ApiError> {
    let net_idx = hub_address.net().ok_or_else(|| ApiError::BadRequest("hub address missing net".into()))?;
    let hub_idx = hub_address
        .hub_idx()
        .ok_or_else(|| ApiError::BadRequest("hub address missing hub".into()))?;

    let (ap_idx, auid, hub_auid, hub_lat_deg, hub_lon_deg, registered_rx) = {
        let mut tree = state.tree.lock().await;
        let hub = tree
            .hub_mut(hub_address)
            .ok_or_else(|| ApiError::NotFound(format!("hub {hub_address}")))?;
        let auid_prefix = hub.auid_prefix.clone();
        let used: BTreeMap<u32, ()> = hub.aps.keys().map(|&k| (k, ())).collect();
        let idx = tree::allocate_index(&used, params.index).map_err(ApiError::BadRequest)?;
        let address = Address::ap(net_idx, hub_idx, idx);
        let auid = default_auid(&auid_prefix, &address);
        let (registered_tx, registered_rx) = oneshot::channel();
        hub.aps.insert(
            idx,
            ApManager {
                index: idx,
                address,
                auid: auid.clone(),
                auid_prefix,
                state: ApState::Unregistered,
                lat_deg: hub.lat_deg,
                lon_deg: hub.lon_deg,
                azimuth_deg: params.azimuth_deg,
                heartbeat_seconds: params.heartbeat_seconds,
                stats: HeartbeatStats::default(),
                registered_tx: Some(registered_tx),
                rts: BTreeMap::new(),
            },
        );
        (idx, auid, hub.auid.clone(), hub.lat_deg, hub.lon_deg, registered_rx)
    };

    let address = Address::ap(net_idx, hub_idx, ap_idx);
    let request = Message::ApRegisterReq {
        address: address.clone(),
        auid,
        hub_auid,
        heartbeat_seconds: params.heartbeat_seconds,
        azimuth_deg: params.azimuth_deg,
        hub_lat_deg,
        hub_lon_deg,
    };
    state
        .downlink
        .publish(&request)
        .await
        .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;

    Ok((address, registered_rx))
}

/// Once the AP's outcome is known, fans `num_rts` RT creations out. Per
/// the original ordering, the RT tree entries are always created, but the
/// `RT_REGISTER_REQ` is only actually sent if the AP registered.
async fn fan_out_rts(state: &Arc<AppState>, ap_address: Address, params: &CreateApParams, ap_registered: bool) {
    let mut joins = JoinSet::new();
    for _ in 0..params.num_rts {
        let state = state.clone();
        let address = ap_address.clone();
        let rt_params = CreateRtParams {
            heartbeat_seconds: params.rt_heartbeat_seconds,
            index: None,
        };
        joins.spawn(async move { add_rt(&state, &address, rt_params, ap_registered).await });
    }
    while let Some(res) = joins.join_next().await {
        if let Ok(Err(e)) = res {
            tracing::warn!(error = %e, "rt creation failed during ap bootstrap");
        }
    }
}

/// Allocates the AP, dispatches its registration, and awaits the matching
/// `AP_REGISTER_RSP` before returning (B2). Registration failure is not an
/// error here: it is recorded as `RegistrationFailed` on the manager and
/// the function still returns `Ok`. Used by internal fan-out (`add_hub`)
/// where the caller is already running inside a `JoinSet` and wants the
/// whole subtree settled before moving on.
pub async fn add_ap(
    state: &Arc<AppState>,
    hub_address: &Address,
    params: CreateApParams,
) -> Result<Address, ApiError> {
    let (address, registered_rx) = allocate_ap(state, hub_address, &params).await?;
    let ap_registered = registered_rx.await.unwrap_or(false);
    fan_out_rts(state, address.clone(), &params, ap_registered).await;
    Ok(address)
}

/// Allocates the AP and dispatches its registration, then returns
/// immediately without waiting for the outcome — the 202-Accepted
/// contract at the HTTP layer. RT fan-out runs in a detached background
/// task once the outcome is known.
pub async fn spawn_ap(
    state: &Arc<AppState>,
    hub_address: &Address,
    params: CreateApParams,
) -> Result<Address, ApiError> {
    let (address, registered_rx) = allocate_ap(state, hub_address, &params).await?;
    let state = state.clone();
    let background_address = address.clone();
    tokio::spawn(async move {
        let ap_registered = registered_rx.await.unwrap_or(false);
        fan_out_rts(&state, background_address, &params, ap_registered).await;
    });
    Ok(address)
}

/// Allocates the RT's tree entry unconditionally. If `send_registration`
/// is true (the parent AP registered successfully), also dispatches
/// `RT_REGISTER_REQ` and awaits the matching `RT_REGISTER_RSP`; otherwise
/// the RT stays `Unregistered` with no request ever sent.
pub async fn add_rt(
    state: &Arc<AppState>,
    ap_address: &Address,
    params: CreateRtParams,
    send_registration: bool,
) -> Result<Address, ApiError> {
    let net_idx = ap_address.net().ok_or_else(|| ApiError::BadRequest("ap address missing net".into()))?;
    let hub_idx = ap_address
        .hub_idx()
        .ok_or_else(|| ApiError::BadRequest("ap address missing hub".into()))?;
    let ap_idx = ap_address
        .ap_idx()
        .ok_or_else(|| ApiError::BadRequest("ap address missing ap".into()))?;

    let (rt_idx, auid, ap_auid, ap_lat_deg, ap_lon_deg, registered_rx) = {
        let mut tree = state.tree.lock().await;
        let ap = tree
            .ap_mut(ap_address)
            .ok_or_else(|| ApiError::NotFound(format!("ap {ap_address}")))?;
        let auid_prefix = ap.auid_prefix.clone();
        let used: BTreeMap<u32, ()> = ap.rts.keys().map(|&k| (k, ())).collect();
        let idx = tree::allocate_index(&used, params.index).map_err(ApiError::BadRequest)?;
        let address = Address::rt(net_idx, hub_idx, ap_idx, idx);
        let auid = default_auid(&auid_prefix, &address);
        let (registered_tx, registered_rx) = oneshot::channel();
        ap.rts.insert(
            idx,
            RtManager {
                index: idx,
                address,
                auid: auid.clone(),
                auid_prefix,
                state: RtState::Unregistered,
                lat_deg: ap.lat_deg,
                lon_deg: ap.lon_deg,
                heartbeat_seconds: params.heartbeat_seconds,
                stats: HeartbeatStats::default(),
                registered_tx: Some(registered_tx),
            },
        );
        (idx, auid, ap.auid.clone(), ap.lat_deg, ap.lon_deg, registered_rx)
    };

    let address = Address::rt(net_idx, hub_idx, ap_idx, rt_idx);

    if !send_registration {
        return Ok(address);
    }

    let request = Message::RtRegisterReq {
        address: address.clone(),
        auid,
        ap_auid,
        heartbeat_seconds: params.heartbeat_seconds,
        ap_lat_deg,
        ap_lon_deg,
    };
    state
        .downlink
        .publish(&request)
        .await
        .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;

    let _ = registered_rx.await;

    Ok(address)
}

/// Walks the subtree under `address` (network, hub, or AP granularity) and
/// emits one `START_HEARTBEAT_REQ` per terminal node (AP/RT) found, per the
/// controller's `start_heartbeats` contract. Called automatically once
/// `add_network`/`add_hub` completes (§6: "heartbeats auto-start after
/// creation").
pub async fn start_heartbeats(state: &Arc<AppState>, address: &Address) -> Result<(), ApiError> {
    let targets = {
        let tree = state.tree.lock().await;
        terminal_addresses_under(&tree, address)
    };
    for target in targets {
        let request = Message::StartHeartbeatReq { address: target };
        state
            .downlink
            .publish(&request)
            .await
            .map_err(|e| ApiError::UpstreamFailure(e.to_string()))?;
    }
    Ok(())
}

fn terminal_addresses_under(tree: &SimulatorRoot, address: &Address) -> Vec<Address> {
    let mut out = Vec::new();
    match (address.net(), address.hub_idx(), address.ap_idx(), address.rt_idx()) {
        (Some(net), None, None, None) => {
            if let Some(network) = tree.network(net) {
                for hub in network.hubs.values() {
                    collect_hub(hub, &mut out);
                }
            }
        }
        (Some(_), Some(_), None, None) => {
            if let Some(hub) = tree.hub(address) {
                collect_hub(hub, &mut out);
            }
        }
        (Some(_), Some(_), Some(_), None) => {
            if let Some(ap) = tree.ap(address) {
                collect_ap(ap, &mut out);
            }
        }
        _ => {}
    }
    out
}

fn collect_hub(hub: &HubManager, out: &mut Vec<Address>) {
    for ap in hub.aps.values() {
        collect_ap(ap, out);
    }
}

fn collect_ap(ap: &ApManager, out: &mut Vec<Address>) {
    out.push(ap.address.clone());
    for rt in ap.rts.values() {
        out.push(rt.address.clone());
    }
}

/// Terminates a hub's worker subprocess: requests a graceful exit, then
/// kills it if it hasn't exited within a short grace period.
pub async fn remove_hub(state: &Arc<AppState>, hub_address: &Address) -> Result<(), ApiError> {
    let net_idx = hub_address.net().ok_or_else(|| ApiError::BadRequest("missing net".into()))?;
    let hub_idx = hub_address
        .hub_idx()
        .ok_or_else(|| ApiError::BadRequest("missing hub".into()))?;

    let mut child = {
        let mut tree = state.tree.lock().await;
        let network = tree
            .network_mut(net_idx)
            .ok_or_else(|| ApiError::NotFound(format!("network {net_idx}")))?;
        let hub = network
            .hubs
            .remove(&hub_idx)
            .ok_or_else(|| ApiError::NotFound(format!("hub {hub_address}")))?;
        hub.process
    };

    if let Some(child) = child.as_mut() {
        // No graceful-shutdown signal exists in the bus protocol today, so
        // the grace period only catches a worker that happens to already
        // be exiting; anything still running after it is hard-killed.
        if tokio::time::timeout(WORKER_SHUTDOWN_GRACE, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
    Ok(())
}

pub async fn remove_network(state: &Arc<AppState>, net_idx: u32) -> Result<(), ApiError> {
    let hub_indices: Vec<u32> = {
        let tree = state.tree.lock().await;
        let network = tree
            .network(net_idx)
            .ok_or_else(|| ApiError::NotFound(format!("network {net_idx}")))?;
        network.hubs.keys().copied().collect()
    };
    for hub_idx in hub_indices {
        let _ = remove_hub(state, &Address::hub(net_idx, hub_idx)).await;
    }
    let mut tree = state.tree.lock().await;
    tree.networks.remove(&net_idx);
    Ok(())
}

fn spawn_worker(
    settings: &Settings,
    worker_settings: &WorkerSettings,
    net_idx: u32,
    hub_idx: u32,
) -> std::io::Result<tokio::process::Child> {
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .arg("worker")
        .arg("--net")
        .arg(net_idx.to_string())
        .arg("--hub")
        .arg(hub_idx.to_string())
        .arg("--pub-endpoint")
        .arg(settings.pub_endpoint())
        .arg("--pull-endpoint")
        .arg(settings.pull_endpoint())
        .env("NBAPI_URL", &worker_settings.nbapi_url)
        .env("SBAPI_URL", &worker_settings.sbapi_url)
        .env("VERIFY_SSL_CERT", worker_settings.verify_ssl_cert.to_string())
        .env("HTTPX_TIMEOUT", worker_settings.httpx_timeout.as_secs().to_string())
        .env("SECRET_KEY", &worker_settings.secret_key)
        .env("SECRET_KEY_RT", &worker_settings.secret_key_rt)
        .env("ALGORITHM", &worker_settings.algorithm)
        .env("TOKEN_EXPIRY_SECONDS", worker_settings.token_expiry_seconds.to_string())
        .env("CSI", &worker_settings.csi)
        .env("INSTALLER_KEY", &worker_settings.installer_key)
        .env(
            "MAX_CONCURRENT_WORKER_COMMANDS",
            worker_settings.max_concurrent_worker_commands.to_string(),
        )
        .env("WORKER_HTTPX_POOLSIZE", worker_settings.worker_httpx_poolsize.to_string())
        .kill_on_drop(true)
        .spawn()
}
