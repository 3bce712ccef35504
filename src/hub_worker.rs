//! The hub worker process (C3): one per Hub, spawned by the controller via
//! `tokio::process::Command`. Connects to the controller's bus, announces
//! itself with `HUB_CONNECT_IND`, then services `*_REGISTER_REQ`,
//! `START_HEARTBEAT_REQ` and `HEARTBEAT_STATS_REQ` frames addressed to it or
//! to any AP/RT it owns.
//!
//! Node state lives in one flat `HashMap<Address, WorkerNode>` rather than a
//! tree — the worker only ever needs to resolve a single address per frame,
//! never walk ancestry, so the tree structure [`crate::controller::tree`]
//! needs is unnecessary overhead here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::address::Address;
use crate::bus::{Downstream, Upstream};
use crate::config::WorkerSettings;
use crate::message::Message;
use crate::nms_client::NmsClient;
use crate::util::now_rfc3339;

/// Counters mirrored up request/response cycles. `Default` gives a fresh
/// zeroed pair for every newly created node.
#[derive(Default)]
struct Counters {
    success: AtomicU64,
    failure: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> (u64, u64) {
        (
            self.success.load(Ordering::Relaxed),
            self.failure.load(Ordering::Relaxed),
        )
    }

    fn reset(&self) {
        self.success.store(0, Ordering::Relaxed);
        self.failure.store(0, Ordering::Relaxed);
    }
}

enum NodeKind {
    Ap,
    /// RTs additionally carry their parent AP's address, used only to
    /// attribute their counters into the AP's rollup on read.
    Rt { ap_address: Address },
}

struct WorkerNode {
    kind: NodeKind,
    auid: String,
    heartbeat_seconds: u64,
    counters: Arc<Counters>,
    heartbeat_task: Option<JoinHandle<()>>,
}

/// Per-process shared state: the node table, the shared NMS HTTP client, and
/// the uplink writer every spawned task sends its response frame through.
pub struct Worker {
    hub_address: Address,
    nms: NmsClient,
    nodes: Mutex<HashMap<Address, WorkerNode>>,
    upstream: Mutex<Upstream>,
    command_limit: Arc<Semaphore>,
}

impl Worker {
    pub fn new(hub_address: Address, nms: NmsClient, upstream: Upstream, max_concurrent: usize) -> Arc<Self> {
        Arc::new(Worker {
            hub_address,
            nms,
            nodes: Mutex::new(HashMap::new()),
            upstream: Mutex::new(upstream),
            command_limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    async fn send(&self, message: Message) {
        let mut upstream = self.upstream.lock().await;
        if let Err(e) = upstream.send(&message).await {
            tracing::warn!(error = %e, "failed to send frame on uplink");
        }
    }

    /// Sums a node's own counters with its descendants' (an AP's RTs). RTs
    /// have no descendants of their own.
    async fn stats_for(&self, address: &Address) -> (u64, u64) {
        let nodes = self.nodes.lock().await;
        let mut success = 0u64;
        let mut failure = 0u64;
        if let Some(node) = nodes.get(address) {
            let (s, f) = node.counters.snapshot();
            success += s;
            failure += f;
        }
        if address.rt_idx().is_none() {
            // address is at AP depth (or shallower): roll up every RT whose
            // recorded parent AP matches.
            for node in nodes.values() {
                if let NodeKind::Rt { ap_address } = &node.kind {
                    if ap_address == address {
                        let (s, f) = node.counters.snapshot();
                        success += s;
                        failure += f;
                    }
                }
            }
        }
        (success, failure)
    }

    async fn reset_stats_for(&self, address: &Address) {
        let nodes = self.nodes.lock().await;
        if let Some(node) = nodes.get(address) {
            node.counters.reset();
        }
        if address.rt_idx().is_none() {
            for node in nodes.values() {
                if let NodeKind::Rt { ap_address } = &node.kind {
                    if ap_address == address {
                        node.counters.reset();
                    }
                }
            }
        }
    }
}

/// Runs the worker process end to end: connects both bus legs, announces
/// itself, then services frames until the downlink connection closes.
pub async fn run(
    settings: WorkerSettings,
    pub_endpoint: &str,
    pull_endpoint: &str,
    net: u32,
    hub: u32,
) -> anyhow::Result<()> {
    let hub_address = Address::hub(net, hub);
    let nms = NmsClient::new(&settings)?;

    let mut downstream = Downstream::connect(pub_endpoint, hub_address.tag()).await?;
    let mut upstream = Upstream::connect(pull_endpoint).await?;

    upstream
        .send(&Message::HubConnectInd {
            address: hub_address.clone(),
        })
        .await?;

    let worker = Worker::new(hub_address.clone(), nms, upstream, settings.max_concurrent_worker_commands);

    while let Some(message) = downstream.recv().await {
        let permit = worker.command_limit.clone().acquire_owned().await;
        let worker = worker.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handle_message(worker, message).await;
        });
    }

    tracing::warn!(hub = %hub_address, "downlink closed, worker exiting");
    Ok(())
}

async fn handle_message(worker: Arc<Worker>, message: Message) {
    if message.address() == &worker.hub_address {
        tracing::debug!(hub = %worker.hub_address, msg_type = message.msg_type(), "hub-addressed frame");
    }
    match message {
        Message::ApRegisterReq {
            address,
            auid,
            hub_auid,
            heartbeat_seconds,
            azimuth_deg,
            hub_lat_deg,
            hub_lon_deg,
        } => {
            handle_ap_register(
                worker,
                address,
                auid,
                hub_auid,
                heartbeat_seconds,
                azimuth_deg,
                hub_lat_deg,
                hub_lon_deg,
            )
            .await
        }

        Message::RtRegisterReq {
            address,
            auid,
            ap_auid,
            heartbeat_seconds,
            ap_lat_deg,
            ap_lon_deg,
        } => handle_rt_register(worker, address, auid, ap_auid, heartbeat_seconds, ap_lat_deg, ap_lon_deg).await,

        Message::StartHeartbeatReq { address } => start_heartbeat(worker, address).await,

        Message::HeartbeatStatsReq { address, reset } => {
            let (success, failure) = worker.stats_for(&address).await;
            worker
                .send(Message::HeartbeatStatsRsp {
                    address: address.clone(),
                    success,
                    failure,
                })
                .await;
            if reset {
                worker.reset_stats_for(&address).await;
            }
        }

        other => {
            tracing::warn!(msg_type = other.msg_type(), "unexpected message direction on downlink");
        }
    }
}

async fn handle_ap_register(
    worker: Arc<Worker>,
    address: Address,
    auid: String,
    hub_auid: String,
    heartbeat_seconds: u64,
    azimuth_deg: u32,
    hub_lat_deg: f64,
    hub_lon_deg: f64,
) {
    let ap_secret = uuid::Uuid::new_v4().to_string();

    let create = worker
        .nms
        .create_ap(&auid, &hub_auid, hub_lat_deg, hub_lon_deg, azimuth_deg)
        .await;
    let success = match create {
        Ok(_) => {
            let secret_ok = worker.nms.register_ap_secret(&auid, &hub_auid, &ap_secret).await.is_ok();
            secret_ok && worker.nms.register_ap_candidate(&auid, &hub_auid, &ap_secret).await.is_ok()
        }
        Err(_) => false,
    };

    {
        let mut nodes = worker.nodes.lock().await;
        nodes.insert(
            address.clone(),
            WorkerNode {
                kind: NodeKind::Ap,
                auid: auid.clone(),
                heartbeat_seconds,
                counters: Arc::new(Counters::default()),
                heartbeat_task: None,
            },
        );
    }

    worker
        .send(Message::ApRegisterRsp {
            address,
            success,
            registered_at: now_rfc3339(),
        })
        .await;
}

async fn handle_rt_register(
    worker: Arc<Worker>,
    address: Address,
    auid: String,
    ap_auid: String,
    heartbeat_seconds: u64,
    ap_lat_deg: f64,
    ap_lon_deg: f64,
) {
    let ap_address = match (address.net(), address.hub_idx(), address.ap_idx()) {
        (Some(n), Some(h), Some(a)) => Address::ap(n, h, a),
        _ => {
            tracing::warn!(%address, "RT_REGISTER_REQ with malformed address");
            return;
        }
    };

    let create = worker.nms.create_rt(&auid, &ap_auid, ap_lat_deg, ap_lon_deg, "").await;
    let success = match create {
        Ok(_) => worker.nms.register_rt(&auid, &ap_auid).await.is_ok(),
        Err(_) => false,
    };

    {
        let mut nodes = worker.nodes.lock().await;
        nodes.insert(
            address.clone(),
            WorkerNode {
                kind: NodeKind::Rt { ap_address },
                auid: auid.clone(),
                heartbeat_seconds,
                counters: Arc::new(Counters::default()),
                heartbeat_task: None,
            },
        );
    }

    worker
        .send(Message::RtRegisterRsp {
            address,
            success,
            registered_at: now_rfc3339(),
        })
        .await;
}

/// Spawns the per-node heartbeat loop: a random first-iteration phase to
/// avoid thundering herds, then a deadline-preserving loop that re-aligns
/// to the period on a missed deadline rather than drifting by the slow
/// call's latency.
async fn start_heartbeat(worker: Arc<Worker>, address: Address) {
    let (auid, heartbeat_seconds, counters) = {
        let nodes = worker.nodes.lock().await;
        match nodes.get(&address) {
            Some(node) => (node.auid.clone(), node.heartbeat_seconds, node.counters.clone()),
            None => {
                tracing::warn!(%address, "START_HEARTBEAT_REQ for unknown node");
                return;
            }
        }
    };

    let nms = worker.nms.clone();
    let task = tokio::spawn(async move {
        heartbeat_loop(nms, auid, heartbeat_seconds, counters).await;
    });

    let mut nodes = worker.nodes.lock().await;
    if let Some(node) = nodes.get_mut(&address) {
        node.heartbeat_task = Some(task);
    }
}

async fn heartbeat_loop(nms: NmsClient, auid: String, heartbeat_seconds: u64, counters: Arc<Counters>) {
    let period = Duration::from_secs(heartbeat_seconds.max(1));

    let jitter = Duration::from_secs_f64(rand::random::<f64>() * period.as_secs_f64());
    tokio::time::sleep(jitter).await;

    loop {
        let deadline = Instant::now() + period;
        let result = nms.heartbeat(&auid, &now_rfc3339()).await;
        match result {
            Ok(()) => {
                counters.success.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.failure.fetch_add(1, Ordering::Relaxed);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(auid = %auid, "heartbeat iteration missed its deadline, re-aligning");
            tokio::time::sleep(period).await;
        } else {
            tokio::time::sleep_until(deadline).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_snapshot_after_increment() {
        let c = Counters::default();
        c.success.fetch_add(3, Ordering::Relaxed);
        c.failure.fetch_add(1, Ordering::Relaxed);
        assert_eq!(c.snapshot(), (3, 1));
        c.reset();
        assert_eq!(c.snapshot(), (0, 0));
    }
}
