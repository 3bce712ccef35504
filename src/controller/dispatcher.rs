//! Drains the uplink and applies every worker-originated message to the
//! node tree. Runs as a single background task for the life of the
//! controller process; the tree lock is never held across an `.await`.

use std::sync::Arc;

use crate::bus::Uplink;
use crate::message::Message;

use super::tree::{ApState, HeartbeatStats, RtState};
use super::AppState;

pub async fn run(state: Arc<AppState>, mut uplink: Uplink) {
    while let Some(message) = uplink.recv().await {
        dispatch(&state, message).await;
    }
    tracing::warn!("uplink closed, dispatcher exiting");
}

async fn dispatch(state: &Arc<AppState>, message: Message) {
    match message {
        Message::HubConnectInd { address } => {
            // Per the C5 dispatch table, this action is solely "set the
            // one-shot connected event" — registration state is a separate
            // concern that only `add_hub` advances, once the NMS hub POST
            // that follows this indication actually succeeds.
            let tx = {
                let mut tree = state.tree.lock().await;
                match tree.hub_mut(&address) {
                    Some(hub) => hub.connected_tx.take(),
                    None => {
                        tracing::warn!(%address, "HUB_CONNECT_IND for unknown hub");
                        None
                    }
                }
            };
            if let Some(tx) = tx {
                let _ = tx.send(());
            }
            state.metrics.hubs_connected.inc();
        }

        Message::ApRegisterRsp { address, success, .. } => {
            let tx = {
                let mut tree = state.tree.lock().await;
                match tree.ap_mut(&address) {
                    Some(ap) => {
                        ap.state = if success {
                            ApState::Registered
                        } else {
                            ApState::RegistrationFailed
                        };
                        ap.registered_tx.take()
                    }
                    None => {
                        tracing::warn!(%address, "AP_REGISTER_RSP for unknown ap");
                        None
                    }
                }
            };
            if let Some(tx) = tx {
                let _ = tx.send(success);
            }
            state.metrics.record_registration("ap", success);
        }

        Message::RtRegisterRsp { address, success, .. } => {
            let tx = {
                let mut tree = state.tree.lock().await;
                match tree.rt_mut(&address) {
                    Some(rt) => {
                        rt.state = if success { RtState::Registered } else { RtState::RegistrationFailed };
                        rt.registered_tx.take()
                    }
                    None => {
                        tracing::warn!(%address, "RT_REGISTER_RSP for unknown rt");
                        None
                    }
                }
            };
            if let Some(tx) = tx {
                let _ = tx.send(success);
            }
            state.metrics.record_registration("rt", success);
        }

        Message::HeartbeatStatsRsp { address, success, failure } => {
            let node_kind = {
                let mut tree = state.tree.lock().await;
                if address.rt_idx().is_some() {
                    if let Some(rt) = tree.rt_mut(&address) {
                        rt.stats = HeartbeatStats { success, failure };
                    }
                    "rt"
                } else if address.ap_idx().is_some() {
                    if let Some(ap) = tree.ap_mut(&address) {
                        ap.stats = HeartbeatStats { success, failure };
                    }
                    "ap"
                } else {
                    tracing::warn!(%address, "HEARTBEAT_STATS_RSP for address above ap depth");
                    "unknown"
                }
            };
            state.metrics.record_heartbeat_stats(node_kind, success, failure);
        }

        other => {
            tracing::warn!(msg_type = other.msg_type(), "unexpected message direction on uplink");
        }
    }
}
