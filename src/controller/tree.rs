//! The controller's in-memory node tree: `SimulatorRoot -> NetworkManager ->
//! HubManager -> ApManager -> RtManager`. Mirrors the `ControllerNode`/
//! `NetworkManager`/`HubManager` hierarchy, including its index-allocation
//! rule (auto-pick smallest free index, or validate an explicit one doesn't
//! collide) and its children-by-index maps.
//!
//! Ownership is strictly downward: a child never holds a pointer back to its
//! parent, only its own [`Address`], which *is* the path back up. Looking a
//! node up by address means walking down from the root.

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use crate::address::Address;

/// Picks the smallest non-negative integer not already a key in `used`, or
/// validates that `requested` is not already taken.
pub fn allocate_index(used: &BTreeMap<u32, ()>, requested: Option<u32>) -> Result<u32, String> {
    match requested {
        None => {
            let mut candidate = 0u32;
            for &key in used.keys() {
                if key != candidate {
                    break;
                }
                candidate += 1;
            }
            Ok(candidate)
        }
        Some(idx) => {
            if used.contains_key(&idx) {
                Err(format!("index {idx} already in use"))
            } else {
                Ok(idx)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtState {
    Unregistered,
    Registered,
    RegistrationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApState {
    Unregistered,
    Registered,
    RegistrationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubState {
    Unregistered,
    Registered,
}

/// Lazily-aggregated heartbeat counters. The worker process is the
/// authority; the controller's copy here is only ever overwritten wholesale
/// by a fresh `HEARTBEAT_STATS_RSP`, never incremented independently.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    pub success: u64,
    pub failure: u64,
}

/// Each in-flight `*_REGISTER_REQ` is matched to its response via a
/// one-shot channel stored here while the request is outstanding. A
/// response that arrives after the receiver has been dropped (e.g. the
/// manager was removed) is simply not observed; sending on a dropped
/// receiver is a no-op error the dispatcher ignores.
pub struct RtManager {
    pub index: u32,
    pub address: Address,
    pub auid: String,
    pub auid_prefix: String,
    pub state: RtState,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub heartbeat_seconds: u64,
    pub stats: HeartbeatStats,
    pub registered_tx: Option<oneshot::Sender<bool>>,
}

pub struct ApManager {
    pub index: u32,
    pub address: Address,
    pub auid: String,
    pub auid_prefix: String,
    pub state: ApState,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub azimuth_deg: u32,
    pub heartbeat_seconds: u64,
    pub stats: HeartbeatStats,
    pub registered_tx: Option<oneshot::Sender<bool>>,
    pub rts: BTreeMap<u32, RtManager>,
}

/// Holds the spawned worker subprocess and the one-shot signal it fires
/// once the worker's `HUB_CONNECT_IND` lands on the uplink, letting
/// `add_hub` await exactly that event instead of polling.
pub struct HubManager {
    pub index: u32,
    pub address: Address,
    pub auid: String,
    pub auid_prefix: String,
    pub state: HubState,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub process: Option<tokio::process::Child>,
    pub connected_tx: Option<oneshot::Sender<()>>,
    pub aps: BTreeMap<u32, ApManager>,
}

pub struct NetworkManager {
    pub index: u32,
    pub address: Address,
    pub auid: String,
    /// Scopes every descendant's default `auid` under this network's
    /// assigned CSNI; propagated unchanged to each child on creation.
    pub auid_prefix: String,
    pub csi: String,
    pub csni: String,
    pub hubs: BTreeMap<u32, HubManager>,
}

#[derive(Default)]
pub struct SimulatorRoot {
    pub networks: BTreeMap<u32, NetworkManager>,
}

impl SimulatorRoot {
    pub fn network_indices(&self) -> BTreeMap<u32, ()> {
        self.networks.keys().map(|&k| (k, ())).collect()
    }

    pub fn network(&self, net: u32) -> Option<&NetworkManager> {
        self.networks.get(&net)
    }

    pub fn network_mut(&mut self, net: u32) -> Option<&mut NetworkManager> {
        self.networks.get_mut(&net)
    }

    pub fn hub(&self, address: &Address) -> Option<&HubManager> {
        let net = address.net()?;
        let hub = address.hub_idx()?;
        self.networks.get(&net)?.hubs.get(&hub)
    }

    pub fn hub_mut(&mut self, address: &Address) -> Option<&mut HubManager> {
        let net = address.net()?;
        let hub = address.hub_idx()?;
        self.networks.get_mut(&net)?.hubs.get_mut(&hub)
    }

    pub fn ap_mut(&mut self, address: &Address) -> Option<&mut ApManager> {
        let net = address.net()?;
        let hub = address.hub_idx()?;
        let ap = address.ap_idx()?;
        self.networks.get_mut(&net)?.hubs.get_mut(&hub)?.aps.get_mut(&ap)
    }

    pub fn ap(&self, address: &Address) -> Option<&ApManager> {
        let net = address.net()?;
        let hub = address.hub_idx()?;
        let ap = address.ap_idx()?;
        self.networks.get(&net)?.hubs.get(&hub)?.aps.get(&ap)
    }

    pub fn rt_mut(&mut self, address: &Address) -> Option<&mut RtManager> {
        let net = address.net()?;
        let hub = address.hub_idx()?;
        let ap = address.ap_idx()?;
        let rt = address.rt_idx()?;
        self.networks
            .get_mut(&net)?
            .hubs
            .get_mut(&hub)?
            .aps
            .get_mut(&ap)?
            .rts
            .get_mut(&rt)
    }

    pub fn rt(&self, address: &Address) -> Option<&RtManager> {
        let net = address.net()?;
        let hub = address.hub_idx()?;
        let ap = address.ap_idx()?;
        let rt = address.rt_idx()?;
        self.networks.get(&net)?.hubs.get(&hub)?.aps.get(&ap)?.rts.get(&rt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_index_picks_smallest_free_slot() {
        let mut used = BTreeMap::new();
        used.insert(0, ());
        used.insert(1, ());
        used.insert(3, ());
        assert_eq!(allocate_index(&used, None).unwrap(), 2);
    }

    #[test]
    fn allocate_index_picks_zero_when_empty() {
        let used = BTreeMap::new();
        assert_eq!(allocate_index(&used, None).unwrap(), 0);
    }

    #[test]
    fn allocate_index_rejects_explicit_collision() {
        let mut used = BTreeMap::new();
        used.insert(5, ());
        assert!(allocate_index(&used, Some(5)).is_err());
    }

    #[test]
    fn allocate_index_accepts_explicit_free_slot() {
        let mut used = BTreeMap::new();
        used.insert(0, ());
        assert_eq!(allocate_index(&used, Some(7)).unwrap(), 7);
    }
}
