//! The routing table: for each destination IP, a map from neighbor L2 address to a
//! learned value estimate. Mutation is serialized behind a single lock;
//! reads take a snapshot clone of the relevant entry rather than holding the lock across an
//! `.await`.

use super::agent::{
    ActionSelector,
    ValueEstimator,
};
use adhoc_common::MacAddr;
use std::{
    collections::HashMap,
    net::IpAddr,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct Entries {
    by_destination: HashMap<IpAddr, HashMap<MacAddr, f32>>,
}

pub struct RoutingTable {
    entries: RwLock<Entries>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Ensures an entry exists for `(dst, mac)`, initializing it to `v_init` if absent. Called
    /// when an RREP is heard or a neighbor directly advertises `dst`.
    pub async fn add_route(&self, dst: IpAddr, mac: MacAddr, v_init: f32) {
        let mut entries = self.entries.write().await;
        entries.by_destination.entry(dst).or_default().entry(mac).or_insert(v_init);
    }

    /// Applies an incremental-mean update to `(dst, mac)`, initializing to `v_init` first if the
    /// pair was absent.
    pub async fn update(&self, dst: IpAddr, mac: MacAddr, reward: f32, alpha: f32, v_init: f32) {
        let mut entries = self.entries.write().await;
        let value = entries.by_destination.entry(dst).or_default().entry(mac).or_insert(v_init);
        *value = ValueEstimator::update(*value, reward, alpha);
    }

    /// Samples a neighbor for `dst` via the softmax policy, restricted to neighbors `is_alive`
    /// reports as live. Returns `None` if there's no entry for `dst` or every neighbor is dead.
    pub async fn best_action(&self, dst: IpAddr, is_alive: impl Fn(MacAddr) -> bool, tau: f32) -> Option<MacAddr> {
        let entries = self.entries.read().await;
        let candidates = entries.by_destination.get(&dst)?;
        ActionSelector::select(candidates, is_alive, tau)
    }

    pub async fn has_route(&self, dst: IpAddr) -> bool {
        self.entries.read().await.by_destination.contains_key(&dst)
    }

    /// Drops `mac` from every destination entry. Called by the neighbor sweep once a neighbor's
    /// TTL has expired so dead neighbors stop receiving selection probability.
    pub async fn remove_neighbor(&self, mac: MacAddr) {
        let mut entries = self.entries.write().await;
        for neighbors in entries.by_destination.values_mut() {
            neighbors.remove(&mac);
        }
    }

    pub async fn snapshot(&self) -> HashMap<IpAddr, HashMap<MacAddr, f32>> {
        self.entries.read().await.by_destination.clone()
    }
}
