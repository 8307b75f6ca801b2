//! The reward layer: attributes observed forwarding outcomes back to the neighbor
//! that was chosen for them, closing the loop the routing table's value estimates learn from.

use adhoc_common::MacAddr;
use std::{
    collections::HashMap,
    net::IpAddr,
    time::{
        Duration,
        Instant,
    },
};
use tokio::sync::Mutex;

struct RewardPendingRecord {
    dst_ip: IpAddr,
    /// The neighbor that handed us this packet in the first place, if we were ourselves a relay
    /// rather than the originator. A confirmed credit here is automatically relayed one more hop
    /// backward, so a multi-hop path's reward propagates without a dedicated reverse-path table.
    relay_source: Option<MacAddr>,
    opened_at: Instant,
}

/// What resolving a pending record means for the caller.
pub struct Resolved {
    pub dst_ip: IpAddr,
    /// If this hop was itself relaying for someone else, the neighbor to credit and relay to next.
    pub relay_to: Option<MacAddr>,
}

/// Short-lived records awaiting a downstream `REWARD` message for a just-forwarded unicast.
pub struct RewardLayer {
    pending: Mutex<HashMap<(u32, MacAddr), RewardPendingRecord>>,
    reward_wait: Duration,
}

impl RewardLayer {
    pub fn new(reward_wait: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            reward_wait,
        }
    }

    /// Opens a record awaiting credit for handing `msg_hash` to `neighbor`. `relay_source` is the
    /// neighbor that forwarded this packet to us, if any, so a later `resolve` can relay the
    /// credit further back up the path.
    pub async fn open(&self, msg_hash: u32, neighbor: MacAddr, dst_ip: IpAddr, relay_source: Option<MacAddr>) {
        self.pending.lock().await.insert(
            (msg_hash, neighbor),
            RewardPendingRecord {
                dst_ip,
                relay_source,
                opened_at: Instant::now(),
            },
        );
    }

    /// A `REWARD` message arrived for `(msg_hash, neighbor)`; returns what was opened for it so
    /// the caller can apply the update (and relay credit further back, if applicable), or `None`
    /// if nothing's waiting on it (arrived late, or duplicate).
    pub async fn resolve(&self, msg_hash: u32, neighbor: MacAddr) -> Option<Resolved> {
        self.pending
            .lock()
            .await
            .remove(&(msg_hash, neighbor))
            .map(|record| Resolved {
                dst_ip: record.dst_ip,
                relay_to: record.relay_source,
            })
    }

    /// Drops every pending record older than `reward_wait`, returning `(dst_ip, neighbor)` pairs
    /// the caller should apply `HOP_REWARD_TIMEOUT` to.
    pub async fn sweep_timeouts(&self) -> Vec<(IpAddr, MacAddr)> {
        let mut pending = self.pending.lock().await;
        let now = Instant::now();
        let expired: Vec<(u32, MacAddr)> = pending
            .iter()
            .filter(|(_, record)| now.duration_since(record.opened_at) > self.reward_wait)
            .map(|(key, _)| *key)
            .collect();

        let mut results = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(record) = pending.remove(&key) {
                results.push((record.dst_ip, key.1));
            }
        }
        results
    }
}

/// The forward-progress contribution an intermediate hop credits toward the neighbor it forwarded
/// through, scaled down the further along the path the packet already was.
pub fn forward_progress_reward(base: f32, hop_count: u8) -> f32 {
    base / (hop_count as f32 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn dst() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))
    }

    #[tokio::test]
    async fn resolve_matches_opened_record() {
        let layer = RewardLayer::new(Duration::from_secs(1));
        layer.open(7, mac(2), dst(), None).await;
        let resolved = layer.resolve(7, mac(2)).await.unwrap();
        assert_eq!(resolved.dst_ip, dst());
        assert_eq!(resolved.relay_to, None);
        assert!(layer.resolve(7, mac(2)).await.is_none());
    }

    #[tokio::test]
    async fn resolve_ignores_wrong_neighbor() {
        let layer = RewardLayer::new(Duration::from_secs(1));
        layer.open(7, mac(2), dst(), None).await;
        assert!(layer.resolve(7, mac(3)).await.is_none());
    }

    #[tokio::test]
    async fn resolve_carries_relay_source_for_further_propagation() {
        let layer = RewardLayer::new(Duration::from_secs(1));
        layer.open(7, mac(2), dst(), Some(mac(1))).await;
        let resolved = layer.resolve(7, mac(2)).await.unwrap();
        assert_eq!(resolved.relay_to, Some(mac(1)));
    }

    #[tokio::test]
    async fn timeout_sweep_returns_expired_pair() {
        let layer = RewardLayer::new(Duration::from_millis(1));
        layer.open(7, mac(2), dst(), None).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(layer.sweep_timeouts().await, vec![(dst(), mac(2))]);
    }

    #[test]
    fn progress_reward_shrinks_with_hop_count() {
        let near = forward_progress_reward(0.5, 0);
        let far = forward_progress_reward(0.5, 4);
        assert!(near > far);
        assert_eq!(near, 0.5);
    }
}
