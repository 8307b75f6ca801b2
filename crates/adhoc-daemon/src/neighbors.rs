//! Neighbor discovery: tracks who we've heard a HELLO beacon from recently. Owns the live
//! neighbor set exclusively; every other component only ever holds a read snapshot taken through
//! `is_alive`/`get_neighbors`.

use adhoc_common::MacAddr;
use std::{
    collections::HashMap,
    net::{
        Ipv4Addr,
        Ipv6Addr,
    },
    time::{
        Duration,
        Instant,
    },
};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub mac: MacAddr,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    last_seen: Instant,
}

pub struct NeighborTable {
    ttl: Duration,
    neighbors: RwLock<HashMap<MacAddr, Neighbor>>,
}

impl NeighborTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            neighbors: RwLock::new(HashMap::new()),
        }
    }

    /// Upserts a neighbor by L2 source address, refreshing `last_seen` and the advertised IPs.
    pub async fn upsert(&self, mac: MacAddr, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) {
        let mut neighbors = self.neighbors.write().await;
        neighbors.insert(
            mac,
            Neighbor {
                mac,
                ipv4,
                ipv6,
                last_seen: Instant::now(),
            },
        );
    }

    pub async fn is_alive(&self, mac: MacAddr) -> bool {
        match self.neighbors.read().await.get(&mac) {
            Some(neighbor) => neighbor.last_seen.elapsed() <= self.ttl,
            None => false,
        }
    }

    pub async fn get_neighbors(&self) -> Vec<Neighbor> {
        self.neighbors
            .read()
            .await
            .values()
            .filter(|n| n.last_seen.elapsed() <= self.ttl)
            .copied()
            .collect()
    }

    /// Finds the neighbor whose advertised IPv4 or IPv6 address matches `ip`, used when a HELLO
    /// tells us a destination is a direct neighbor rather than a multi-hop one.
    pub async fn neighbor_for_ip(&self, ip: std::net::IpAddr) -> Option<MacAddr> {
        self.neighbors
            .read()
            .await
            .values()
            .find(|n| match ip {
                std::net::IpAddr::V4(v4) => n.ipv4 == Some(v4),
                std::net::IpAddr::V6(v6) => n.ipv6 == Some(v6),
            })
            .map(|n| n.mac)
    }

    /// Removes every neighbor whose TTL has lapsed and returns their MACs, so the caller can
    /// evict the corresponding routing-table entries.
    pub async fn sweep_expired(&self) -> Vec<MacAddr> {
        let mut neighbors = self.neighbors.write().await;
        let expired: Vec<MacAddr> = neighbors
            .values()
            .filter(|n| n.last_seen.elapsed() > self.ttl)
            .map(|n| n.mac)
            .collect();
        for mac in &expired {
            neighbors.remove(mac);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    #[tokio::test]
    async fn fresh_neighbor_is_alive() {
        let table = NeighborTable::new(Duration::from_secs(5));
        table.upsert(mac(1), Some(Ipv4Addr::new(10, 0, 0, 1)), None).await;
        assert!(table.is_alive(mac(1)).await);
    }

    #[tokio::test]
    async fn unknown_neighbor_is_not_alive() {
        let table = NeighborTable::new(Duration::from_secs(5));
        assert!(!table.is_alive(mac(9)).await);
    }

    #[tokio::test]
    async fn expired_neighbor_is_swept() {
        let table = NeighborTable::new(Duration::from_millis(1));
        table.upsert(mac(1), None, None).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let expired = table.sweep_expired().await;
        assert_eq!(expired, vec![mac(1)]);
        assert!(!table.is_alive(mac(1)).await);
    }

    #[tokio::test]
    async fn neighbor_for_ip_finds_advertised_address() {
        let table = NeighborTable::new(Duration::from_secs(5));
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        table.upsert(mac(2), Some(ip), None).await;
        assert_eq!(table.neighbor_for_ip(std::net::IpAddr::V4(ip)).await, Some(mac(2)));
    }
}
