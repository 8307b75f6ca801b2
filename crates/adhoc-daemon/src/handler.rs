//! The data handler: the pipeline glue tying neighbor discovery, the routing table, path
//! discovery, ARQ and the reward layer together. Owns no state of its own beyond a handle to each
//! of those; it only orchestrates the sequence of calls between them.

use crate::{
    arq::ArqLayer,
    config::Config,
    discovery::{
        Outcome,
        PathDiscovery,
    },
    hash::content_hash,
    ip,
    neighbors::NeighborTable,
    reward::{
        forward_progress_reward,
        RewardLayer,
    },
    routing::RoutingTable,
};
use adhoc_common::MacAddr;
use adhoc_proto::{
    AckMessage,
    HelloMessage,
    Message,
    ReliableDataMessage,
    RewardMessage,
    RreqMessage,
    RrepMessage,
    UnicastMessage,
};
use adhoc_transport::{
    FrameTransport,
    Tunnel,
};
use log::{
    debug,
    warn,
};
use std::{
    net::IpAddr,
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
    },
};

/// IP TTL assigned to a datagram this node originates. Not carried by RELIABLE_DATA (the wire
/// format has no field for it there); only UNICAST's header exposes it.
const ORIGIN_TTL: u8 = 64;

pub struct Engine {
    config: Config,
    tunnel: Arc<dyn Tunnel>,
    transport: Arc<dyn FrameTransport>,
    routing: Arc<RoutingTable>,
    neighbors: Arc<NeighborTable>,
    discovery: Arc<PathDiscovery>,
    arq: Arc<ArqLayer>,
    reward: Arc<RewardLayer>,
    node_id: u32,
    tx_count: AtomicU32,
}

impl Engine {
    pub fn new(
        config: Config,
        tunnel: Arc<dyn Tunnel>,
        transport: Arc<dyn FrameTransport>,
        routing: Arc<RoutingTable>,
        neighbors: Arc<NeighborTable>,
        discovery: Arc<PathDiscovery>,
        arq: Arc<ArqLayer>,
        reward: Arc<RewardLayer>,
    ) -> Self {
        let node_id = content_hash(&transport.local_mac().octets());
        Self {
            config,
            tunnel,
            transport,
            routing,
            neighbors,
            discovery,
            arq,
            reward,
            node_id,
            tx_count: AtomicU32::new(0),
        }
    }

    fn local_mac(&self) -> MacAddr {
        self.transport.local_mac()
    }

    fn is_local_ip(&self, ip: IpAddr) -> bool {
        Some(ip) == self.config.tun_ipv4 || Some(ip) == self.config.tun_ipv6
    }

    fn local_ip_for(&self, dst_ip: IpAddr) -> Option<IpAddr> {
        match dst_ip {
            IpAddr::V4(_) => self.config.tun_ipv4,
            IpAddr::V6(_) => self.config.tun_ipv6,
        }
    }

    async fn alive_neighbors(&self) -> std::collections::HashSet<MacAddr> {
        self.neighbors.get_neighbors().await.into_iter().map(|n| n.mac).collect()
    }

    /// Current per-destination action values, for the `routes` IPC command.
    pub async fn routes_snapshot(&self) -> std::collections::HashMap<IpAddr, std::collections::HashMap<MacAddr, f32>> {
        self.routing.snapshot().await
    }

    /// Current neighbor table, for the `neighbors` IPC command.
    pub async fn neighbor_list(&self) -> Vec<crate::neighbors::Neighbor> {
        self.neighbors.get_neighbors().await
    }

    /// Composes and broadcasts this node's periodic HELLO beacon. Called by the advertiser task.
    pub async fn send_hello(&self) {
        let hello = HelloMessage {
            node_id: self.node_id,
            tx_count: self.tx_count.fetch_add(1, Ordering::Relaxed),
            ipv4: match self.config.tun_ipv4 {
                Some(IpAddr::V4(v4)) => Some(v4),
                _ => None,
            },
            ipv6: match self.config.tun_ipv6 {
                Some(IpAddr::V6(v6)) => Some(v6),
                _ => None,
            },
        };
        self.broadcast(Message::Hello(hello)).await;
    }

    /// Sweeps expired neighbors, stripping their routing-table entries so they stop receiving
    /// selection probability.
    pub async fn sweep_neighbors(&self) {
        for mac in self.neighbors.sweep_expired().await {
            debug!("neighbor {mac} expired");
            self.routing.remove_neighbor(mac).await;
        }
    }

    /// Retransmits due ARQ records and applies `ARQ_FAIL_REWARD` to records that exhausted their
    /// retries.
    pub async fn sweep_arq(&self) {
        let (due, exhausted) = self.arq.sweep_retries().await;
        for retry in due {
            let msg = Message::ReliableData(ReliableDataMessage {
                msg_id: retry.msg_id,
                dst_mac: retry.dst_mac,
                src_mac: self.local_mac(),
                payload: retry.payload,
            });
            if let Err(error) = self.transport.send(retry.dst_mac, &msg.encode()).await {
                warn!("retransmit to {} failed: {error}", retry.dst_mac);
            }
        }
        for exhausted in exhausted {
            warn!("ARQ exhausted for msg {} to {}", exhausted.msg_id, exhausted.dst_mac);
            self.routing
                .update(exhausted.dst_ip, exhausted.dst_mac, self.config.arq_fail_reward, self.config.alpha, self.config.v_init)
                .await;
        }
    }

    /// Applies `HOP_REWARD_TIMEOUT` to every reward-pending record whose `REWARD_WAIT` elapsed.
    pub async fn sweep_reward_timeouts(&self) {
        for (dst_ip, neighbor) in self.reward.sweep_timeouts().await {
            self.routing
                .update(dst_ip, neighbor, self.config.hop_reward_timeout, self.config.alpha, self.config.v_init)
                .await;
        }
    }

    /// Drops path-discovery records whose deadline lapsed; buffered packets are discarded, per IP
    /// semantics, with no failure surfaced to the application.
    pub async fn sweep_discovery(&self) {
        for dst in self.discovery.sweep_expired().await {
            debug!("path discovery to {dst} timed out; buffered packets dropped");
        }
    }

    /// An IP datagram appeared at our tunnel: the top of the whole forwarding pipeline.
    pub async fn handle_tunnel_packet(&self, packet: Vec<u8>) {
        let Some(dst_ip) = ip::destination(&packet) else {
            debug!("dropping tunnel packet with unparseable IP header");
            return;
        };
        self.deliver_or_forward(dst_ip, packet, ORIGIN_TTL, None).await;
    }

    /// Delivers `payload` locally if `dst_ip` is one of our own bound addresses; otherwise routes
    /// it onward, or hands it to path discovery if no route exists yet. `relay_source` is the
    /// neighbor that handed us this payload, if we didn't originate it ourselves.
    async fn deliver_or_forward(&self, dst_ip: IpAddr, payload: Vec<u8>, ttl: u8, relay_source: Option<MacAddr>) {
        if self.is_local_ip(dst_ip) {
            if let Err(error) = self.tunnel.send(&payload).await {
                warn!("tunnel write failed: {error}");
            }
            if let Some(upstream) = relay_source {
                self.credit_upstream(&payload, upstream).await;
            }
            return;
        }

        if ttl == 0 {
            debug!("dropping datagram to {dst_ip}: ttl exhausted");
            return;
        }

        let alive = self.alive_neighbors().await;
        match self.routing.best_action(dst_ip, |mac| alive.contains(&mac), self.config.tau).await {
            Some(mac) => self.forward_to_route(dst_ip, mac, payload, ttl - 1, relay_source).await,
            None => match self.discovery.submit(dst_ip, payload).await {
                Outcome::IssueRreq(rreq_id) => self.issue_rreq(dst_ip, rreq_id).await,
                Outcome::Buffered => {}
            },
        }
    }

    /// Encapsulates `payload` for `next_hop` and hands it to the transport, choosing RELIABLE_DATA
    /// or UNICAST per the per-packet policy, registering ARQ/reward bookkeeping as needed.
    async fn forward_to_route(&self, dst_ip: IpAddr, next_hop: MacAddr, payload: Vec<u8>, ttl: u8, relay_source: Option<MacAddr>) {
        let msg_id = content_hash(&payload);
        let message = if ip::should_use_reliable(&payload) {
            self.arq.register(msg_id, next_hop, dst_ip, payload.clone()).await;
            Message::ReliableData(ReliableDataMessage {
                msg_id,
                dst_mac: next_hop,
                src_mac: self.local_mac(),
                payload,
            })
        } else {
            Message::Unicast(UnicastMessage {
                ttl,
                dst_mac: next_hop,
                src_mac: self.local_mac(),
                payload,
            })
        };

        self.reward.open(msg_id, next_hop, dst_ip, relay_source).await;

        if let Err(error) = self.transport.send(next_hop, &message.encode()).await {
            warn!("forward to {next_hop} failed: {error}");
            return;
        }

        if let Some(upstream) = relay_source {
            self.credit_upstream_for(msg_id, upstream).await;
        }
    }

    /// Our local handling of a relayed packet succeeded (forwarded onward, or delivered to our
    /// own tunnel as the final destination): emit an immediate REWARD backward to whoever handed
    /// it to us, crediting ourselves. The far end's own `RewardLayer` pending record is what
    /// resolves on receiving this.
    async fn credit_upstream(&self, payload: &[u8], upstream: MacAddr) {
        self.credit_upstream_for(content_hash(payload), upstream).await;
    }

    async fn credit_upstream_for(&self, msg_hash: u32, upstream: MacAddr) {
        let reward = RewardMessage {
            reward_value: forward_progress_reward(self.config.forward_progress_reward, 0),
            msg_hash,
            neighbor_mac: self.local_mac(),
        };
        if let Err(error) = self.transport.send(upstream, &Message::Reward(reward).encode()).await {
            warn!("reward relay to {upstream} failed: {error}");
        }
    }

    async fn issue_rreq(&self, dst_ip: IpAddr, rreq_id: u32) {
        let Some(src_ip) = self.local_ip_for(dst_ip) else {
            debug!("no local address in {dst_ip}'s family; cannot issue RREQ");
            return;
        };
        let rreq = RreqMessage {
            hop_count: 0,
            dst_ip,
            src_ip,
            rreq_id,
            bcast_id: rreq_id,
        };
        self.broadcast(Message::Rreq(rreq)).await;
    }

    async fn broadcast(&self, message: Message) {
        if let Err(error) = self.transport.send(MacAddr::BROADCAST, &message.encode()).await {
            warn!("broadcast failed: {error}");
        }
    }

    /// A frame arrived on the physical interface. Dispatches by kind to the owning component.
    pub async fn handle_frame(&self, src_mac: MacAddr, bytes: Vec<u8>) {
        let message = match Message::decode(&bytes) {
            Ok(message) => message,
            Err(error) => {
                debug!("dropping malformed frame from {src_mac}: {error:?}");
                return;
            }
        };
        match message {
            Message::Hello(hello) => self.handle_hello(src_mac, hello).await,
            Message::Broadcast(_) => debug!("received BROADCAST from {src_mac}; no forwarding action defined"),
            Message::Unicast(msg) => self.handle_unicast(src_mac, msg).await,
            Message::ReliableData(msg) => self.handle_reliable_data(src_mac, msg).await,
            Message::Ack(msg) => self.handle_ack(msg).await,
            Message::Reward(msg) => self.handle_reward(msg).await,
            Message::Rreq(msg) => self.handle_rreq(src_mac, msg).await,
            Message::Rrep(msg) => self.handle_rrep(src_mac, msg).await,
        }
    }

    async fn handle_hello(&self, src_mac: MacAddr, hello: HelloMessage) {
        self.neighbors.upsert(src_mac, hello.ipv4, hello.ipv6).await;
        if let Some(ipv4) = hello.ipv4 {
            self.routing.add_route(IpAddr::V4(ipv4), src_mac, self.config.v_init).await;
        }
        if let Some(ipv6) = hello.ipv6 {
            self.routing.add_route(IpAddr::V6(ipv6), src_mac, self.config.v_init).await;
        }
    }

    async fn handle_unicast(&self, src_mac: MacAddr, msg: UnicastMessage) {
        let Some(dst_ip) = ip::destination(&msg.payload) else {
            debug!("dropping UNICAST from {src_mac} with unparseable payload");
            return;
        };
        self.deliver_or_forward(dst_ip, msg.payload, msg.ttl, Some(src_mac)).await;
    }

    async fn handle_reliable_data(&self, src_mac: MacAddr, msg: ReliableDataMessage) {
        let ack = Message::Ack(AckMessage {
            msg_id: msg.msg_id,
            tx_mac: self.local_mac(),
        });
        if let Err(error) = self.transport.send(src_mac, &ack.encode()).await {
            warn!("ACK send to {src_mac} failed: {error}");
        }

        if self.arq.check_duplicate(src_mac, msg.msg_id).await {
            debug!("suppressing duplicate RELIABLE_DATA {} from {src_mac}", msg.msg_id);
            return;
        }

        let Some(dst_ip) = ip::destination(&msg.payload) else {
            debug!("dropping RELIABLE_DATA from {src_mac} with unparseable payload");
            return;
        };
        self.deliver_or_forward(dst_ip, msg.payload, ORIGIN_TTL, Some(src_mac)).await;
    }

    async fn handle_ack(&self, msg: AckMessage) {
        if let Some(acked) = self.arq.acknowledge(msg.msg_id, msg.tx_mac).await {
            self.routing
                .update(acked.dst_ip, acked.dst_mac, self.config.ack_reward, self.config.alpha, self.config.v_init)
                .await;
        }
    }

    async fn handle_reward(&self, msg: RewardMessage) {
        let Some(resolved) = self.reward.resolve(msg.msg_hash, msg.neighbor_mac).await else {
            debug!("REWARD for unknown ({}, {}) ignored", msg.msg_hash, msg.neighbor_mac);
            return;
        };
        self.routing
            .update(resolved.dst_ip, msg.neighbor_mac, msg.reward_value, self.config.alpha, self.config.v_init)
            .await;
        if let Some(upstream) = resolved.relay_to {
            self.credit_upstream_for(msg.msg_hash, upstream).await;
        }
    }

    async fn handle_rreq(&self, src_mac: MacAddr, msg: RreqMessage) {
        if self.is_local_ip(msg.src_ip) {
            return;
        }
        if self.discovery.check_and_record_seen(msg.src_ip, msg.rreq_id).await {
            return;
        }
        self.routing.add_route(msg.src_ip, src_mac, self.config.v_init).await;

        if self.is_local_ip(msg.dst_ip) {
            let rrep = RrepMessage {
                hop_count: msg.hop_count + 1,
                dst_ip: msg.src_ip,
                src_ip: msg.dst_ip,
                tx_mac: self.local_mac(),
            };
            if let Err(error) = self.transport.send(src_mac, &Message::Rrep(rrep).encode()).await {
                warn!("RREP send to {src_mac} failed: {error}");
            }
            return;
        }

        let forwarded = RreqMessage {
            hop_count: msg.hop_count + 1,
            ..msg
        };
        self.broadcast(Message::Rreq(forwarded)).await;
    }

    async fn handle_rrep(&self, src_mac: MacAddr, msg: RrepMessage) {
        self.routing.add_route(msg.src_ip, src_mac, self.config.v_init).await;

        if self.is_local_ip(msg.dst_ip) {
            if let Some(buffered) = self.discovery.resolve(msg.src_ip).await {
                for packet in buffered {
                    self.deliver_or_forward(msg.src_ip, packet, ORIGIN_TTL, None).await;
                }
            }
            return;
        }

        let alive = self.alive_neighbors().await;
        match self.routing.best_action(msg.dst_ip, |mac| alive.contains(&mac), self.config.tau).await {
            Some(next) => {
                let forwarded = RrepMessage {
                    hop_count: msg.hop_count + 1,
                    ..msg
                };
                if let Err(error) = self.transport.send(next, &Message::Rrep(forwarded).encode()).await {
                    warn!("RREP forward to {next} failed: {error}");
                }
            }
            None => debug!("no reverse route to {} for RREP; dropping", msg.dst_ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arq::ArqLayer,
        discovery::PathDiscovery,
        neighbors::NeighborTable,
        reward::RewardLayer,
        routing::RoutingTable,
    };
    use adhoc_transport::{
        LoopbackFabric,
        MemoryTunnel,
    };
    use std::{
        net::Ipv4Addr,
        time::Duration,
    };

    fn mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn test_config(ipv4: std::net::Ipv4Addr) -> Config {
        let mut config = Config::default();
        config.tun_ipv4 = Some(IpAddr::V4(ipv4));
        config
    }

    fn engine(config: Config, transport: Arc<dyn FrameTransport>) -> (Engine, Arc<MemoryTunnel>) {
        let tunnel = Arc::new(MemoryTunnel::new());
        let engine = Engine::new(
            config.clone(),
            tunnel.clone(),
            transport,
            Arc::new(RoutingTable::new()),
            Arc::new(NeighborTable::new(config.neighbor_ttl)),
            Arc::new(PathDiscovery::new(config.pending_queue_max, config.rreq_deadline)),
            Arc::new(ArqLayer::new(config.arq_max_retries)),
            Arc::new(RewardLayer::new(config.reward_wait)),
        );
        (engine, tunnel)
    }

    fn v4_datagram(protocol: u8, dst: [u8; 4]) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x45;
        buf[9] = protocol;
        buf[16..20].copy_from_slice(&dst);
        buf
    }

    #[tokio::test]
    async fn two_node_unicast_delivers_payload() {
        let fabric = LoopbackFabric::new();
        let n1 = fabric.join(mac(1)).await;
        let n2 = fabric.join(mac(2)).await;

        let (engine1, _tun1) = engine(test_config(Ipv4Addr::new(10, 0, 0, 1)), Arc::new(n1));
        let (engine2, tun2) = engine(test_config(Ipv4Addr::new(10, 0, 0, 2)), Arc::new(n2));

        engine1.routing.add_route(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), mac(2), 0.0).await;
        engine1.neighbors.upsert(mac(2), Some(Ipv4Addr::new(10, 0, 0, 2)), None).await;

        let payload = v4_datagram(17, [10, 0, 0, 2]);
        engine1.handle_tunnel_packet(payload.clone()).await;

        let (from, frame) = engine2.transport.recv().await.unwrap();
        assert_eq!(from, mac(1));
        engine2.handle_frame(from, frame).await;

        assert_eq!(tun2.take_sent().await, Some(payload));
    }

    #[tokio::test]
    async fn reliable_delivery_triggers_ack_and_positive_reward() {
        let fabric = LoopbackFabric::new();
        let n1 = fabric.join(mac(1)).await;
        let n2 = fabric.join(mac(2)).await;

        let (engine1, _tun1) = engine(test_config(Ipv4Addr::new(10, 0, 0, 1)), Arc::new(n1));
        let (engine2, _tun2) = engine(test_config(Ipv4Addr::new(10, 0, 0, 2)), Arc::new(n2));

        engine1.routing.add_route(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), mac(2), 0.0).await;

        let payload = v4_datagram(6, [10, 0, 0, 2]);
        engine1.handle_tunnel_packet(payload).await;

        let (from, frame) = engine2.transport.recv().await.unwrap();
        engine2.handle_frame(from, frame).await;

        let (from, ack_frame) = engine1.transport.recv().await.unwrap();
        assert_eq!(from, mac(2));
        engine1.handle_frame(from, ack_frame).await;

        let snapshot = engine1.routing.snapshot().await;
        let v = snapshot[&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))][&mac(2)];
        assert!(v > 0.0);
    }

    #[tokio::test]
    async fn rreq_duplicate_is_not_rebroadcast() {
        let fabric = LoopbackFabric::new();
        let n2 = fabric.join(mac(2)).await;
        let n3 = fabric.join(mac(3)).await;

        let (engine2, _tun2) = engine(test_config(Ipv4Addr::new(10, 0, 0, 2)), Arc::new(n2));

        let rreq = RreqMessage {
            hop_count: 0,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            rreq_id: 7,
            bcast_id: 7,
        };
        engine2.handle_frame(mac(1), Message::Rreq(rreq.clone()).encode()).await;
        n3.recv().await.unwrap();

        engine2.handle_frame(mac(1), Message::Rreq(rreq).encode()).await;
        let second = tokio::time::timeout(Duration::from_millis(50), n3.recv()).await;
        assert!(second.is_err(), "duplicate RREQ should not be rebroadcast");
    }

    /// N1 has no route to N3 and they share no direct link; N2 sits between them. Joining N3 to
    /// the fabric only after N1's first broadcast keeps the RREQ's hop count honest: N3 hears
    /// N2's rebroadcast, never N1's original flood.
    #[tokio::test]
    async fn three_node_reactive_discovery_resolves_and_delivers() {
        let fabric = LoopbackFabric::new();
        let n1 = fabric.join(mac(1)).await;
        let n2 = fabric.join(mac(2)).await;

        let (engine1, _tun1) = engine(test_config(Ipv4Addr::new(10, 0, 0, 1)), Arc::new(n1));
        let (engine2, _tun2) = engine(Config::default(), Arc::new(n2));

        engine1.neighbors.upsert(mac(2), Some(Ipv4Addr::new(10, 0, 0, 2)), None).await;
        engine2.neighbors.upsert(mac(1), Some(Ipv4Addr::new(10, 0, 0, 1)), None).await;
        engine2.neighbors.upsert(mac(3), Some(Ipv4Addr::new(10, 0, 0, 3)), None).await;

        let payload = v4_datagram(17, [10, 0, 0, 3]);
        engine1.handle_tunnel_packet(payload.clone()).await;

        let (from, frame) = engine2.transport.recv().await.unwrap();
        assert_eq!(from, mac(1));

        let n3 = fabric.join(mac(3)).await;
        let (engine3, tun3) = engine(test_config(Ipv4Addr::new(10, 0, 0, 3)), Arc::new(n3));
        engine2.handle_frame(from, frame).await;

        // N1 shares the medium too, so it also hears N2's rebroadcast; it recognizes the RREQ as
        // its own and drops it before N3's copy is read.
        let (echo_from, echo_frame) = engine1.transport.recv().await.unwrap();
        assert_eq!(echo_from, mac(2));
        engine1.handle_frame(echo_from, echo_frame).await;

        let (from, frame) = engine3.transport.recv().await.unwrap();
        assert_eq!(from, mac(2));
        engine3.handle_frame(from, frame).await;

        let (from, frame) = engine2.transport.recv().await.unwrap();
        assert_eq!(from, mac(3));
        engine2.handle_frame(from, frame).await;

        let (from, frame) = engine1.transport.recv().await.unwrap();
        assert_eq!(from, mac(2));
        engine1.handle_frame(from, frame).await;

        let (from, frame) = engine2.transport.recv().await.unwrap();
        assert_eq!(from, mac(1));
        engine2.handle_frame(from, frame).await;

        let (from, frame) = engine3.transport.recv().await.unwrap();
        assert_eq!(from, mac(2));
        engine3.handle_frame(from, frame).await;

        assert_eq!(tun3.take_sent().await, Some(payload));
    }

    #[tokio::test]
    async fn arq_exhaustion_applies_fail_reward() {
        let fabric = LoopbackFabric::new();
        let n1 = fabric.join(mac(1)).await;
        let _n2 = fabric.join(mac(2)).await;

        let mut config = test_config(Ipv4Addr::new(10, 0, 0, 1));
        config.arq_max_retries = 2;
        let (engine1, _tun1) = engine(config, Arc::new(n1));

        engine1.routing.add_route(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), mac(2), 0.0).await;

        let payload = v4_datagram(6, [10, 0, 0, 2]);
        engine1.handle_tunnel_packet(payload).await;

        engine1.sweep_arq().await;
        engine1.sweep_arq().await;
        engine1.sweep_arq().await;

        let snapshot = engine1.routing.snapshot().await;
        let v = snapshot[&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))][&mac(2)];
        assert!(v < 0.0);
    }
}
