//! Reactive path discovery: the Absent/Pending/Resolved state machine per
//! destination IP, and the bounded, LRU-evicted de-duplication set RREQ flooding relies on.

use std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    net::IpAddr,
    sync::atomic::{
        AtomicU32,
        Ordering,
    },
    time::{
        Duration,
        Instant,
    },
};
use tokio::sync::Mutex;

const SEEN_REQUEST_CAPACITY: usize = 512;

struct PendingRoute {
    rreq_id: u32,
    buffered: VecDeque<Vec<u8>>,
    deadline: Instant,
}

/// Bounded LRU set of `(originator, rreq_id)` pairs already processed, so a re-flooded RREQ is
/// forwarded at most once.
struct SeenRequestSet {
    order: VecDeque<(IpAddr, u32)>,
    members: HashSet<(IpAddr, u32)>,
    capacity: usize,
}

impl SeenRequestSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    /// Returns `true` if `(originator, rreq_id)` was already seen; otherwise records it and
    /// returns `false`.
    fn check_and_record(&mut self, originator: IpAddr, rreq_id: u32) -> bool {
        let key = (originator, rreq_id);
        if self.members.contains(&key) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(key);
        self.members.insert(key);
        false
    }
}

pub struct PathDiscovery {
    pending: Mutex<HashMap<IpAddr, PendingRoute>>,
    seen: Mutex<SeenRequestSet>,
    rreq_counter: AtomicU32,
    queue_max: usize,
    deadline: Duration,
}

/// What the caller should do after handing an outbound datagram to `PathDiscovery`.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No discovery was already underway for this destination; issue an RREQ with this id.
    IssueRreq(u32),
    /// Discovery is already underway; the packet was buffered (or dropped if the queue was full).
    Buffered,
}

impl PathDiscovery {
    pub fn new(queue_max: usize, deadline: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            seen: Mutex::new(SeenRequestSet::new(SEEN_REQUEST_CAPACITY)),
            rreq_counter: AtomicU32::new(1),
            queue_max,
            deadline,
        }
    }

    /// Records an outbound datagram with no known route. Starts a new `PendingRoute` (and tells
    /// the caller to issue an RREQ) if none exists yet for `dst_ip`; otherwise buffers alongside
    /// whatever is already pending.
    pub async fn submit(&self, dst_ip: IpAddr, packet: Vec<u8>) -> Outcome {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(&dst_ip) {
            Some(route) => {
                if route.buffered.len() < self.queue_max {
                    route.buffered.push_back(packet);
                }
                Outcome::Buffered
            }
            None => {
                let rreq_id = self.rreq_counter.fetch_add(1, Ordering::Relaxed);
                let mut buffered = VecDeque::new();
                buffered.push_back(packet);
                pending.insert(
                    dst_ip,
                    PendingRoute {
                        rreq_id,
                        buffered,
                        deadline: Instant::now() + self.deadline,
                    },
                );
                Outcome::IssueRreq(rreq_id)
            }
        }
    }

    /// An RREP resolved `dst_ip`: drains and returns the buffered datagrams for the caller to
    /// forward now that a route exists. `RrepMessage` carries no `rreq_id` on the wire, so this
    /// relies on the "at most one outstanding `PendingRoute` per destination" invariant rather
    /// than matching the id that was issued.
    pub async fn resolve(&self, dst_ip: IpAddr) -> Option<VecDeque<Vec<u8>>> {
        self.pending.lock().await.remove(&dst_ip).map(|route| route.buffered)
    }

    /// Drops every `PendingRoute` whose deadline has lapsed, per IP semantics: silently, with no
    /// failure surfaced to the application. Returns the destinations dropped, for logging.
    pub async fn sweep_expired(&self) -> Vec<IpAddr> {
        let mut pending = self.pending.lock().await;
        let now = Instant::now();
        let expired: Vec<IpAddr> = pending
            .iter()
            .filter(|(_, route)| now >= route.deadline)
            .map(|(dst, _)| *dst)
            .collect();
        for dst in &expired {
            pending.remove(dst);
        }
        expired
    }

    /// Returns `true` if `(originator, rreq_id)` has already been processed; otherwise records it
    /// and returns `false`, meaning the caller should continue processing this RREQ.
    pub async fn check_and_record_seen(&self, originator: IpAddr, rreq_id: u32) -> bool {
        self.seen.lock().await.check_and_record(originator, rreq_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn dst() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))
    }

    #[tokio::test]
    async fn first_submit_issues_rreq() {
        let discovery = PathDiscovery::new(8, Duration::from_secs(1));
        let outcome = discovery.submit(dst(), vec![1]).await;
        assert!(matches!(outcome, Outcome::IssueRreq(_)));
    }

    #[tokio::test]
    async fn second_submit_just_buffers() {
        let discovery = PathDiscovery::new(8, Duration::from_secs(1));
        discovery.submit(dst(), vec![1]).await;
        let outcome = discovery.submit(dst(), vec![2]).await;
        assert_eq!(outcome, Outcome::Buffered);
    }

    #[tokio::test]
    async fn resolve_drains_buffered_packets_in_order() {
        let discovery = PathDiscovery::new(8, Duration::from_secs(1));
        discovery.submit(dst(), vec![1]).await;
        discovery.submit(dst(), vec![2]).await;
        let drained = discovery.resolve(dst()).await.unwrap();
        assert_eq!(drained, VecDeque::from([vec![1], vec![2]]));
    }

    #[tokio::test]
    async fn queue_overflow_drops_newest() {
        let discovery = PathDiscovery::new(1, Duration::from_secs(1));
        discovery.submit(dst(), vec![1]).await;
        discovery.submit(dst(), vec![2]).await;
        let drained = discovery.resolve(dst()).await.unwrap();
        assert_eq!(drained, VecDeque::from([vec![1]]));
    }

    #[tokio::test]
    async fn expired_pending_route_is_swept() {
        let discovery = PathDiscovery::new(8, Duration::from_millis(1));
        discovery.submit(dst(), vec![1]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(discovery.sweep_expired().await, vec![dst()]);
    }

    #[tokio::test]
    async fn rreq_dedup_flags_second_occurrence() {
        let discovery = PathDiscovery::new(8, Duration::from_secs(1));
        let originator = dst();
        assert!(!discovery.check_and_record_seen(originator, 42).await);
        assert!(discovery.check_and_record_seen(originator, 42).await);
    }
}
