//! Automatic repeat request: per-packet retransmission with bounded retries on the
//! send side, and duplicate suppression on the receive side.

use adhoc_common::MacAddr;
use std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    net::IpAddr,
};
use tokio::sync::Mutex;

const INBOUND_SEEN_CAPACITY: usize = 1024;

struct ReliableSendRecord {
    dst_mac: MacAddr,
    dst_ip: IpAddr,
    payload: Vec<u8>,
    retry_count: u32,
}

pub struct ArqLayer {
    outstanding: Mutex<HashMap<u32, ReliableSendRecord>>,
    inbound_seen_order: Mutex<VecDeque<(MacAddr, u32)>>,
    inbound_seen: Mutex<HashSet<(MacAddr, u32)>>,
    max_retries: u32,
}

/// A record whose retries are exhausted: the caller purges it and applies `ARQ_FAIL_REWARD` to
/// `dst_mac`.
pub struct Exhausted {
    pub msg_id: u32,
    pub dst_mac: MacAddr,
    pub dst_ip: IpAddr,
}

/// A record due for another retransmission attempt.
pub struct RetryDue {
    pub msg_id: u32,
    pub dst_mac: MacAddr,
    pub payload: Vec<u8>,
}

/// An ACK resolved a record, carrying back what the caller needs to credit the chosen neighbor.
#[derive(Debug, PartialEq, Eq)]
pub struct Acknowledged {
    pub dst_mac: MacAddr,
    pub dst_ip: IpAddr,
}

impl ArqLayer {
    pub fn new(max_retries: u32) -> Self {
        Self {
            outstanding: Mutex::new(HashMap::new()),
            inbound_seen_order: Mutex::new(VecDeque::new()),
            inbound_seen: Mutex::new(HashSet::new()),
            max_retries,
        }
    }

    pub async fn register(&self, msg_id: u32, dst_mac: MacAddr, dst_ip: IpAddr, payload: Vec<u8>) {
        self.outstanding.lock().await.insert(
            msg_id,
            ReliableSendRecord {
                dst_mac,
                dst_ip,
                payload,
                retry_count: 0,
            },
        );
    }

    /// Clears the record for `msg_id` if it was waiting on `from_mac`, signaling the caller to
    /// apply a positive reward. Returns `None` for an ACK with no matching outstanding record
    /// (already resolved, or never ours).
    pub async fn acknowledge(&self, msg_id: u32, from_mac: MacAddr) -> Option<Acknowledged> {
        let mut outstanding = self.outstanding.lock().await;
        match outstanding.get(&msg_id) {
            Some(record) if record.dst_mac == from_mac => {
                let record = outstanding.remove(&msg_id).unwrap();
                Some(Acknowledged {
                    dst_mac: from_mac,
                    dst_ip: record.dst_ip,
                })
            }
            _ => None,
        }
    }

    /// Splits every outstanding record into one that should be retransmitted now, or one whose
    /// retries are exhausted and must be purged. Called periodically by the retransmit worker.
    pub async fn sweep_retries(&self) -> (Vec<RetryDue>, Vec<Exhausted>) {
        let mut outstanding = self.outstanding.lock().await;
        let mut due = Vec::new();
        let mut exhausted = Vec::new();

        let exhausted_ids: Vec<u32> = outstanding
            .iter()
            .filter(|(_, record)| record.retry_count >= self.max_retries)
            .map(|(msg_id, _)| *msg_id)
            .collect();
        for msg_id in exhausted_ids {
            if let Some(record) = outstanding.remove(&msg_id) {
                exhausted.push(Exhausted {
                    msg_id,
                    dst_mac: record.dst_mac,
                    dst_ip: record.dst_ip,
                });
            }
        }

        for (msg_id, record) in outstanding.iter_mut() {
            record.retry_count += 1;
            due.push(RetryDue {
                msg_id: *msg_id,
                dst_mac: record.dst_mac,
                payload: record.payload.clone(),
            });
        }

        (due, exhausted)
    }

    /// Returns `true` if `(src_mac, msg_id)` has already been delivered to the upper layer.
    /// Otherwise records it and returns `false`.
    pub async fn check_duplicate(&self, src_mac: MacAddr, msg_id: u32) -> bool {
        let key = (src_mac, msg_id);
        let mut seen = self.inbound_seen.lock().await;
        if seen.contains(&key) {
            return true;
        }
        let mut order = self.inbound_seen_order.lock().await;
        if order.len() >= INBOUND_SEEN_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        order.push_back(key);
        seen.insert(key);
        false
    }
}
