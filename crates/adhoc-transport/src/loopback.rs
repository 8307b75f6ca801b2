//! In-process `FrameTransport` fan-out, standing in for a shared radio medium when exercising
//! multiple daemon instances in a single test binary. No real bytes cross a socket; a send simply
//! enqueues onto every other registered node's inbox, mirroring broadcast-domain radio
//! reachability without requiring root or a network namespace.

use crate::FrameTransport;
use adhoc_common::MacAddr;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    io,
    sync::Arc,
};
use tokio::sync::{
    mpsc,
    Mutex,
};

const INBOX_CAPACITY: usize = 256;

type Inbox = mpsc::Sender<(MacAddr, Vec<u8>)>;

/// A shared medium. Clone is cheap; every clone refers to the same set of registered nodes.
#[derive(Clone, Default)]
pub struct LoopbackFabric {
    nodes: Arc<Mutex<HashMap<MacAddr, Inbox>>>,
}

impl LoopbackFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new node on the fabric and returns its transport handle. Panics if `mac` is
    /// already registered; a fabric models distinct radios, not duplicate interfaces.
    pub async fn join(&self, mac: MacAddr) -> LoopbackTransport {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let mut nodes = self.nodes.lock().await;
        assert!(nodes.insert(mac, tx).is_none(), "mac {mac} already joined this fabric");
        LoopbackTransport {
            local: mac,
            nodes: self.nodes.clone(),
            inbox: Mutex::new(rx),
        }
    }
}

pub struct LoopbackTransport {
    local: MacAddr,
    nodes: Arc<Mutex<HashMap<MacAddr, Inbox>>>,
    inbox: Mutex<mpsc::Receiver<(MacAddr, Vec<u8>)>>,
}

#[async_trait]
impl FrameTransport for LoopbackTransport {
    async fn recv(&self) -> io::Result<(MacAddr, Vec<u8>)> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "loopback fabric has no sender"))
    }

    async fn send(&self, dst: MacAddr, payload: &[u8]) -> io::Result<()> {
        let nodes = self.nodes.lock().await;
        if dst == MacAddr::BROADCAST {
            for (mac, tx) in nodes.iter() {
                if *mac != self.local {
                    let _ = tx.send((self.local, payload.to_vec())).await;
                }
            }
            return Ok(());
        }
        match nodes.get(&dst) {
            Some(tx) => tx
                .send((self.local, payload.to_vec()))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer left the fabric")),
            None => Ok(()),
        }
    }

    fn local_mac(&self) -> MacAddr {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unicast_reaches_only_target() {
        let fabric = LoopbackFabric::new();
        let a = fabric.join(MacAddr([0, 0, 0, 0, 0, 1])).await;
        let b = fabric.join(MacAddr([0, 0, 0, 0, 0, 2])).await;
        let c = fabric.join(MacAddr([0, 0, 0, 0, 0, 3])).await;

        a.send(MacAddr([0, 0, 0, 0, 0, 2]), b"hello").await.unwrap();

        let (src, payload) = b.recv().await.unwrap();
        assert_eq!(src, MacAddr([0, 0, 0, 0, 0, 1]));
        assert_eq!(payload, b"hello");
        assert!(c.inbox.try_lock().unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_other_node() {
        let fabric = LoopbackFabric::new();
        let a = fabric.join(MacAddr([0, 0, 0, 0, 0, 1])).await;
        let b = fabric.join(MacAddr([0, 0, 0, 0, 0, 2])).await;
        let c = fabric.join(MacAddr([0, 0, 0, 0, 0, 3])).await;

        a.send(MacAddr::BROADCAST, b"flood").await.unwrap();

        assert_eq!(b.recv().await.unwrap().1, b"flood");
        assert_eq!(c.recv().await.unwrap().1, b"flood");
    }
}
