//! An in-memory `Tunnel` for tests and non-Linux development builds: packets handed to `send` are
//! what a test harness calls "packets the daemon emitted toward the kernel"; packets a test
//! injects via `inject` are what `recv` hands back, standing in for traffic the kernel routed
//! onto `adhoc0`.

use crate::Tunnel;
use async_trait::async_trait;
use std::io;
use tokio::sync::{
    mpsc,
    Mutex,
};

const QUEUE_CAPACITY: usize = 256;

pub struct MemoryTunnel {
    outbound: mpsc::Sender<Vec<u8>>,
    outbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl Default for MemoryTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTunnel {
    pub fn new() -> Self {
        let (outbound, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            outbound,
            outbound_rx: Mutex::new(outbound_rx),
            inbound_tx,
            inbound: Mutex::new(inbound),
        }
    }

    /// Feeds a packet in as though the kernel had routed it onto `adhoc0`; a later `recv` call
    /// returns it.
    pub async fn inject(&self, packet: Vec<u8>) {
        let _ = self.inbound_tx.send(packet).await;
    }

    /// Drains one packet the daemon handed to `send`, in test-harness order.
    pub async fn take_sent(&self) -> Option<Vec<u8>> {
        self.outbound_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Tunnel for MemoryTunnel {
    async fn recv(&self) -> io::Result<Vec<u8>> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "memory tunnel closed"))
    }

    async fn send(&self, packet: &[u8]) -> io::Result<()> {
        self.outbound
            .send(packet.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory tunnel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_packet_is_received() {
        let tun = MemoryTunnel::new();
        tun.inject(vec![1, 2, 3]).await;
        assert_eq!(tun.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sent_packet_is_observable() {
        let tun = MemoryTunnel::new();
        tun.send(&[9, 9]).await.unwrap();
        assert_eq!(tun.take_sent().await, Some(vec![9, 9]));
    }
}
