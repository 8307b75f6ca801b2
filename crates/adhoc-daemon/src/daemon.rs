//! Daemon lifecycle: stands up the platform transports, builds the data handler, and spawns one
//! task per concurrent duty (tunnel reader, physical reader, periodic advertiser, three sweep
//! loops and the IPC listener). Each loop watches a shared `CancellationToken` so `stop` tears
//! every task down instead of leaving orphaned workers behind.

use crate::{
    arq::ArqLayer,
    config::Config,
    discovery::PathDiscovery,
    error::DaemonError,
    handler::Engine,
    ipc::spawn_ipc_listener,
    neighbors::NeighborTable,
    reward::RewardLayer,
    routing::RoutingTable,
};
use adhoc_transport::{
    FrameTransport,
    Tunnel,
};
use log::{
    error,
    info,
    warn,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(target_os = "linux")]
use adhoc_transport::{
    LinuxFrameTransport,
    LinuxTun,
};

/// A running daemon instance: the data handler plus every background task keeping its tables
/// current. Dropping this without calling `shutdown` leaves the workers running detached; `stop`
/// always goes through `shutdown`.
pub struct Daemon {
    engine: Arc<Engine>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Opens the configured TUN device and physical interface, builds the data handler, and
    /// starts every background worker. Only implemented for Linux, where `/dev/net/tun` and
    /// `AF_PACKET` raw sockets are available; other platforms have no transport to construct.
    #[cfg(target_os = "linux")]
    pub async fn start(config: Config) -> Result<Self, DaemonError> {
        let tunnel: Arc<dyn Tunnel> = Arc::new(LinuxTun::new(&config.tun_iface)?);
        let transport: Arc<dyn FrameTransport> = Arc::new(LinuxFrameTransport::new(&config.physical_iface)?);
        Ok(Self::start_with_transports(config, tunnel, transport))
    }

    #[cfg(not(target_os = "linux"))]
    pub async fn start(_config: Config) -> Result<Self, DaemonError> {
        Err(DaemonError::TunnelIo(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "adhocd has no transport implementation for this platform",
        )))
    }

    /// Builds the data handler over already-constructed transports and spawns its workers. Split
    /// out from `start` so tests can drive the loopback fabric without the Linux-only adapters.
    pub fn start_with_transports(config: Config, tunnel: Arc<dyn Tunnel>, transport: Arc<dyn FrameTransport>) -> Self {
        let engine = Arc::new(Engine::new(
            config.clone(),
            tunnel.clone(),
            transport.clone(),
            Arc::new(RoutingTable::new()),
            Arc::new(NeighborTable::new(config.neighbor_ttl)),
            Arc::new(PathDiscovery::new(config.pending_queue_max, config.rreq_deadline)),
            Arc::new(ArqLayer::new(config.arq_max_retries)),
            Arc::new(RewardLayer::new(config.reward_wait)),
        ));
        let cancel = CancellationToken::new();
        let mut workers = Vec::new();

        workers.push(spawn_tunnel_reader(engine.clone(), tunnel, cancel.clone()));
        workers.push(spawn_frame_reader(engine.clone(), transport, cancel.clone()));
        workers.push(spawn_hello_advertiser(engine.clone(), config.hello_interval, cancel.clone()));
        workers.push(spawn_neighbor_sweeper(engine.clone(), config.neighbor_ttl, cancel.clone()));
        workers.push(spawn_arq_sweeper(engine.clone(), config.arq_retry_interval, cancel.clone()));
        workers.push(spawn_reward_sweeper(engine.clone(), config.reward_wait, cancel.clone()));
        workers.push(spawn_discovery_sweeper(engine.clone(), config.rreq_deadline, cancel.clone()));
        workers.push(spawn_ipc_listener(engine.clone(), config.ipc_socket_path.clone(), cancel.clone()));

        info!("adhocd started on {} / {}", config.physical_iface, config.tun_iface);
        Self { engine, cancel, workers }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Resolves once something has cancelled this daemon's token, whether that's a local
    /// `shutdown` call or a remote `shutdown` command over the IPC socket.
    pub async fn wait_until_stopped(&self) {
        self.cancel.cancelled().await;
    }

    /// Cancels every worker and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            if let Err(error) = worker.await {
                warn!("worker task panicked during shutdown: {error}");
            }
        }
    }
}

fn spawn_tunnel_reader(engine: Arc<Engine>, tunnel: Arc<dyn Tunnel>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = tunnel.recv() => match result {
                    Ok(packet) => engine.handle_tunnel_packet(packet).await,
                    Err(error) => {
                        error!("tunnel read failed: {error}");
                        return;
                    }
                },
            }
        }
    })
}

fn spawn_frame_reader(engine: Arc<Engine>, transport: Arc<dyn FrameTransport>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = transport.recv() => match result {
                    Ok((src, frame)) => engine.handle_frame(src, frame).await,
                    Err(error) => {
                        error!("physical read failed: {error}");
                        return;
                    }
                },
            }
        }
    })
}

fn spawn_hello_advertiser(engine: Arc<Engine>, interval: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => engine.send_hello().await,
            }
        }
    })
}

fn spawn_neighbor_sweeper(engine: Arc<Engine>, period: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => engine.sweep_neighbors().await,
            }
        }
    })
}

fn spawn_arq_sweeper(engine: Arc<Engine>, period: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => engine.sweep_arq().await,
            }
        }
    })
}

fn spawn_reward_sweeper(engine: Arc<Engine>, period: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => engine.sweep_reward_timeouts().await,
            }
        }
    })
}

fn spawn_discovery_sweeper(engine: Arc<Engine>, period: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => engine.sweep_discovery().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adhoc_common::MacAddr;
    use adhoc_transport::{
        LoopbackFabric,
        MemoryTunnel,
    };

    #[tokio::test]
    async fn shutdown_stops_every_worker() {
        let fabric = LoopbackFabric::new();
        let transport = fabric.join(MacAddr([1, 2, 3, 4, 5, 6])).await;
        let tunnel = MemoryTunnel::new();

        let mut config = Config::default();
        config.hello_interval = std::time::Duration::from_millis(5);
        let socket_path = std::env::temp_dir().join(format!("adhocd-daemon-test-{}.sock", std::process::id()));
        config.ipc_socket_path = socket_path.to_string_lossy().to_string();

        let daemon = Daemon::start_with_transports(config, Arc::new(tunnel), Arc::new(transport));
        assert_eq!(daemon.workers.len(), 8);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        daemon.shutdown().await;
        let _ = std::fs::remove_file(&socket_path);
    }
}
