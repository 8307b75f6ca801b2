use thiserror::Error;

/// Lifecycle-level errors: the ones allowed to escape a worker and reach `main`. Packet-level
/// failures (malformed headers, send failures, ARQ exhaustion, path-discovery timeouts) are
/// recovered locally and never constructed as this type.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("tunnel device failed: {0}")]
    TunnelIo(#[source] std::io::Error),
    #[error("physical transport failed: {0}")]
    PhysicalIo(#[source] std::io::Error),
    #[error("transport setup failed: {0}")]
    Transport(#[from] adhoc_transport::TransportError),
    #[error("local IPC endpoint failed: {0}")]
    Ipc(#[source] std::io::Error),
}
