use thiserror::Error;

/// Errors raised while standing up or tearing down a platform transport. Per-packet I/O failures
/// are reported as plain `std::io::Error` through the `Tunnel`/`FrameTransport` trait methods;
/// this type is reserved for setup-time failures a caller can't retry around.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("interface name {0:?} does not fit in IFNAMSIZ")]
    InterfaceNameTooLong(String),
    #[error("failed to resolve interface index for {0:?}: {1}")]
    InterfaceLookup(String, #[source] std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
