//! Platform boundary for the adhocd routing daemon: a `Tunnel` carries IP packets
//! to and from the host's network stack, a `FrameTransport` carries Ethernet frames to and from
//! the physical (or simulated) radio medium. Everything upstream of these two traits is platform
//! agnostic; only the adapters in this crate know about `/dev/net/tun` or `AF_PACKET`.

mod error;
mod loopback;
mod tun_memory;

#[cfg(target_os = "linux")]
mod linux_frame;
#[cfg(target_os = "linux")]
mod linux_tun;

pub use error::TransportError;
pub use loopback::LoopbackFabric;
pub use tun_memory::MemoryTunnel;

#[cfg(target_os = "linux")]
pub use linux_frame::LinuxFrameTransport;
#[cfg(target_os = "linux")]
pub use linux_tun::LinuxTun;

use adhoc_common::MacAddr;
use async_trait::async_trait;

/// Custom EtherType carried by every frame this daemon puts on the wire, chosen outside the IANA
/// assigned range so real IP/ARP traffic on the same link is never mistaken for ours.
pub const ETHER_TYPE_ADHOC: u16 = 0x7777;

/// The host side of the daemon: packets written to the TUN device are IP packets the kernel
/// routed to `adhoc0`; packets read back out are delivered to the kernel as if they arrived on
/// that interface.
#[async_trait]
pub trait Tunnel: Send + Sync {
    async fn recv(&self) -> std::io::Result<Vec<u8>>;
    async fn send(&self, packet: &[u8]) -> std::io::Result<()>;
}

/// The radio side of the daemon: frames are exchanged with whatever physical or simulated medium
/// carries them to other nodes. `send` addresses a single neighbor by MAC; broadcast is `send` to
/// `MacAddr::BROADCAST`.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn recv(&self) -> std::io::Result<(MacAddr, Vec<u8>)>;
    async fn send(&self, dst: MacAddr, payload: &[u8]) -> std::io::Result<()>;
    fn local_mac(&self) -> MacAddr;
}
