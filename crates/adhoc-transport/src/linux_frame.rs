//! Linux frame transport: an `AF_PACKET` raw socket bound to a physical interface, filtered to
//! the custom EtherType this daemon owns. Framing (destination MAC, source MAC, EtherType) is
//! handled entirely here; everything above this module deals only in MAC addresses and payload
//! bytes.

use crate::{
    FrameTransport,
    TransportError,
    ETHER_TYPE_ADHOC,
};
use adhoc_common::MacAddr;
use async_trait::async_trait;
use socket2::{
    Domain,
    Protocol,
    Socket,
    Type,
};
use std::{
    ffi::CString,
    io,
    os::fd::{
        AsRawFd,
        FromRawFd,
        IntoRawFd,
        OwnedFd,
        RawFd,
    },
    sync::Arc,
};
use tokio::sync::{
    mpsc,
    Mutex,
};

const QUEUE_CAPACITY: usize = 256;
const ETH_HEADER_LEN: usize = 14;
const MAX_FRAME: usize = 1514;

#[repr(C)]
struct IfReqHwAddr {
    name: [u8; libc::IFNAMSIZ],
    sa_family: u16,
    sa_data: [u8; 14],
    _padding: [u8; 8],
}

#[repr(C)]
struct SockaddrLl {
    sll_family: u16,
    sll_protocol: u16,
    sll_ifindex: i32,
    sll_hatype: u16,
    sll_pkttype: u8,
    sll_halen: u8,
    sll_addr: [u8; 8],
}

pub struct LinuxFrameTransport {
    local_mac: MacAddr,
    outbound: mpsc::Sender<(MacAddr, Vec<u8>)>,
    inbound: Mutex<mpsc::Receiver<(MacAddr, Vec<u8>)>>,
}

impl LinuxFrameTransport {
    pub fn new(iface_name: &str) -> Result<Self, TransportError> {
        let local_mac = interface_mac(iface_name)?;
        let fd = Arc::new(open_raw_socket(iface_name)?);

        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<(MacAddr, Vec<u8>)>(QUEUE_CAPACITY);

        std::thread::Builder::new()
            .name("adhoc-frame-recv".into())
            .spawn({
                let fd = fd.clone();
                move || loop {
                    let mut buf = vec![0u8; MAX_FRAME];
                    match recv_frame(fd.as_raw_fd(), &mut buf) {
                        Ok(Some((src, n))) => {
                            let payload = buf[ETH_HEADER_LEN..n].to_vec();
                            if inbound_tx.blocking_send((src, payload)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => continue,
                        Err(err) => {
                            log::error!("frame recv failed: {err}");
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn adhoc-frame-recv thread");

        std::thread::Builder::new()
            .name("adhoc-frame-send".into())
            .spawn({
                let fd = fd.clone();
                move || {
                    while let Some((dst, payload)) = outbound_rx.blocking_recv() {
                        let frame = build_frame(dst, local_mac, &payload);
                        if let Err(err) = send_frame(fd.as_raw_fd(), &frame) {
                            log::error!("frame send failed: {err}");
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn adhoc-frame-send thread");

        Ok(Self {
            local_mac,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
        })
    }
}

#[async_trait]
impl FrameTransport for LinuxFrameTransport {
    async fn recv(&self) -> io::Result<(MacAddr, Vec<u8>)> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "frame recv thread exited"))
    }

    async fn send(&self, dst: MacAddr, payload: &[u8]) -> io::Result<()> {
        self.outbound
            .send((dst, payload.to_vec()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "frame send thread exited"))
    }

    fn local_mac(&self) -> MacAddr {
        self.local_mac
    }
}

fn build_frame(dst: MacAddr, src: MacAddr, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + payload.len());
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&ETHER_TYPE_ADHOC.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Returns `Ok(None)` for frames shorter than a bare Ethernet header, which the kernel should
/// never hand us on a bound `AF_PACKET` socket but which cost nothing to guard against.
fn recv_frame(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<(MacAddr, usize)>> {
    let n = match unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) } {
        n if n < 0 => return Err(io::Error::last_os_error()),
        n => n as usize,
    };
    if n < ETH_HEADER_LEN {
        return Ok(None);
    }
    let mut src = [0u8; 6];
    src.copy_from_slice(&buf[6..12]);
    Ok(Some((MacAddr(src), n)))
}

fn send_frame(fd: RawFd, frame: &[u8]) -> io::Result<()> {
    match unsafe { libc::send(fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0) } {
        n if n < 0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

fn open_raw_socket(iface_name: &str) -> Result<OwnedFd, TransportError> {
    let if_index = interface_index(iface_name)?;
    let protocol_be = ETHER_TYPE_ADHOC.to_be();

    let socket = Socket::new(
        Domain::PACKET,
        Type::RAW,
        Some(Protocol::from(protocol_be as i32)),
    )
    .map_err(TransportError::Io)?;
    let fd = socket.into_raw_fd();

    let addr = SockaddrLl {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: protocol_be,
        sll_ifindex: if_index as i32,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 6,
        sll_addr: [0; 8],
    };
    let result = unsafe {
        libc::bind(
            fd,
            &addr as *const SockaddrLl as *const libc::sockaddr,
            std::mem::size_of::<SockaddrLl>() as u32,
        )
    };
    if result < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }

    // Safety: fd was just bound successfully and is not used again outside this OwnedFd.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn interface_index(iface_name: &str) -> Result<u32, TransportError> {
    let name = CString::new(iface_name).map_err(|_| TransportError::InterfaceNameTooLong(iface_name.to_owned()))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(TransportError::InterfaceLookup(iface_name.to_owned(), io::Error::last_os_error()));
    }
    Ok(index)
}

fn interface_mac(iface_name: &str) -> Result<MacAddr, TransportError> {
    if iface_name.len() >= libc::IFNAMSIZ {
        return Err(TransportError::InterfaceNameTooLong(iface_name.to_owned()));
    }

    let socket = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if socket < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }
    // Safety: socket was just opened successfully.
    let socket = unsafe { OwnedFd::from_raw_fd(socket) };

    let mut request = IfReqHwAddr {
        name: [0; libc::IFNAMSIZ],
        sa_family: 0,
        sa_data: [0; 14],
        _padding: [0; 8],
    };
    request.name[..iface_name.len()].copy_from_slice(iface_name.as_bytes());

    const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
    let result = unsafe { libc::ioctl(socket.as_raw_fd(), SIOCGIFHWADDR, &mut request as *mut IfReqHwAddr) };
    if result < 0 {
        return Err(TransportError::InterfaceLookup(iface_name.to_owned(), io::Error::last_os_error()));
    }

    let mut octets = [0u8; 6];
    octets.copy_from_slice(&request.sa_data[..6]);
    Ok(MacAddr(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_places_ethertype_after_both_macs() {
        let dst = MacAddr([0xaa; 6]);
        let src = MacAddr([0xbb; 6]);
        let frame = build_frame(dst, src, &[1, 2, 3]);
        assert_eq!(&frame[0..6], &dst.octets());
        assert_eq!(&frame[6..12], &src.octets());
        assert_eq!(&frame[12..14], &ETHER_TYPE_ADHOC.to_be_bytes());
        assert_eq!(&frame[14..], &[1, 2, 3]);
    }

    #[test]
    fn rejects_overlong_interface_name() {
        let name = "x".repeat(libc::IFNAMSIZ);
        assert!(matches!(interface_mac(&name), Err(TransportError::InterfaceNameTooLong(_))));
    }
}
