//! Linux TUN adapter: opens `/dev/net/tun`, attaches it to a named interface via `TUNSETIFF`, and
//! bridges the blocking character device to async callers with a pair of dedicated OS threads,
//! one per direction, each talking to the rest of the daemon over a bounded channel.

use crate::{
    Tunnel,
    TransportError,
};
use async_trait::async_trait;
use std::{
    ffi::CString,
    io,
    os::fd::{
        AsRawFd,
        FromRawFd,
        OwnedFd,
        RawFd,
    },
};
use tokio::sync::{
    mpsc,
    Mutex,
};

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const QUEUE_CAPACITY: usize = 256;
const MAX_PACKET: usize = 65536;

#[repr(C)]
struct IfReq {
    name: [u8; libc::IFNAMSIZ],
    flags: libc::c_short,
    _padding: [u8; 22],
}

impl IfReq {
    fn named(name: &str) -> Result<Self, TransportError> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(TransportError::InterfaceNameTooLong(name.to_owned()));
        }
        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            flags: IFF_TUN | IFF_NO_PI,
            _padding: [0; 22],
        };
        req.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(req)
    }
}

pub struct LinuxTun {
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl LinuxTun {
    /// Opens (or attaches to, if already up) the named TUN interface and starts its send/recv
    /// worker threads.
    pub fn new(iface_name: &str) -> Result<Self, TransportError> {
        let fd = open_tun(iface_name)?;
        let fd = std::sync::Arc::new(fd);

        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(QUEUE_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(QUEUE_CAPACITY);

        std::thread::Builder::new()
            .name("adhoc-tun-recv".into())
            .spawn({
                let fd = fd.clone();
                move || loop {
                    let mut buf = vec![0u8; MAX_PACKET];
                    match read_fd(fd.as_raw_fd(), &mut buf) {
                        Ok(n) => {
                            buf.truncate(n);
                            if inbound_tx.blocking_send(buf).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            log::error!("tun read failed: {err}");
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn adhoc-tun-recv thread");

        std::thread::Builder::new()
            .name("adhoc-tun-send".into())
            .spawn({
                let fd = fd.clone();
                move || {
                    while let Some(packet) = outbound_rx.blocking_recv() {
                        if let Err(err) = write_fd(fd.as_raw_fd(), &packet) {
                            log::error!("tun write failed: {err}");
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn adhoc-tun-send thread");

        Ok(Self {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
        })
    }
}

#[async_trait]
impl Tunnel for LinuxTun {
    async fn recv(&self) -> io::Result<Vec<u8>> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "tun recv thread exited"))
    }

    async fn send(&self, packet: &[u8]) -> io::Result<()> {
        self.outbound
            .send(packet.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tun send thread exited"))
    }
}

fn open_tun(iface_name: &str) -> Result<OwnedFd, TransportError> {
    let path = CString::new("/dev/net/tun").expect("no interior nul");
    let raw_fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if raw_fd < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }
    // Safety: raw_fd was just opened successfully and is not used again outside this OwnedFd.
    let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

    let mut request = IfReq::named(iface_name)?;
    let result = unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF, &mut request as *mut IfReq) };
    if result < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }

    Ok(fd)
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    match unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) } {
        n if n < 0 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    match unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) } {
        n if n < 0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_interface_name_longer_than_ifnamsiz() {
        let name = "a".repeat(libc::IFNAMSIZ);
        assert!(matches!(IfReq::named(&name), Err(TransportError::InterfaceNameTooLong(_))));
    }

    #[test]
    fn accepts_typical_interface_name() {
        assert!(IfReq::named("adhoc0").is_ok());
    }
}
