//! Platform datagram transport
//!
//! POSIX systems use a UNIX-domain datagram socket in the state directory.
//! Windows has no usable equivalent in std, so the bus falls back to a
//! fixed loopback UDP port there. UDP is also available on POSIX.

use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
#[cfg(unix)]
use std::os::unix::net::UnixDatagram;
#[cfg(unix)]
use std::path::Path;
use std::path::PathBuf;
#[cfg(unix)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[cfg(unix)]
use sense_emu_registers::SensorFile;
use tracing::debug;

/// Datagram a reader sends to join the broadcast set
pub const HELLO: &[u8] = b"hello";

/// Where the bus writer listens (or, for readers, where they are bound)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StickAddress {
    #[cfg(unix)]
    Unix(PathBuf),
    Udp(SocketAddr),
}

impl StickAddress {
    /// Loopback UDP port used where UNIX sockets are unavailable
    pub const DEFAULT_PORT: u16 = 53753;

    /// The platform address for a bus living in `state_dir`
    pub fn in_dir(state_dir: &std::path::Path, port: u16) -> Self {
        #[cfg(unix)]
        {
            let _ = port;
            StickAddress::Unix(SensorFile::Stick.path_in(state_dir))
        }
        #[cfg(not(unix))]
        {
            let _ = state_dir;
            StickAddress::Udp(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        }
    }

    /// The platform address in the default state directory
    pub fn platform_default() -> Self {
        Self::in_dir(&sense_emu_registers::state_dir(), Self::DEFAULT_PORT)
    }
}

impl fmt::Display for StickAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            StickAddress::Unix(path) => write!(f, "{}", path.display()),
            StickAddress::Udp(addr) => write!(f, "udp://{addr}"),
        }
    }
}

/// A bound datagram socket of either family
pub(crate) enum Socket {
    #[cfg(unix)]
    Unix(UnixDatagram),
    Udp(UdpSocket),
}

#[cfg(unix)]
static CLIENT_SEQ: AtomicUsize = AtomicUsize::new(0);

impl Socket {
    /// Bind the writer's socket, replacing a leftover socket file
    ///
    /// Returns the bound address, which differs from `address` when a UDP
    /// port of 0 was requested.
    pub(crate) fn bind_server(address: &StickAddress) -> io::Result<(Self, StickAddress)> {
        match address {
            #[cfg(unix)]
            StickAddress::Unix(path) => {
                remove_socket_file(path)?;
                let socket = UnixDatagram::bind(path)?;
                Ok((Socket::Unix(socket), address.clone()))
            }
            StickAddress::Udp(addr) => {
                let socket = UdpSocket::bind(addr)?;
                let local = socket.local_addr()?;
                Ok((Socket::Udp(socket), StickAddress::Udp(local)))
            }
        }
    }

    /// Bind a reader socket able to talk to `server`
    ///
    /// UNIX readers get a named socket next to the server's, since the
    /// writer needs an address to send to. The path is returned so the
    /// caller can remove it when done.
    pub(crate) fn bind_client(server: &StickAddress) -> io::Result<(Self, Option<PathBuf>)> {
        match server {
            #[cfg(unix)]
            StickAddress::Unix(path) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let seq = CLIENT_SEQ.fetch_add(1, Ordering::Relaxed);
                let name = match seq {
                    0 => format!("rpi-sense-emu-client-{}", std::process::id()),
                    n => format!("rpi-sense-emu-client-{}-{}", std::process::id(), n),
                };
                let own = dir.join(name);
                remove_socket_file(&own)?;
                let socket = UnixDatagram::bind(&own)?;
                debug!("Bound stick reader at {}", own.display());
                Ok((Socket::Unix(socket), Some(own)))
            }
            StickAddress::Udp(addr) => {
                let local: SocketAddr = if addr.is_ipv4() {
                    (Ipv4Addr::LOCALHOST, 0).into()
                } else {
                    (Ipv6Addr::LOCALHOST, 0).into()
                };
                Ok((Socket::Udp(UdpSocket::bind(local)?), None))
            }
        }
    }

    #[allow(unreachable_patterns)]
    pub(crate) fn send_to(&self, buf: &[u8], to: &StickAddress) -> io::Result<usize> {
        match (self, to) {
            #[cfg(unix)]
            (Socket::Unix(socket), StickAddress::Unix(path)) => socket.send_to(buf, path),
            (Socket::Udp(socket), StickAddress::Udp(addr)) => socket.send_to(buf, addr),
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("cannot send to {to}: address family mismatch"),
            )),
        }
    }

    /// Receive one datagram and the sender's address, if it has one
    pub(crate) fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<StickAddress>)> {
        match self {
            #[cfg(unix)]
            Socket::Unix(socket) => {
                let (n, addr) = socket.recv_from(buf)?;
                Ok((
                    n,
                    addr.as_pathname()
                        .map(|p| StickAddress::Unix(p.to_path_buf())),
                ))
            }
            Socket::Udp(socket) => {
                let (n, addr) = socket.recv_from(buf)?;
                Ok((n, Some(StickAddress::Udp(addr))))
            }
        }
    }

    pub(crate) fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Socket::Unix(socket) => socket.recv(buf),
            Socket::Udp(socket) => socket.recv(buf),
        }
    }

    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Socket::Unix(socket) => socket.set_nonblocking(nonblocking),
            Socket::Udp(socket) => socket.set_nonblocking(nonblocking),
        }
    }

    /// Blocking receive timeout; `None` blocks forever. Must not be zero.
    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Socket::Unix(socket) => socket.set_read_timeout(timeout),
            Socket::Udp(socket) => socket.set_read_timeout(timeout),
        }
    }

    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            #[cfg(unix)]
            Socket::Unix(socket) => socket.try_clone().map(Socket::Unix),
            Socket::Udp(socket) => socket.try_clone().map(Socket::Udp),
        }
    }
}

/// Remove a socket file, treating a missing file as success
#[cfg(unix)]
pub(crate) fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// The peer is gone: its socket file vanished or nobody is listening
pub(crate) fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
    )
}

/// A receive gave up without data
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
