//! Datagram Sockets
//!
//! The transport only needs unreliable, unordered, nonblocking datagrams.
//! `UdpDatagramSocket` provides them over a tokio UDP socket;
//! `MemoryNetwork` provides them in-process with controllable loss for
//! deterministic tests.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::UdpSocket;
use tracing::debug;

/// Nonblocking, unreliable datagram endpoint.
///
/// Neither method may wait: `recv_from` returns `Ok(None)` when nothing is
/// queued. Sends are best-effort.
pub trait DatagramSocket {
    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> io::Result<()>;

    /// Receive one datagram into `buf`, returning its length and sender.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

// =============================================================================
// UDP
// =============================================================================

/// Tokio UDP socket driven with `try_*` calls only.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    /// Bind to `addr`. Must be called inside a tokio runtime.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(local = %socket.local_addr()?, "udp socket bound");
        Ok(Self { socket })
    }

    /// Wait until a datagram is queued. For loops that idle between ticks.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.socket.try_send_to(bytes, addr).map(|_| ())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.try_recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// LAN-routable address of this machine, to show to the joiner.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface. Falls back to loopback when there is no route.
pub fn discover_local_ip() -> IpAddr {
    let route = || -> io::Result<IpAddr> {
        let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match route() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("local ip discovery failed: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

// =============================================================================
// IN-MEMORY NETWORK
// =============================================================================

/// Decides whether a datagram `from → to` is lost. Return `true` to drop.
pub type DropFilter = Box<dyn FnMut(SocketAddr, SocketAddr, &[u8]) -> bool + Send>;

#[derive(Default)]
struct NetworkInner {
    queues: BTreeMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    filter: Option<DropFilter>,
    delivered: u64,
    dropped: u64,
}

/// Shared in-process datagram fabric.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        // A panicking test thread must not wedge the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach an endpoint at `addr`.
    pub fn bind(&self, addr: SocketAddr) -> MemorySocket {
        self.lock().queues.entry(addr).or_default();
        MemorySocket { addr, network: self.clone() }
    }

    /// Install a loss model.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(SocketAddr, SocketAddr, &[u8]) -> bool + Send + 'static,
    {
        self.lock().filter = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        self.lock().filter = None;
    }

    /// Datagrams handed to a queue so far.
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    /// Datagrams eaten by the drop filter so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Inject raw bytes as if `from` had sent them.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        let mut inner = self.lock();
        if let Some(queue) = inner.queues.get_mut(&to) {
            queue.push_back((from, bytes.to_vec()));
            inner.delivered += 1;
        }
    }
}

/// Endpoint on a `MemoryNetwork`.
pub struct MemorySocket {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        let mut inner = self.network.lock();
        let inner = &mut *inner;
        let lost = inner
            .filter
            .as_mut()
            .is_some_and(|filter| filter(self.addr, addr, bytes));
        if lost {
            inner.dropped += 1;
            return Ok(());
        }
        // Like UDP, sending to nobody is not an error
        if let Some(queue) = inner.queues.get_mut(&addr) {
            queue.push_back((self.addr, bytes.to_vec()));
            inner.delivered += 1;
        }
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut inner = self.network.lock();
        let queued = inner.queues.get_mut(&self.addr).and_then(|q| q.pop_front());
        let Some((from, bytes)) = queued else {
            return Ok(None);
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
