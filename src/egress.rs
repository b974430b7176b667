//! Outbound connections, optionally pinned to a network interface.
//!
//! Without an interface this is a plain connect using the OS routing table.
//! With one, the socket is created by hand so `SO_BINDTODEVICE` can be set
//! before the connect handshake. A failed bind is logged and the connect
//! goes ahead on default routing; failing to create the socket at all
//! aborts the dial.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::error::DialError;
use crate::relay::Dial;
use crate::stats::Stats;

/// Creates outbound sockets and binds them to a named interface.
pub trait DeviceBinder: Send + Sync {
    /// Create the socket that will be bound. A failure here aborts the dial.
    fn open(&self, domain: Domain, ty: Type, protocol: Protocol) -> io::Result<Socket> {
        Socket::new(domain, ty, Some(protocol))
    }

    fn bind_device(&self, socket: &Socket, interface: &str) -> io::Result<()>;
}

/// `SO_BINDTODEVICE`, where the platform has it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoBindToDevice;

impl DeviceBinder for SoBindToDevice {
    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    fn bind_device(&self, socket: &Socket, interface: &str) -> io::Result<()> {
        socket.bind_device(Some(interface.as_bytes()))
    }

    #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
    fn bind_device(&self, _socket: &Socket, _interface: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "binding to an interface is not supported on this platform",
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Stream,
    Datagram,
}

/// A dialable network name: `tcp`, `tcp4`, `tcp6`, `udp`, `udp4`, `udp6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    transport: Transport,
    /// `Some(true)` for IPv4 only, `Some(false)` for IPv6 only.
    ipv4: Option<bool>,
}

impl Network {
    fn accepts(&self, addr: &SocketAddr) -> bool {
        self.ipv4.is_none_or(|v4| v4 == addr.is_ipv4())
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, ipv4) = match s {
            "tcp" => (Transport::Stream, None),
            "tcp4" => (Transport::Stream, Some(true)),
            "tcp6" => (Transport::Stream, Some(false)),
            "udp" => (Transport::Datagram, None),
            "udp4" => (Transport::Datagram, Some(true)),
            "udp6" => (Transport::Datagram, Some(false)),
            _ => return Err(DialError::UnsupportedNetwork(s.to_string())),
        };
        Ok(Self { transport, ipv4 })
    }
}

/// An established outbound connection.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Connection::Tcp(stream) => stream.peer_addr(),
            Connection::Udp(socket) => socket.peer_addr(),
        }
    }

    pub fn into_tcp(self) -> Option<TcpStream> {
        match self {
            Connection::Tcp(stream) => Some(stream),
            Connection::Udp(_) => None,
        }
    }
}

/// Opens outbound connections on behalf of proxy clients.
///
/// The interface binding is fixed at construction and shared read-only by
/// every dial.
pub struct EgressDialer {
    interface: Option<String>,
    binder: Arc<dyn DeviceBinder>,
    stats: Option<Arc<Stats>>,
}

impl EgressDialer {
    /// Create a dialer; `None` or an empty name means default routing.
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface: interface.filter(|name| !name.is_empty()),
            binder: Arc::new(SoBindToDevice),
            stats: None,
        }
    }

    /// Replace the interface binder.
    pub fn with_binder(mut self, binder: Arc<dyn DeviceBinder>) -> Self {
        self.binder = binder;
        self
    }

    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Connect to `address` (`host:port`) over `network`.
    ///
    /// Non-literal hosts are looked up with the system resolver and tried in
    /// order; the last failure is returned if none connects.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError> {
        let network: Network = network.parse()?;
        let targets = resolve_targets(network, address).await?;
        self.dial_targets(network, address, targets).await
    }

    async fn dial_targets(
        &self,
        network: Network,
        address: &str,
        targets: Vec<SocketAddr>,
    ) -> Result<Connection, DialError> {
        let mut bind_warned = false;
        let mut last_err = None;
        for addr in targets {
            match self.dial_addr(network, addr, &mut bind_warned).await {
                Ok(conn) => {
                    debug!(%addr, interface = self.interface(), "dialed");
                    return Ok(conn);
                }
                Err(err @ DialError::Control(_)) => return Err(err),
                Err(err) => {
                    debug!(%addr, error = %err, "dial attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DialError::InvalidAddress(format!("no suitable address for {}", address))))
    }

    /// `bind_warned` is shared by every attempt of one dial so a failing
    /// interface is reported once.
    async fn dial_addr(
        &self,
        network: Network,
        addr: SocketAddr,
        bind_warned: &mut bool,
    ) -> Result<Connection, DialError> {
        let Some(interface) = self.interface.as_deref() else {
            return dial_default(network.transport, addr).await;
        };

        let (ty, protocol) = match network.transport {
            Transport::Stream => (Type::STREAM, Protocol::TCP),
            Transport::Datagram => (Type::DGRAM, Protocol::UDP),
        };
        let socket = self
            .binder
            .open(Domain::for_address(addr), ty, protocol)
            .map_err(DialError::Control)?;

        if let Err(err) = self.binder.bind_device(&socket, interface) {
            if *bind_warned {
                debug!(interface, %addr, error = %err, "interface bind failed again");
            } else {
                *bind_warned = true;
                warn!(
                    interface,
                    %addr,
                    error = %err,
                    "failed to bind to interface, using default routing"
                );
                if let Some(stats) = &self.stats {
                    stats.record_bind_warning();
                }
            }
        }

        socket.set_nonblocking(true).map_err(DialError::Control)?;

        let connect_err = |source| DialError::Connect { addr, source };
        match network.transport {
            Transport::Stream => {
                let socket = TcpSocket::from_std_stream(socket.into());
                let stream = socket.connect(addr).await.map_err(connect_err)?;
                Ok(Connection::Tcp(stream))
            }
            Transport::Datagram => {
                let socket = UdpSocket::from_std(socket.into()).map_err(DialError::Control)?;
                socket.connect(addr).await.map_err(connect_err)?;
                Ok(Connection::Udp(socket))
            }
        }
    }
}

async fn dial_default(transport: Transport, addr: SocketAddr) -> Result<Connection, DialError> {
    let connect_err = |source| DialError::Connect { addr, source };
    match transport {
        Transport::Stream => {
            let stream = TcpStream::connect(addr).await.map_err(connect_err)?;
            Ok(Connection::Tcp(stream))
        }
        Transport::Datagram => {
            let local: SocketAddr = if addr.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(local).await.map_err(connect_err)?;
            socket.connect(addr).await.map_err(connect_err)?;
            Ok(Connection::Udp(socket))
        }
    }
}

/// Candidate socket addresses for `address`, filtered by the network family.
async fn resolve_targets(network: Network, address: &str) -> Result<Vec<SocketAddr>, DialError> {
    let candidates: Vec<SocketAddr> = match address.parse::<SocketAddr>() {
        Ok(addr) => vec![addr],
        Err(_) => {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| DialError::InvalidAddress(address.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| DialError::InvalidAddress(address.to_string()))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            tokio::net::lookup_host((host, port))
                .await
                .map_err(DialError::Lookup)?
                .collect()
        }
    };

    let targets: Vec<_> = candidates.into_iter().filter(|addr| network.accepts(addr)).collect();
    if targets.is_empty() {
        return Err(DialError::InvalidAddress(format!("no suitable address for {}", address)));
    }
    Ok(targets)
}

#[async_trait]
impl Dial for EgressDialer {
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError> {
        EgressDialer::dial(self, network, address).await
    }
}
