//! DNS lookups against a specific server over UDP.
//!
//! Each lookup opens its own ephemeral socket, connects it to the server so
//! datagrams from anyone else are dropped by the kernel, and sends an A and
//! an AAAA query back to back. Replies are matched to queries by their
//! 16-bit ID. Names found in the host table never reach the server.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use crate::dns::{DnsQuery, DnsResponse, RCODE_NXDOMAIN, TYPE_A, TYPE_AAAA};

use super::{HostsFile, MAX_DNS_PACKET_SIZE, NameService};

/// Name service backed by one DNS server.
#[derive(Debug, Clone)]
pub struct UdpNameService {
    server: SocketAddr,
    timeout: Duration,
    hosts: HostsFile,
}

impl UdpNameService {
    /// Create a service with an empty host table.
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self {
            server,
            timeout,
            hosts: HostsFile::default(),
        }
    }

    /// Answer names in `hosts` locally.
    pub fn with_hosts(mut self, hosts: HostsFile) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    async fn connect(&self) -> io::Result<UdpSocket> {
        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.server).await?;
        Ok(socket)
    }
}

#[async_trait]
impl NameService for UdpNameService {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Some(addrs) = self.hosts.lookup(host) {
            debug!(host, "answered from host table");
            return Ok(addrs.to_vec());
        }

        let a_id = fastrand::u16(..);
        let mut aaaa_id = fastrand::u16(..);
        while aaaa_id == a_id {
            aaaa_id = fastrand::u16(..);
        }

        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("invalid hostname: {}", host));
        let a_query = DnsQuery::new(a_id, host, TYPE_A).to_bytes().ok_or_else(invalid)?;
        let aaaa_query = DnsQuery::new(aaaa_id, host, TYPE_AAAA).to_bytes().ok_or_else(invalid)?;

        let socket = self.connect().await?;
        futures::future::try_join(socket.send(&a_query), socket.send(&aaaa_query)).await?;

        let mut pending: FxHashMap<u16, u16> = FxHashMap::default();
        pending.insert(a_id, TYPE_A);
        pending.insert(aaaa_id, TYPE_AAAA);

        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        let mut last_err = None;
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        let deadline = Instant::now() + self.timeout;

        while !pending.is_empty() {
            let len = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no reply from {} for {}", self.server, host),
                    ));
                    break;
                }
            };

            let Some(response) = DnsResponse::parse(&buf[..len]) else {
                debug!(server = %self.server, len, "ignoring malformed DNS reply");
                continue;
            };
            let Some(qtype) = pending.remove(&response.id) else {
                debug!(server = %self.server, id = response.id, "ignoring DNS reply with unknown id");
                continue;
            };

            match response.rcode() {
                0 => {}
                // The name does not exist, whatever the other family says.
                RCODE_NXDOMAIN => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no such host: {}", host),
                    ));
                }
                rcode => {
                    last_err = Some(io::Error::other(format!(
                        "server {} answered rcode {} for {}",
                        self.server, rcode, host
                    )));
                    continue;
                }
            }

            if response.is_truncated() {
                debug!(server = %self.server, host, qtype, "dropping truncated DNS reply");
                continue;
            }

            let target = if qtype == TYPE_A { &mut v4 } else { &mut v6 };
            target.extend(response.addresses(qtype));
        }

        v4.append(&mut v6);
        match last_err {
            Some(err) if v4.is_empty() => Err(err),
            _ => Ok(v4),
        }
    }
}
