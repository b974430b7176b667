//! Upstream name services.
//!
//! A name service turns a hostname into the candidate address list the
//! resolver picks from. Two are provided: the operating system's resolver
//! and a specific DNS server reached over UDP.

pub mod hosts;
pub mod system;
pub mod udp;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use hosts::HostsFile;
pub use system::SystemNameService;
pub use udp::UdpNameService;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Source of candidate addresses for a hostname.
///
/// Candidates are returned in the order the upstream produced them; an empty
/// list is a valid answer and is left for the caller to judge.
#[async_trait]
pub trait NameService: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Which name service to consult, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    System,
    Udp(SocketAddr),
}

impl Upstream {
    /// Build the name service for this upstream.
    ///
    /// `timeout` bounds a single UDP exchange; the system resolver has its
    /// own timeouts. A custom server still honours the system host table.
    pub fn name_service(self, timeout: Duration) -> Arc<dyn NameService> {
        match self {
            Upstream::System => Arc::new(SystemNameService),
            Upstream::Udp(server) => {
                Arc::new(UdpNameService::new(server, timeout).with_hosts(HostsFile::system()))
            }
        }
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Upstream::System => f.write_str("system"),
            Upstream::Udp(server) => write!(f, "udp://{}", server),
        }
    }
}
