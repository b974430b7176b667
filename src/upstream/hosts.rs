//! Static host table (`/etc/hosts` format).
//!
//! Consulted before a custom DNS server is queried, so `localhost` and
//! pinned entries keep resolving locally.

use std::io;
use std::net::IpAddr;
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::debug;

/// Default location of the host table.
pub const HOSTS_PATH: &str = "/etc/hosts";

/// Hostname to addresses, in file order.
#[derive(Debug, Clone, Default)]
pub struct HostsFile {
    entries: FxHashMap<String, Vec<IpAddr>>,
}

impl HostsFile {
    /// Parse host table contents. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut entries: FxHashMap<String, Vec<IpAddr>> = FxHashMap::default();

        for line in contents.lines() {
            let line = line.split('#').next().unwrap_or_default();
            let mut fields = line.split_whitespace();
            let Some(ip) = fields.next().and_then(|f| f.parse::<IpAddr>().ok()) else {
                continue;
            };
            for name in fields {
                let addrs = entries.entry(normalize(name)).or_default();
                if !addrs.contains(&ip) {
                    addrs.push(ip);
                }
            }
        }

        Self { entries }
    }

    /// Load a host table; a missing file is an empty table.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Load the system host table, falling back to an empty one.
    pub fn system() -> Self {
        Self::load(HOSTS_PATH).unwrap_or_else(|e| {
            debug!(path = HOSTS_PATH, error = %e, "host table unreadable");
            Self::default()
        })
    }

    pub fn lookup(&self, host: &str) -> Option<&[IpAddr]> {
        self.entries.get(&normalize(host)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}
