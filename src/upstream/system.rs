//! Operating system resolver.

use std::io;
use std::net::IpAddr;

use async_trait::async_trait;

use super::NameService;

/// Looks names up with the host's configured resolver (getaddrinfo).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNameService;

#[async_trait]
impl NameService for SystemNameService {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let addrs = SystemNameService.lookup("localhost").await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|ip| ip.is_loopback()));
    }
}
