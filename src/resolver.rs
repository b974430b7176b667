//! Hostname resolution policy.
//!
//! The resolver asks its upstream name service for candidates and picks
//! exactly one of them:
//! 1. IP literals are returned as-is without a lookup
//! 2. The lookup races the caller's cancellation token and a timeout
//! 3. An empty candidate list is an error, never a zero address
//! 4. The address preference picks one candidate, deterministically
//!
//! Nothing is cached; every call goes to the name service.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConfigError, ResolveError};
use crate::relay::Resolve;
use crate::upstream::NameService;

/// Default bound on a single lookup.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which candidate wins when a name has several addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressPreference {
    /// First IPv4 candidate, else the first candidate.
    #[default]
    Ipv4First,
    /// First IPv6 candidate, else the first candidate.
    Ipv6First,
    /// First candidate of any family.
    FirstReturned,
}

impl AddressPreference {
    /// Pick one candidate, preserving upstream order within a family.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) count as IPv4 and are
    /// returned in their plain IPv4 form.
    pub fn select(self, candidates: &[IpAddr]) -> Option<IpAddr> {
        let preferred = match self {
            AddressPreference::Ipv4First => candidates.iter().find(|ip| ip.to_canonical().is_ipv4()),
            AddressPreference::Ipv6First => candidates.iter().find(|ip| ip.to_canonical().is_ipv6()),
            AddressPreference::FirstReturned => None,
        };
        preferred.or_else(|| candidates.first()).map(IpAddr::to_canonical)
    }
}

impl FromStr for AddressPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "v4" => Ok(AddressPreference::Ipv4First),
            "ipv6" | "v6" => Ok(AddressPreference::Ipv6First),
            "first" => Ok(AddressPreference::FirstReturned),
            _ => Err(ConfigError::InvalidPreference(s.to_string())),
        }
    }
}

impl fmt::Display for AddressPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressPreference::Ipv4First => "ipv4",
            AddressPreference::Ipv6First => "ipv6",
            AddressPreference::FirstReturned => "first",
        })
    }
}

/// Resolves hostnames through one upstream name service.
///
/// Immutable after construction, so one instance is shared by every client
/// connection.
pub struct Resolver {
    service: Arc<dyn NameService>,
    preference: AddressPreference,
    timeout: Duration,
}

impl Resolver {
    /// Create a resolver with IPv4 preference and the default timeout.
    pub fn new(service: Arc<dyn NameService>) -> Self {
        Self {
            service,
            preference: AddressPreference::default(),
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    pub fn with_preference(mut self, preference: AddressPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn preference(&self) -> AddressPreference {
        self.preference
    }

    /// Resolve `host` to a single address.
    ///
    /// Dropping out on cancellation or timeout drops the in-flight lookup.
    pub async fn resolve(&self, host: &str, cancel: &CancellationToken) -> Result<IpAddr, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let candidates = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ResolveError::Cancelled { host: host.to_string() });
            }
            result = tokio::time::timeout(self.timeout, self.service.lookup(host)) => match result {
                Err(_) => return Err(ResolveError::Timeout { host: host.to_string() }),
                Ok(Err(source)) => {
                    return Err(ResolveError::Lookup {
                        host: host.to_string(),
                        source,
                    });
                }
                Ok(Ok(candidates)) => candidates,
            },
        };

        let ip = self
            .preference
            .select(&candidates)
            .ok_or_else(|| ResolveError::NoAddresses { host: host.to_string() })?;

        debug!(host, %ip, candidates = candidates.len(), "resolved");
        Ok(ip)
    }
}

#[async_trait]
impl Resolve for Resolver {
    async fn resolve(&self, host: &str, cancel: &CancellationToken) -> Result<IpAddr, ResolveError> {
        Resolver::resolve(self, host, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    struct StaticNameService {
        candidates: Vec<IpAddr>,
        calls: AtomicUsize,
    }

    impl StaticNameService {
        fn new(candidates: Vec<IpAddr>) -> Arc<Self> {
            Arc::new(Self {
                candidates,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NameService for StaticNameService {
        async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.candidates.clone())
        }
    }

    struct FailingNameService;

    #[async_trait]
    impl NameService for FailingNameService {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            Err(io::Error::new(io::ErrorKind::NotFound, format!("no such host: {}", host)))
        }
    }

    struct HangingNameService;

    #[async_trait]
    impl NameService for HangingNameService {
        async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            std::future::pending().await
        }
    }

    /// Answers `<n>.test` with `10.0.0.<n>` after a short delay.
    struct EchoNameService;

    #[async_trait]
    impl NameService for EchoNameService {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            let n: u8 = host.trim_end_matches(".test").parse().map_err(io::Error::other)?;
            tokio::time::sleep(Duration::from_millis(u64::from(n % 5))).await;
            Ok(vec![IpAddr::from([10, 0, 0, n]), "2001:db8::1".parse().unwrap()])
        }
    }

    async fn resolve_with(candidates: &[&str]) -> Result<IpAddr, ResolveError> {
        let resolver = Resolver::new(StaticNameService::new(ips(candidates)));
        resolver.resolve("example.com", &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn prefers_first_ipv4_in_upstream_order() {
        let ip = resolve_with(&["2001:db8::1", "93.184.216.34", "93.184.216.35"])
            .await
            .unwrap();
        assert_eq!(ip, "93.184.216.34".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_first_candidate_without_ipv4() {
        let ip = resolve_with(&["2001:db8::1", "2001:db8::2"]).await.unwrap();
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn empty_candidates_are_an_error() {
        let err = resolve_with(&[]).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoAddresses { ref host } if host == "example.com"));
        assert_eq!(err.to_string(), "no addresses found for host: example.com");
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let resolver = Resolver::new(Arc::new(FailingNameService));
        let err = resolver
            .resolve("nope.invalid", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ResolveError::Lookup { host, source } => {
                assert_eq!(host, "nope.invalid");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn ip_literals_skip_the_lookup() {
        let service = StaticNameService::new(vec![]);
        let resolver = Resolver::new(service.clone());
        let ip = resolver.resolve("2001:db8::7", &CancellationToken::new()).await.unwrap();
        assert_eq!(ip, "2001:db8::7".parse::<IpAddr>().unwrap());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_call_queries_upstream() {
        let service = StaticNameService::new(ips(&["192.0.2.1"]));
        let resolver = Resolver::new(service.clone());
        let cancel = CancellationToken::new();
        resolver.resolve("example.com", &cancel).await.unwrap();
        resolver.resolve("example.com", &cancel).await.unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_lookup() {
        let resolver = Resolver::new(Arc::new(HangingNameService)).with_timeout(Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), resolver.resolve("example.com", &cancel))
            .await
            .expect("resolve did not return after cancellation")
            .unwrap_err();
        assert!(matches!(err, ResolveError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn lookup_timeout_is_an_error() {
        let resolver = Resolver::new(Arc::new(HangingNameService)).with_timeout(Duration::from_millis(20));
        let err = resolver
            .resolve("example.com", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { .. }));
    }

    #[tokio::test]
    async fn concurrent_resolves_are_independent() {
        let resolver = Arc::new(Resolver::new(Arc::new(EchoNameService)));
        let tasks = (1..=50u8).map(|n| {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                let ip = resolver
                    .resolve(&format!("{}.test", n), &CancellationToken::new())
                    .await
                    .unwrap();
                (n, ip)
            })
        });

        for result in futures::future::join_all(tasks).await {
            let (n, ip) = result.unwrap();
            assert_eq!(ip, IpAddr::from([10, 0, 0, n]));
        }
    }

    #[test]
    fn preference_variants() {
        let candidates = ips(&["2001:db8::1", "192.0.2.1", "2001:db8::2"]);
        assert_eq!(
            AddressPreference::Ipv4First.select(&candidates),
            Some("192.0.2.1".parse().unwrap())
        );
        assert_eq!(
            AddressPreference::Ipv6First.select(&ips(&["192.0.2.1", "2001:db8::2"])),
            Some("2001:db8::2".parse().unwrap())
        );
        assert_eq!(
            AddressPreference::FirstReturned.select(&ips(&["192.0.2.9", "192.0.2.1"])),
            Some("192.0.2.9".parse().unwrap())
        );
        assert_eq!(AddressPreference::Ipv6First.select(&[]), None);
    }

    #[test]
    fn mapped_ipv4_counts_as_ipv4() {
        let candidates = ips(&["::ffff:1.2.3.4", "5.6.7.8"]);
        assert_eq!(
            AddressPreference::Ipv4First.select(&candidates),
            Some("1.2.3.4".parse().unwrap())
        );
        assert_eq!(
            AddressPreference::Ipv6First.select(&ips(&["::ffff:1.2.3.4", "2001:db8::1"])),
            Some("2001:db8::1".parse().unwrap())
        );
        assert_eq!(
            AddressPreference::Ipv6First.select(&ips(&["::ffff:1.2.3.4"])),
            Some("1.2.3.4".parse().unwrap())
        );
    }

    #[test]
    fn preference_parses_from_flags() {
        assert_eq!("ipv4".parse::<AddressPreference>().unwrap(), AddressPreference::Ipv4First);
        assert_eq!("IPv6".parse::<AddressPreference>().unwrap(), AddressPreference::Ipv6First);
        assert_eq!("first".parse::<AddressPreference>().unwrap(), AddressPreference::FirstReturned);
        assert!("random".parse::<AddressPreference>().is_err());
    }
}
