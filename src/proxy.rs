//! Proxy orchestration.
//!
//! Turns startup flags into a [`ProxyConfig`], builds the resolver and the
//! egress dialer from it, and runs the relay engine.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::egress::EgressDialer;
use crate::error::{ConfigError, ServeError};
use crate::relay::Server;
use crate::resolver::{AddressPreference, Resolver};
use crate::stats::Stats;
use crate::upstream::Upstream;

const DNS_PORT: u16 = 53;
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the proxy, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Listen address in `host:port` form.
    pub listen: String,
    /// Where hostnames are looked up.
    pub upstream: Upstream,
    /// Interface outbound sockets are bound to; `None` uses default routing.
    pub interface: Option<String>,
    pub preference: AddressPreference,
    pub resolve_timeout: Duration,
}

impl ProxyConfig {
    /// Validate raw flag values. Empty `dns` and `iface` disable the feature.
    pub fn from_flags(
        bind: &str,
        dns: &str,
        iface: &str,
        preference: AddressPreference,
        resolve_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            listen: parse_listen(bind)?,
            upstream: parse_upstream(dns)?,
            interface: (!iface.is_empty()).then(|| iface.to_string()),
            preference,
            resolve_timeout,
        })
    }
}

/// Accepts `host:port`, `[v6]:port`, and a bare `:port` meaning all IPv4
/// interfaces.
fn parse_listen(bind: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidListenAddress(bind.to_string());

    let listen = if bind.starts_with(':') {
        format!("0.0.0.0{}", bind)
    } else {
        bind.to_string()
    };

    let (host, port) = listen.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(listen)
}

/// Accepts an empty string (system resolver), `ip:port`, or a bare IP on
/// port 53.
fn parse_upstream(dns: &str) -> Result<Upstream, ConfigError> {
    if dns.is_empty() {
        return Ok(Upstream::System);
    }
    if let Ok(addr) = dns.parse::<SocketAddr>() {
        return Ok(Upstream::Udp(addr));
    }

    let bare = dns.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| Upstream::Udp(SocketAddr::new(ip, DNS_PORT)))
        .map_err(|_| ConfigError::InvalidDnsAddress(dns.to_string()))
}

/// Run the proxy with the given configuration.
///
/// Only returns if the listener cannot be established.
pub async fn run(config: ProxyConfig) -> Result<(), ServeError> {
    info!(
        bind = %config.listen,
        dns = %config.upstream,
        iface = config.interface.as_deref().unwrap_or(""),
        prefer = %config.preference,
        "starting SOCKS5 proxy"
    );

    match &config.upstream {
        Upstream::System => info!("Using system default DNS resolver"),
        Upstream::Udp(server) => info!(%server, "Using custom DNS server"),
    }
    match &config.interface {
        None => info!("Using default network interface for outgoing connections"),
        Some(iface) => info!(%iface, "Binding outgoing connections to interface"),
    }

    let stats = Arc::new(Stats::new());
    let resolver = Resolver::new(config.upstream.name_service(config.resolve_timeout))
        .with_preference(config.preference)
        .with_timeout(config.resolve_timeout);
    let dialer = EgressDialer::new(config.interface.clone()).with_stats(stats.clone());

    let server = Server::builder()
        .resolver(Arc::new(resolver))
        .dial(Arc::new(dialer))
        .stats(stats.clone())
        .build();

    // Log stats every minute
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let s = stats.snapshot_and_reset();
            info!(
                connections = s.connections,
                resolved = s.resolved,
                resolve_failures = s.resolve_failures,
                dialed = s.dialed,
                dial_failures = s.dial_failures,
                bind_warnings = s.bind_warnings,
                "stats"
            );
        }
    });

    server.serve("tcp", &config.listen).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(bind: &str, dns: &str, iface: &str) -> Result<ProxyConfig, ConfigError> {
        ProxyConfig::from_flags(bind, dns, iface, AddressPreference::default(), Duration::from_secs(5))
    }

    #[test]
    fn defaults_mean_system_resolver_and_default_routing() {
        let config = flags(":1080", "", "").unwrap();
        assert_eq!(config.listen, "0.0.0.0:1080");
        assert_eq!(config.upstream, Upstream::System);
        assert_eq!(config.interface, None);
    }

    #[test]
    fn dns_server_forms() {
        let config = flags(":1080", "1.1.1.1:5353", "wg0").unwrap();
        assert_eq!(config.upstream, Upstream::Udp("1.1.1.1:5353".parse().unwrap()));
        assert_eq!(config.interface.as_deref(), Some("wg0"));

        let config = flags(":1080", "8.8.8.8", "").unwrap();
        assert_eq!(config.upstream, Upstream::Udp("8.8.8.8:53".parse().unwrap()));

        let config = flags(":1080", "[2001:4860:4860::8888]", "").unwrap();
        assert_eq!(
            config.upstream,
            Upstream::Udp("[2001:4860:4860::8888]:53".parse().unwrap())
        );

        assert!(matches!(
            flags(":1080", "dns.google:53", ""),
            Err(ConfigError::InvalidDnsAddress(_))
        ));
    }

    #[test]
    fn listen_address_forms() {
        assert_eq!(flags("127.0.0.1:9050", "", "").unwrap().listen, "127.0.0.1:9050");
        assert_eq!(flags("[::1]:1080", "", "").unwrap().listen, "[::1]:1080");
        assert!(flags("1080", "", "").is_err());
        assert!(flags(":http", "", "").is_err());
    }

    #[tokio::test]
    async fn unbindable_listener_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let config = flags(&addr.to_string(), "", "").unwrap();
        let err = run(config).await.unwrap_err();
        assert!(matches!(err, ServeError::Bind { .. }));
    }
}
