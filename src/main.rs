use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use egress_socks::proxy::{self, ProxyConfig};
use egress_socks::resolver::AddressPreference;

#[derive(Parser)]
#[command(name = "egress-socks")]
#[command(about = "SOCKS5 proxy with interface-bound egress and custom upstream DNS", long_about = None)]
struct Args {
    /// SOCKS5 listen address (host:port)
    #[arg(short, long, default_value = ":1080")]
    bind: String,

    /// DNS server address (host:port); empty uses the system resolver
    #[arg(short, long, default_value = "")]
    dns: String,

    /// Network interface to bind outgoing connections to (empty to disable)
    #[arg(short, long, default_value = "")]
    iface: String,

    /// Address family preference when a name has several addresses: ipv4, ipv6 or first
    #[arg(short, long, default_value = "ipv4")]
    prefer: AddressPreference,

    /// Seconds to wait for a single name lookup
    #[arg(long, default_value = "5")]
    resolve_timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let config = ProxyConfig::from_flags(
        &args.bind,
        &args.dns,
        &args.iface,
        args.prefer,
        Duration::from_secs(args.resolve_timeout),
    )?;

    if let Err(e) = proxy::run(config).await {
        tracing::error!(error = %e, "proxy stopped");
        return Err(e.into());
    }

    Ok(())
}
