//! SOCKS5 relay engine.
//!
//! The engine owns the client side: it accepts connections, runs the
//! handshake, and shuttles bytes. What a destination resolves to and how the
//! outbound socket is opened are strategies injected through [`Resolve`] and
//! [`Dial`]. Events are logged through `tracing`.

pub mod socks;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::egress::{Connection, EgressDialer};
use crate::error::{DialError, ResolveError, ServeError};
use crate::resolver::Resolver;
use crate::stats::Stats;
use crate::upstream::SystemNameService;

use socks::{CMD_CONNECT, ProtocolError, Reply, TargetAddr};

/// Resolve strategy, called when a client names its destination by hostname.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str, cancel: &CancellationToken) -> Result<IpAddr, ResolveError>;
}

/// Dial strategy, called once per CONNECT request.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self, network: &str, address: &str) -> Result<Connection, DialError>;
}

/// Builder for [`Server`]. Unset strategies fall back to the system
/// resolver and a dialer using default routing.
#[derive(Default)]
pub struct ServerBuilder {
    dial: Option<Arc<dyn Dial>>,
    resolver: Option<Arc<dyn Resolve>>,
    stats: Option<Arc<Stats>>,
    shutdown: Option<CancellationToken>,
}

impl ServerBuilder {
    pub fn dial(mut self, dial: Arc<dyn Dial>) -> Self {
        self.dial = Some(dial);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Token that stops the accept loop when cancelled. Per-client tokens
    /// are children of it.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Server {
        Server {
            dial: self.dial.unwrap_or_else(|| Arc::new(EgressDialer::new(None))),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(Resolver::new(Arc::new(SystemNameService)))),
            stats: self.stats.unwrap_or_default(),
            shutdown: self.shutdown.unwrap_or_default(),
        }
    }
}

/// The relay engine. Cheap to clone; clones share strategies and stats.
#[derive(Clone)]
pub struct Server {
    dial: Arc<dyn Dial>,
    resolver: Arc<dyn Resolve>,
    stats: Arc<Stats>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Listen on `addr` and serve until shut down.
    ///
    /// Only the `tcp` transport exists. An error is returned only when the
    /// listener cannot be set up.
    pub async fn serve(&self, transport: &str, addr: &str) -> Result<(), ServeError> {
        if transport != "tcp" {
            return Err(ServeError::UnsupportedTransport(transport.to_string()));
        }

        let listener = TcpListener::bind(addr).await.map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        self.serve_listener(listener).await
    }

    /// Accept loop - spawns a handler task for each incoming connection.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), ServeError> {
        if let Ok(local) = listener.local_addr() {
            info!(%local, "SOCKS5 relay listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("SOCKS5 relay shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((client, peer)) => {
                    self.stats.record_connection();
                    let server = self.clone();
                    let cancel = self.shutdown.child_token();
                    tokio::spawn(async move {
                        let _guard = cancel.clone().drop_guard();
                        if let Err(err) = server.handle_client(client, peer, &cancel).await {
                            debug!(%peer, error = %err, "client session ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                    // Usually fd exhaustion; back off instead of spinning.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    /// Resolve `name`, giving up if the client hangs up first.
    ///
    /// Returns `None` when the client went away; the lookup is dropped and
    /// the client's token is cancelled.
    async fn resolve_while_connected(
        &self,
        client: &TcpStream,
        name: &str,
        cancel: &CancellationToken,
    ) -> Option<Result<IpAddr, ResolveError>> {
        tokio::select! {
            result = self.resolver.resolve(name, cancel) => Some(result),
            _ = client_closed(client) => {
                cancel.cancel();
                None
            }
        }
    }

    /// Handle a single client: handshake, CONNECT, then relay bytes.
    async fn handle_client(
        &self,
        mut client: TcpStream,
        peer: SocketAddr,
        cancel: &CancellationToken,
    ) -> Result<(), ProtocolError> {
        socks::negotiate(&mut client).await?;
        let request = socks::read_request(&mut client).await?;

        if request.command != CMD_CONNECT {
            debug!(%peer, command = request.command, "unsupported command");
            socks::write_reply(&mut client, Reply::CommandNotSupported, None).await?;
            return Ok(());
        }

        let (host, port) = match &request.target {
            TargetAddr::Ip(addr) => (addr.ip(), addr.port()),
            TargetAddr::Domain(name, port) => match self.resolve_while_connected(&client, name, cancel).await {
                None => {
                    debug!(%peer, target = %request.target, "client left during lookup");
                    return Ok(());
                }
                Some(Ok(ip)) => {
                    self.stats.record_resolve(true);
                    (ip, *port)
                }
                Some(Err(err)) => {
                    self.stats.record_resolve(false);
                    warn!(%peer, target = %request.target, error = %err, "resolve failed");
                    socks::write_reply(&mut client, Reply::HostUnreachable, None).await?;
                    return Ok(());
                }
            },
        };

        let dest = SocketAddr::new(host, port);
        let upstream = match self.dial.dial("tcp", &dest.to_string()).await {
            Ok(conn) => conn.into_tcp(),
            Err(err) => {
                self.stats.record_dial(false);
                warn!(%peer, target = %request.target, %dest, error = %err, "dial failed");
                socks::write_reply(&mut client, Reply::for_io_kind(err.io_kind()), None).await?;
                return Ok(());
            }
        };
        let Some(mut upstream) = upstream else {
            self.stats.record_dial(false);
            warn!(%peer, %dest, "dial returned a non-stream connection");
            socks::write_reply(&mut client, Reply::GeneralFailure, None).await?;
            return Ok(());
        };
        self.stats.record_dial(true);

        socks::write_reply(&mut client, Reply::Succeeded, upstream.local_addr().ok()).await?;
        info!(%peer, target = %request.target, %dest, "relaying");

        let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        debug!(%peer, %dest, sent, received, "relay closed");
        Ok(())
    }
}

/// Completes once the client has hung up. Early payload bytes stay queued.
async fn client_closed(client: &TcpStream) {
    let mut byte = [0u8; 1];
    match client.peek(&mut byte).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending().await,
    }
}
