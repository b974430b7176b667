//! Error types for resolution, egress dialing, and serving.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A hostname could not be turned into an address.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("lookup of {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for host: {host}")]
    NoAddresses { host: String },

    #[error("lookup of {host} timed out")]
    Timeout { host: String },

    #[error("lookup of {host} cancelled")]
    Cancelled { host: String },
}

/// An outbound connection could not be opened.
#[derive(Error, Debug)]
pub enum DialError {
    /// The raw socket needed for interface binding could not be obtained.
    #[error("socket control failed: {0}")]
    Control(#[source] io::Error),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("address lookup failed: {0}")]
    Lookup(#[source] io::Error),
}

impl DialError {
    /// The I/O error kind behind this failure, if there is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            DialError::Control(e) | DialError::Lookup(e) => Some(e.kind()),
            DialError::Connect { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// The relay engine could not start serving.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
}

/// Invalid startup configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    #[error("invalid DNS server address: {0}")]
    InvalidDnsAddress(String),

    #[error("invalid address preference: {0} (expected ipv4, ipv6 or first)")]
    InvalidPreference(String),
}
