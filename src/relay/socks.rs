//! SOCKS5 wire format (RFC 1928), the subset the relay engine speaks.
//!
//! Only the "no authentication" method and the CONNECT command are
//! supported. Anything else gets the matching refusal.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Reply codes sent back for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Reply for a failed outbound connect, by I/O error kind.
    pub fn for_io_kind(kind: Option<io::ErrorKind>) -> Self {
        match kind {
            Some(io::ErrorKind::ConnectionRefused) => Reply::ConnectionRefused,
            Some(io::ErrorKind::NetworkUnreachable) => Reply::NetworkUnreachable,
            Some(io::ErrorKind::HostUnreachable) | Some(io::ErrorKind::TimedOut) => Reply::HostUnreachable,
            _ => Reply::GeneralFailure,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported protocol version {0:#04x}")]
    BadVersion(u8),

    #[error("client offered no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("domain name is not valid UTF-8")]
    InvalidDomain,
}

/// Destination named in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: u8,
    pub target: TargetAddr,
}

/// Read the method greeting and select "no authentication".
pub async fn negotiate<S>(stream: &mut S) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(ProtocolError::BadVersion(header[0]));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(ProtocolError::NoAcceptableMethod);
    }

    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Read a request. An unknown address type is answered before returning.
pub async fn read_request<S>(stream: &mut S) -> Result<Request, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(ProtocolError::BadVersion(header[0]));
    }
    let command = header[1];

    let target = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::from((Ipv4Addr::from(octets), port)))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::from((Ipv6Addr::from(octets), port)))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            let port = stream.read_u16().await?;
            let host = String::from_utf8(name).map_err(|_| ProtocolError::InvalidDomain)?;
            TargetAddr::Domain(host, port)
        }
        other => {
            write_reply(stream, Reply::AddressTypeNotSupported, None).await?;
            return Err(ProtocolError::UnsupportedAddressType(other));
        }
    };

    Ok(Request { command, target })
}

/// Send a reply carrying the bound address (zeros when there is none).
pub async fn write_reply<S>(stream: &mut S, reply: Reply, bound: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bound = bound.unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

    let mut data = Vec::with_capacity(22);
    data.extend_from_slice(&[VERSION, reply as u8, 0x00]);
    match bound {
        SocketAddr::V4(addr) => {
            data.push(ATYP_IPV4);
            data.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            data.push(ATYP_IPV6);
            data.extend_from_slice(&addr.ip().octets());
        }
    }
    data.extend_from_slice(&bound.port().to_be_bytes());

    stream.write_all(&data).await?;
    stream.flush().await
}
