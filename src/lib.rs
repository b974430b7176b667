//! egress-socks - a SOCKS5 proxy with interface-bound egress.
//!
//! The library exposes the resolution and egress policy layer, the relay
//! engine it plugs into, and the startup orchestration.

pub mod dns;
pub mod egress;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod resolver;
pub mod stats;
pub mod upstream;
