//! Config for socket addresses.
use std::{net::ToSocketAddrs, ops::Deref};

/// Parsable socket address.
///
/// Accepts anything [`ToSocketAddrs`] resolves (`127.0.0.1:8080`, `localhost:8080`, `[::1]:8080`)
/// plus the port-only form `:8080`, which binds every IPv4 interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddr(std::net::SocketAddr);

impl Deref for SocketAddr {
    type Target = std::net::SocketAddr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SocketAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let candidate = match s.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => s.to_owned(),
        };

        match candidate.to_socket_addrs() {
            Ok(mut addrs) => addrs
                .next()
                .map(Self)
                .ok_or_else(|| format!("Found no addresses for '{s}'")),
            Err(e) => Err(format!("Cannot parse socket address '{s}': {e}")),
        }
    }
}

impl From<SocketAddr> for std::net::SocketAddr {
    fn from(addr: SocketAddr) -> Self {
        addr.0
    }
}
