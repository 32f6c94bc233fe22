// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! URL triple (scheme, node, service) with socket address round-trips.
//!
//! The node is an IP literal or hostname; IPv6 literals are bracketed when
//! rendered next to a service and may carry a `%idx` zone suffix. The service
//! is a numeric port or empty.

use socket2::Type;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Url {
    scheme: String,
    node: String,
    service: String,
}

impl Url {
    pub fn new(scheme: &str, node: &str, service: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            node: node.to_string(),
            service: service.to_string(),
        }
    }

    /// Parse `scheme://node:service` where each piece is optional and an
    /// IPv6 node is enclosed in brackets.
    pub fn parse(url: &str) -> Self {
        let mut rest = url;
        let mut out = Url::default();
        if let Some(scheme_end) = url.find("://") {
            out.scheme = url[..scheme_end].to_string();
            rest = &url[scheme_end + 3..];
        }

        let mut in_bracket = false;
        let mut in_service = false;
        for ch in rest.chars() {
            if in_bracket && ch == ']' {
                in_bracket = false;
                continue;
            }
            if !in_bracket && ch == '[' {
                in_bracket = true;
                continue;
            }
            if in_bracket {
                out.node.push(ch);
                continue;
            }
            if in_service {
                out.service.push(ch);
                continue;
            }
            if ch == ':' {
                in_service = true;
                continue;
            }
            out.node.push(ch);
        }
        out
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = scheme.to_string();
    }

    pub fn set_node(&mut self, node: &str) {
        self.node = node.to_string();
    }

    pub fn set_service(&mut self, service: &str) {
        self.service = service.to_string();
    }

    /// The socket type selected by the scheme. Streams are assumed when the
    /// scheme is absent or unknown.
    pub fn socket_type(&self) -> Type {
        if self.scheme == "udp" {
            Type::DGRAM
        } else {
            Type::STREAM
        }
    }

    /// Resolve to a single socket address, preferring direct IP literals over
    /// name lookup. An empty service resolves with port 0.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        let port: u16 = if self.service.is_empty() {
            0
        } else {
            self.service.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("bad service: {}", self.service),
                )
            })?
        };

        // IPv6 literal with a zone index suffix
        if let Some((addr_part, zone)) = self.node.split_once('%') {
            if let Ok(v6) = addr_part.parse::<Ipv6Addr>() {
                let scope: u32 = zone.parse().unwrap_or(0);
                return Ok(SocketAddr::V6(SocketAddrV6::new(v6, port, 0, scope)));
            }
        }

        if let Ok(ip) = self.node.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let mut addrs = (self.node.as_str(), port).to_socket_addrs()?;
        addrs.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no lookup results for {}", self.node),
            )
        })
    }
}

impl From<SocketAddr> for Url {
    fn from(addr: SocketAddr) -> Self {
        let node = match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => {
                if v6.scope_id() != 0 {
                    format!("{}%{}", v6.ip(), v6.scope_id())
                } else {
                    v6.ip().to_string()
                }
            }
        };
        Url {
            scheme: String::new(),
            node,
            service: addr.port().to_string(),
        }
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme)?;
        }
        // escape an IPv6 node with brackets
        if self.node.contains(':') {
            write!(f, "[{}]", self.node)?;
        } else {
            write!(f, "{}", self.node)?;
        }
        if !self.service.is_empty() {
            write!(f, ":{}", self.service)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let url = Url::parse("tcp://host.example:55132");
        assert_eq!(url.scheme(), "tcp");
        assert_eq!(url.node(), "host.example");
        assert_eq!(url.service(), "55132");
    }

    #[test]
    fn test_parse_ipv6_bracketed() {
        let url = Url::parse("udp://[fe80::1%3]:1900");
        assert_eq!(url.scheme(), "udp");
        assert_eq!(url.node(), "fe80::1%3");
        assert_eq!(url.service(), "1900");
    }

    #[test]
    fn test_parse_bare_host() {
        let url = Url::parse("localhost");
        assert_eq!(url.scheme(), "");
        assert_eq!(url.node(), "localhost");
        assert_eq!(url.service(), "");
    }

    #[test]
    fn test_display_brackets_mandatory() {
        let url = Url::new("tcp", "::1", "55132");
        assert_eq!(url.to_string(), "tcp://[::1]:55132");
    }

    #[test]
    fn test_roundtrip_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let url = Url::from(addr);
        assert_eq!(url.to_string(), "127.0.0.1:8080");
        assert_eq!(url.resolve().unwrap(), addr);
    }

    #[test]
    fn test_resolve_ipv6_zone() {
        let url = Url::new("udp", "fe80::1%7", "1900");
        let addr = url.resolve().unwrap();
        match addr {
            SocketAddr::V6(v6) => {
                assert_eq!(v6.scope_id(), 7);
                assert_eq!(v6.port(), 1900);
            }
            SocketAddr::V4(_) => panic!("expected v6"),
        }
    }

    #[test]
    fn test_socket_type() {
        assert_eq!(Url::parse("udp://x:1").socket_type(), Type::DGRAM);
        assert_eq!(Url::parse("tcp://x:1").socket_type(), Type::STREAM);
        assert_eq!(Url::parse("x:1").socket_type(), Type::STREAM);
    }
}
