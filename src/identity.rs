//! Identity value types: peer addresses, host:port pairs, certificates.
//!
//! These are immutable value objects with validation only. Certificate
//! contents are opaque to this crate; they pass through unchanged and are
//! interpreted by the host's certificate authority.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// A two-part peer identifier: `resource@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    resource: String,
    domain: String,
}

impl PeerAddress {
    /// Create an address from parts. Both parts must be non-empty and free
    /// of `@`.
    pub fn new(resource: &str, domain: &str) -> Result<Self, WireError> {
        if resource.is_empty() || domain.is_empty() {
            return Err(WireError::BadArgument {
                name: "address".into(),
                reason: "empty resource or domain".into(),
            });
        }
        if resource.contains('@') || domain.contains('@') {
            return Err(WireError::BadArgument {
                name: "address".into(),
                reason: "parts may not contain '@'".into(),
            });
        }
        Ok(Self {
            resource: resource.to_string(),
            domain: domain.to_string(),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource, self.domain)
    }
}

impl FromStr for PeerAddress {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((resource, domain)) => PeerAddress::new(resource, domain),
            None => Err(WireError::BadArgument {
                name: "address".into(),
                reason: format!("expected resource@domain, got {:?}", s),
            }),
        }
    }
}

/// A validated `host:port` pair. The port is a `u16`, so the wire range
/// [0, 65535] holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Create a host:port pair. The host must be non-empty.
    pub fn new(host: &str, port: u16) -> Result<Self, WireError> {
        if host.is_empty() {
            return Err(WireError::BadArgument {
                name: "host".into(),
                reason: "empty host".into(),
            });
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| WireError::BadArgument {
            name: "host-port".into(),
            reason: format!("expected host:port, got {:?}", s),
        })?;
        let port: u16 = port.parse().map_err(|_| WireError::BadArgument {
            name: "host-port".into(),
            reason: format!("port out of range: {:?}", port),
        })?;
        HostPort::new(host, port)
    }
}

/// An opaque signed certificate blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An opaque certificate signing request blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest(Vec<u8>);

impl CertificateRequest {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let addr: PeerAddress = "glyph@divmod.com".parse().unwrap();
        assert_eq!(addr.resource(), "glyph");
        assert_eq!(addr.domain(), "divmod.com");
        assert_eq!(addr.to_string(), "glyph@divmod.com");
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!("no-at-sign".parse::<PeerAddress>().is_err());
        assert!("@domain".parse::<PeerAddress>().is_err());
        assert!("resource@".parse::<PeerAddress>().is_err());
        assert!(PeerAddress::new("a@b", "c").is_err());
    }

    #[test]
    fn test_host_port_roundtrip() {
        let hp: HostPort = "203.0.113.9:4321".parse().unwrap();
        assert_eq!(hp.host(), "203.0.113.9");
        assert_eq!(hp.port(), 4321);
        assert_eq!(hp.to_string(), "203.0.113.9:4321");
    }

    #[test]
    fn test_host_port_rejects_malformed() {
        assert!("no-port".parse::<HostPort>().is_err());
        assert!("host:notanumber".parse::<HostPort>().is_err());
        assert!("host:70000".parse::<HostPort>().is_err());
        assert!(":80".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_host_port_boundary_ports() {
        assert_eq!("h:0".parse::<HostPort>().unwrap().port(), 0);
        assert_eq!("h:65535".parse::<HostPort>().unwrap().port(), 65535);
    }

    #[test]
    fn test_certificate_passthrough() {
        let blob = vec![0x30, 0x82, 0x01, 0x0a];
        let cert = Certificate::from_bytes(blob.clone());
        assert_eq!(cert.as_bytes(), &blob[..]);

        let req = CertificateRequest::from_bytes(b"csr".to_vec());
        assert_eq!(req.as_bytes(), b"csr");
    }
}
