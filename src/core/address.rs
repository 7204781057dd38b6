//! Destination address codec
//!
//! Trojan and SOCKS5 share one address encoding:
//! - ATYP (1 byte: IPv4=1, Domain=3, IPv6=4)
//! - address (4 bytes | 1-byte length + name | 16 bytes)
//! - port (2 bytes, big endian)

use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProxyError, Result};

/// Address type constants
pub const ATYP_IPV4: u8 = 1;
pub const ATYP_DOMAIN: u8 = 3;
pub const ATYP_IPV6: u8 = 4;

/// Longest name a one-byte length prefix can describe
pub const MAX_DOMAIN_LEN: usize = 255;

/// Destination address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    IPv4([u8; 4], u16),
    /// IPv6 address
    IPv6([u8; 16], u16),
    /// Domain name
    Domain(String, u16),
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::IPv4(ip, port) => write!(f, "{}:{}", Ipv4Addr::from(*ip), port),
            Address::IPv6(ip, port) => write!(f, "[{}]:{}", Ipv6Addr::from(*ip), port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl Address {
    /// Classify a host string: IPv4 literal, then IPv6 literal, then domain.
    ///
    /// Bracketed IPv6 literals ("[::1]") are accepted. Domains longer than
    /// 255 bytes are rejected rather than truncated.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Address::IPv4(ip.octets(), port));
        }
        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = unbracketed.parse::<Ipv6Addr>() {
            // IPv4-mapped addresses travel as plain IPv4
            if let Some(v4) = ip.to_ipv4_mapped() {
                return Ok(Address::IPv4(v4.octets(), port));
            }
            return Ok(Address::IPv6(ip.octets(), port));
        }
        if host.len() > MAX_DOMAIN_LEN {
            return Err(ProxyError::DomainTooLong(host.len()));
        }
        Ok(Address::Domain(host.to_string(), port))
    }

    /// Address type byte for this variant
    pub fn atyp(&self) -> u8 {
        match self {
            Address::IPv4(..) => ATYP_IPV4,
            Address::IPv6(..) => ATYP_IPV6,
            Address::Domain(..) => ATYP_DOMAIN,
        }
    }

    /// Encode address with its ATYP prefix.
    /// Returns the number of bytes written
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start_len = buf.len();
        buf.push(self.atyp());
        self.encode_body(buf);
        buf.len() - start_len
    }

    /// Encode address bytes and port without the ATYP prefix
    pub fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            Address::IPv4(ip, port) => {
                buf.extend_from_slice(ip);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::IPv6(ip, port) => {
                buf.extend_from_slice(ip);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::Domain(domain, port) => {
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    /// Read an address whose ATYP byte has already been consumed.
    ///
    /// Used by SOCKS5 where fields are read with `read_exact`.
    pub async fn read_body<R>(atyp: u8, reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match atyp {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 4];
                ip.copy_from_slice(&buf[..4]);
                Ok(Address::IPv4(ip, u16::from_be_bytes([buf[4], buf[5]])))
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                Ok(Address::IPv6(ip, u16::from_be_bytes([buf[16], buf[17]])))
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await? as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let domain = std::str::from_utf8(&buf[..len])
                    .map_err(|_| ProxyError::MalformedHeader("invalid domain encoding"))?
                    .to_string();
                Ok(Address::Domain(
                    domain,
                    u16::from_be_bytes([buf[len], buf[len + 1]]),
                ))
            }
            _ => Err(ProxyError::MalformedHeader("invalid address type")),
        }
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            Address::IPv4(_, port) => *port,
            Address::IPv6(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }

    /// Get the host string (IP or domain)
    pub fn host(&self) -> String {
        match self {
            Address::IPv4(ip, _) => Ipv4Addr::from(*ip).to_string(),
            Address::IPv6(ip, _) => Ipv6Addr::from(*ip).to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }
}
