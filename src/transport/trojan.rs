//! Trojan protocol framing
//!
//! ```text
//! +-----------------------+---------+-----+------+----------+----------+---------+---------+
//! | hex(SHA224(password)) |  CRLF   | CMD | ATYP | DST.ADDR | DST.PORT |  CRLF   | Payload |
//! +-----------------------+---------+-----+------+----------+----------+---------+---------+
//! |          56           | X'0D0A' |  1  |  1   | Variable |    2     | X'0D0A' | Variable|
//! +-----------------------+---------+-----+------+----------+----------+---------+---------+
//! ```
//!
//! Unwrap deliberately issues one read per structured field and requires the
//! exact byte count, instead of looping until full: a slow or fragmenting peer
//! fails fast rather than holding the task.

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tokio::io::AsyncReadExt;

use super::{write_frame, AsyncStream, RemoteKind, Transport};
use crate::core::address::{Address, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};
use crate::error::{ProxyError, Result};
use crate::logger::log;
use crate::utils::password_to_hex;

/// Fixed head: secret(56) + CRLF(2) + CMD(1) + ATYP(1)
pub const HEAD_LEN: usize = 56 + 2 + 1 + 1;

const CRLF: [u8; 2] = [0x0D, 0x0A];

/// Trojan command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrojanCmd {
    /// TCP connect
    Connect = 1,
    /// UDP associate
    UdpAssociate = 3,
}

impl TryFrom<u8> for TrojanCmd {
    type Error = &'static str;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(TrojanCmd::Connect),
            3 => Ok(TrojanCmd::UdpAssociate),
            _ => Err("invalid trojan command"),
        }
    }
}

/// Trojan transport with precomputed CONNECT heads, one per address type
pub struct Trojan {
    secret: [u8; 56],
    head_ipv4: [u8; HEAD_LEN],
    head_ipv6: [u8; HEAD_LEN],
    head_domain: [u8; HEAD_LEN],
}

impl Trojan {
    /// Create a transport for the given password
    pub fn new(password: &str) -> Self {
        let secret = password_to_hex(password);
        Self {
            secret,
            head_ipv4: Self::head(&secret, ATYP_IPV4),
            head_ipv6: Self::head(&secret, ATYP_IPV6),
            head_domain: Self::head(&secret, ATYP_DOMAIN),
        }
    }

    fn head(secret: &[u8; 56], atyp: u8) -> [u8; HEAD_LEN] {
        let mut head = [0u8; HEAD_LEN];
        head[..56].copy_from_slice(secret);
        head[56..58].copy_from_slice(&CRLF);
        head[58] = TrojanCmd::Connect as u8;
        head[59] = atyp;
        head
    }

    /// The 56-byte hex secret carried by every request
    pub fn secret(&self) -> &[u8; 56] {
        &self.secret
    }

    /// Build the complete request frame for a destination
    pub fn encode_request(&self, host: &str, port: u16) -> Result<Vec<u8>> {
        let addr = Address::from_host_port(host, port)?;
        let head = match addr {
            Address::IPv4(..) => &self.head_ipv4,
            Address::IPv6(..) => &self.head_ipv6,
            Address::Domain(..) => &self.head_domain,
        };

        // head + longest body (len byte + 255 name bytes + port) + CRLF
        let mut frame = Vec::with_capacity(HEAD_LEN + 1 + host.len() + 2 + 2);
        frame.extend_from_slice(head);
        addr.encode_body(&mut frame);
        frame.extend_from_slice(&CRLF);
        Ok(frame)
    }

    /// Read exactly `buf.len()` bytes with a single read
    async fn read_once(conn: &mut dyn AsyncStream, buf: &mut [u8]) -> Result<()> {
        let n = conn.read(buf).await?;
        if n != buf.len() {
            return Err(ProxyError::MalformedHeader("short read"));
        }
        Ok(())
    }

    fn check_tail(tail: &[u8]) -> Result<()> {
        if tail != CRLF {
            return Err(ProxyError::MalformedHeader("missing CRLF after address"));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for Trojan {
    async fn wrap(&self, conn: &mut dyn AsyncStream, host: &str, port: u16) -> Result<()> {
        let frame = self.encode_request(host, port)?;
        write_frame(conn, &frame).await
    }

    async fn unwrap(&self, conn: &mut dyn AsyncStream) -> Result<Address> {
        let mut head = [0u8; HEAD_LEN];
        Self::read_once(conn, &mut head).await?;

        // constant time: do not reveal how much of the secret matched
        let secret_ok: bool = head[..56].ct_eq(&self.secret[..]).into();
        if !secret_ok {
            log::debug!("Trojan secret mismatch");
            return Err(ProxyError::AuthenticationFailure);
        }
        if head[56..58] != CRLF {
            return Err(ProxyError::MalformedHeader("missing CRLF after password"));
        }
        TrojanCmd::try_from(head[58]).map_err(ProxyError::MalformedHeader)?;

        match head[59] {
            ATYP_IPV4 => {
                let mut buf = [0u8; 4 + 2 + 2];
                Self::read_once(conn, &mut buf).await?;
                Self::check_tail(&buf[6..])?;
                let mut ip = [0u8; 4];
                ip.copy_from_slice(&buf[..4]);
                Ok(Address::IPv4(ip, u16::from_be_bytes([buf[4], buf[5]])))
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 16 + 2 + 2];
                Self::read_once(conn, &mut buf).await?;
                Self::check_tail(&buf[18..])?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                Ok(Address::IPv6(ip, u16::from_be_bytes([buf[16], buf[17]])))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                Self::read_once(conn, &mut len).await?;
                let len = len[0] as usize;

                let mut buf = vec![0u8; len + 4];
                Self::read_once(conn, &mut buf).await?;
                Self::check_tail(&buf[len + 2..])?;
                let domain = std::str::from_utf8(&buf[..len])
                    .map_err(|_| ProxyError::MalformedHeader("invalid domain encoding"))?;
                Ok(Address::Domain(
                    domain.to_string(),
                    u16::from_be_bytes([buf[len], buf[len + 1]]),
                ))
            }
            _ => Err(ProxyError::MalformedHeader("invalid address type")),
        }
    }

    fn kind(&self) -> RemoteKind {
        RemoteKind::Trojan
    }
}
