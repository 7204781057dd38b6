//! Sower framed request
//!
//! ```text
//! +---------+-----+----------+----------+----------+---------+
//! |   KEY   | CMD | DST.PORT | HOST.LEN | DST.HOST | Payload |
//! +---------+-----+----------+----------+----------+---------+
//! |   16    |  1  |    2     |    1     | Variable | Variable|
//! +---------+-----+----------+----------+----------+---------+
//! ```
//!
//! KEY is the first 16 bytes of SHA256(password). The host is carried as
//! text (IP literal or domain), so one layout covers every address family.

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tokio::io::AsyncReadExt;

use super::{write_frame, AsyncStream, RemoteKind, Transport};
use crate::core::address::{Address, MAX_DOMAIN_LEN};
use crate::error::{ProxyError, Result};
use crate::utils::password_to_key;

const KEY_LEN: usize = 16;
const CMD_CONNECT: u8 = 0x01;

/// Fixed part of the frame: key + cmd + port + host length
pub const FIXED_LEN: usize = KEY_LEN + 1 + 2 + 1;

pub struct Sower {
    key: [u8; KEY_LEN],
}

impl Sower {
    pub fn new(password: &str) -> Self {
        Self {
            key: password_to_key(password),
        }
    }

    /// Build the complete request frame for a destination
    pub fn encode_request(&self, host: &str, port: u16) -> Result<Vec<u8>> {
        if host.is_empty() {
            return Err(ProxyError::InvalidTarget {
                host: host.to_string(),
                port,
            });
        }
        if host.len() > MAX_DOMAIN_LEN {
            return Err(ProxyError::DomainTooLong(host.len()));
        }

        let mut frame = Vec::with_capacity(FIXED_LEN + host.len());
        frame.extend_from_slice(&self.key);
        frame.push(CMD_CONNECT);
        frame.extend_from_slice(&port.to_be_bytes());
        frame.push(host.len() as u8);
        frame.extend_from_slice(host.as_bytes());
        Ok(frame)
    }
}

#[async_trait]
impl Transport for Sower {
    async fn wrap(&self, conn: &mut dyn AsyncStream, host: &str, port: u16) -> Result<()> {
        let frame = self.encode_request(host, port)?;
        write_frame(conn, &frame).await
    }

    async fn unwrap(&self, conn: &mut dyn AsyncStream) -> Result<Address> {
        let mut head = [0u8; FIXED_LEN];
        if conn.read(&mut head).await? != FIXED_LEN {
            return Err(ProxyError::MalformedHeader("short read"));
        }

        let key_ok: bool = head[..KEY_LEN].ct_eq(&self.key[..]).into();
        if !key_ok {
            return Err(ProxyError::AuthenticationFailure);
        }
        if head[KEY_LEN] != CMD_CONNECT {
            return Err(ProxyError::MalformedHeader("invalid sower command"));
        }

        let port = u16::from_be_bytes([head[KEY_LEN + 1], head[KEY_LEN + 2]]);
        let len = head[FIXED_LEN - 1] as usize;
        if len == 0 {
            return Err(ProxyError::MalformedHeader("empty host"));
        }

        let mut host = vec![0u8; len];
        if conn.read(&mut host).await? != len {
            return Err(ProxyError::MalformedHeader("short read"));
        }
        let host = std::str::from_utf8(&host)
            .map_err(|_| ProxyError::MalformedHeader("invalid host encoding"))?;

        // classify the textual host the same way wrap-side callers do
        Address::from_host_port(host, port)
    }

    fn kind(&self) -> RemoteKind {
        RemoteKind::Sower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn unwrap_bytes(sower: &Sower, bytes: &[u8]) -> Result<Address> {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(bytes).await.unwrap();
        drop(client);
        sower.unwrap(&mut server).await
    }

    #[test]
    fn test_frame_layout() {
        let sower = Sower::new("password");
        let frame = sower.encode_request("example.com", 8080).unwrap();
        assert_eq!(&frame[..16], &password_to_key("password"));
        assert_eq!(frame[16], 0x01);
        assert_eq!(&frame[17..19], &[0x1F, 0x90]);
        assert_eq!(frame[19], 11);
        assert_eq!(&frame[20..], b"example.com");
    }

    #[test]
    fn test_encode_rejects_oversized_host() {
        let sower = Sower::new("password");
        assert!(sower.encode_request(&"x".repeat(256), 80).is_err());
        assert!(sower.encode_request(&"x".repeat(255), 80).is_ok());
    }

    #[tokio::test]
    async fn test_wrap_unwrap_roundtrip() {
        let sower = Sower::new("password");
        let cases = [
            ("example.com", 443, Address::Domain("example.com".into(), 443)),
            ("10.0.0.1", 22, Address::IPv4([10, 0, 0, 1], 22)),
            (
                "fe80::1",
                8443,
                Address::IPv6([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], 8443),
            ),
        ];
        for (host, port, expected) in cases {
            let (mut client, mut server) = tokio::io::duplex(1024);
            sower.wrap(&mut client, host, port).await.unwrap();
            assert_eq!(sower.unwrap(&mut server).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_unwrap_wrong_key() {
        let sower = Sower::new("password");
        let frame = Sower::new("other").encode_request("example.com", 80).unwrap();
        assert!(matches!(
            unwrap_bytes(&sower, &frame).await,
            Err(ProxyError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn test_unwrap_truncated() {
        let sower = Sower::new("password");
        let frame = sower.encode_request("example.com", 80).unwrap();
        assert!(matches!(
            unwrap_bytes(&sower, &frame[..10]).await,
            Err(ProxyError::MalformedHeader(_))
        ));
        assert!(matches!(
            unwrap_bytes(&sower, &frame[..frame.len() - 1]).await,
            Err(ProxyError::MalformedHeader(_))
        ));
    }
}
