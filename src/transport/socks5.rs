//! SOCKS5 (RFC 1928) without authentication, CONNECT only
//!
//! As a remote backend `wrap` performs the client handshake against an
//! upstream SOCKS5 server. The local SOCKS5 front-end uses `unwrap` to read
//! the target from an inbound client.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{AsyncStream, RemoteKind, Transport};
use crate::core::address::{Address, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};
use crate::error::{ProxyError, Result};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const REP_SUCCESS: u8 = 0x00;

/// Success reply with an unspecified IPv4 bound address
const REPLY_SUCCESS: [u8; 10] = [SOCKS5_VERSION, REP_SUCCESS, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Default, Clone, Copy)]
pub struct Socks5;

impl Socks5 {
    pub fn new() -> Self {
        Self
    }

    async fn read_request(conn: &mut dyn AsyncStream) -> Result<Address> {
        // method negotiation
        let mut greeting = [0u8; 2];
        conn.read_exact(&mut greeting).await?;
        if greeting[0] != SOCKS5_VERSION {
            return Err(ProxyError::SniffParse(format!(
                "unsupported SOCKS version: {}",
                greeting[0]
            )));
        }
        let mut methods = vec![0u8; greeting[1] as usize];
        conn.read_exact(&mut methods).await?;
        if !methods.contains(&AUTH_NONE) {
            return Err(ProxyError::SniffParse("no acceptable auth method".into()));
        }
        conn.write_all(&[SOCKS5_VERSION, AUTH_NONE]).await?;

        // request
        let mut header = [0u8; 4];
        conn.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(ProxyError::SniffParse(
                "invalid SOCKS version in request".into(),
            ));
        }
        if header[1] != CMD_CONNECT {
            return Err(ProxyError::SniffParse(format!(
                "unsupported command: {}",
                header[1]
            )));
        }
        let addr = match header[3] {
            ATYP_IPV4 | ATYP_DOMAIN | ATYP_IPV6 => Address::read_body(header[3], conn).await?,
            atyp => {
                return Err(ProxyError::SniffParse(format!(
                    "unsupported address type: {}",
                    atyp
                )))
            }
        };

        conn.write_all(&REPLY_SUCCESS).await?;
        conn.flush().await?;
        Ok(addr)
    }
}

#[async_trait]
impl Transport for Socks5 {
    async fn wrap(&self, conn: &mut dyn AsyncStream, host: &str, port: u16) -> Result<()> {
        let addr = Address::from_host_port(host, port)?;

        conn.write_all(&[SOCKS5_VERSION, 1, AUTH_NONE]).await?;
        let mut selected = [0u8; 2];
        conn.read_exact(&mut selected).await?;
        if selected[0] != SOCKS5_VERSION {
            return Err(ProxyError::UpstreamDial(
                "invalid SOCKS version from server".into(),
            ));
        }
        if selected[1] != AUTH_NONE {
            return Err(ProxyError::UpstreamDial(
                "server rejected auth methods".into(),
            ));
        }

        let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
        addr.encode(&mut request);
        conn.write_all(&request).await?;
        conn.flush().await?;

        let mut reply = [0u8; 4];
        conn.read_exact(&mut reply).await?;
        if reply[0] != SOCKS5_VERSION {
            return Err(ProxyError::UpstreamDial(
                "invalid SOCKS version in reply".into(),
            ));
        }
        if reply[1] != REP_SUCCESS {
            return Err(ProxyError::UpstreamDial(format!(
                "SOCKS5 connect to {} failed with reply {}",
                addr, reply[1]
            )));
        }

        // skip the bound address
        let skip = match reply[3] {
            ATYP_IPV4 => 4 + 2,
            ATYP_IPV6 => 16 + 2,
            ATYP_DOMAIN => conn.read_u8().await? as usize + 2,
            _ => {
                return Err(ProxyError::UpstreamDial(
                    "invalid bound address type".into(),
                ))
            }
        };
        let mut bound = vec![0u8; skip];
        conn.read_exact(&mut bound).await?;
        Ok(())
    }

    /// Serve the no-auth handshake and return the CONNECT target.
    ///
    /// Failures never produce an error reply; the caller closes the connection.
    async fn unwrap(&self, conn: &mut dyn AsyncStream) -> Result<Address> {
        Self::read_request(conn).await.map_err(|err| match err {
            ProxyError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ProxyError::SniffParse("truncated SOCKS5 request".into())
            }
            other => other,
        })
    }

    fn kind(&self) -> RemoteKind {
        RemoteKind::Socks5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unwrap_domain_request() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move { Socks5::new().unwrap(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [5, 0]);

        let mut request = vec![5, 1, 0, 3, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_SUCCESS);

        let addr = task.await.unwrap().unwrap();
        assert_eq!(addr, Address::Domain("example.com".into(), 443));
    }

    #[tokio::test]
    async fn test_unwrap_rejects_non_connect() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 3, 0, 1, 127, 0, 0, 1, 0, 53])
            .await
            .unwrap();

        let result = Socks5::new().unwrap(&mut server).await;
        assert!(matches!(result, Err(ProxyError::SniffParse(_))));
    }

    #[tokio::test]
    async fn test_unwrap_truncated_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[5, 1, 0, 5, 1, 0, 1, 10, 0]).await.unwrap();
        client.shutdown().await.unwrap();

        let result = Socks5::new().unwrap(&mut server).await;
        assert!(matches!(result, Err(ProxyError::SniffParse(_))));
    }

    #[tokio::test]
    async fn test_unwrap_rejects_socks4() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[4, 1, 0, 80]).await.unwrap();
        let result = Socks5::new().unwrap(&mut server).await;
        assert!(matches!(result, Err(ProxyError::SniffParse(_))));
    }

    #[tokio::test]
    async fn test_wrap_against_unwrap() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let server_task = tokio::spawn(async move {
            let addr = Socks5::new().unwrap(&mut server).await.unwrap();
            server.write_all(b"hello").await.unwrap();
            addr
        });

        Socks5::new()
            .wrap(&mut client, "93.184.216.34", 80)
            .await
            .unwrap();
        let mut payload = [0u8; 5];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");

        let addr = server_task.await.unwrap();
        assert_eq!(addr, Address::IPv4([93, 184, 216, 34], 80));
    }

    #[tokio::test]
    async fn test_wrap_reports_failed_reply() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 3];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(&[5, 0]).await.unwrap();
            let mut req = [0u8; 10];
            server.read_exact(&mut req).await.unwrap();
            // connection refused
            server
                .write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let result = Socks5::new().wrap(&mut client, "10.0.0.1", 80).await;
        assert!(matches!(result, Err(ProxyError::UpstreamDial(_))));
        server_task.await.unwrap();
    }
}
