//! TLS client used by the sower and trojan backends

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::TransportStream;
use crate::error::{ProxyError, Result};

/// Dials `host:port` over TCP and completes a TLS handshake verified
/// against the webpki roots, with SNI set to the remote host
pub struct TlsDialer {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    host: String,
    port: u16,
}

impl TlsDialer {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProxyError::Config(format!("TLS client config: {}", e)))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ProxyError::Config(format!("invalid TLS server name: {}", host)))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            host: host.to_string(),
            port,
        })
    }

    pub async fn connect(&self, connect_timeout: Duration) -> Result<TransportStream> {
        let handshake = async {
            let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
            tcp.set_nodelay(true)?;
            let tls = self
                .connector
                .connect(self.server_name.clone(), tcp)
                .await?;
            Ok::<_, std::io::Error>(tls)
        };

        let tls = tokio::time::timeout(connect_timeout, handshake)
            .await
            .map_err(|_| {
                ProxyError::UpstreamDial(format!("connect {}:{} timed out", self.host, self.port))
            })?
            .map_err(|e| {
                ProxyError::UpstreamDial(format!("tls dial {}:{}: {}", self.host, self.port, e))
            })?;
        Ok(Box::pin(tls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_dns_and_ip_names() {
        assert!(TlsDialer::new("proxy.example.com", 443).is_ok());
        assert!(TlsDialer::new("127.0.0.1", 443).is_ok());
    }

    #[test]
    fn test_rejects_invalid_name() {
        assert!(matches!(
            TlsDialer::new("not a host", 443),
            Err(ProxyError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_upstream_dial() {
        // bind then drop to get a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = TlsDialer::new("127.0.0.1", port).unwrap();
        let result = dialer.connect(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ProxyError::UpstreamDial(_))));
    }
}
