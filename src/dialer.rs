//! Outbound dialing
//!
//! `gen_proxy_dial` binds the configured remote once at startup. Every
//! `dial` then opens a fresh upstream connection and writes the request
//! frame of the selected transport onto it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::config::RemoteConfig;
use crate::core::ProxyDial;
use crate::error::{ProxyError, Result};
use crate::logger::log;
use crate::transport::{
    RemoteKind, Socks5, Sower, SshSession, SshTunnel, TlsDialer, Transport, TransportStream,
    Trojan,
};

/// How the raw upstream connection is opened
pub enum Upstream {
    /// TLS to the remote
    Tls(TlsDialer),
    /// Plain TCP to the remote
    Tcp { host: String, port: u16 },
    /// `direct-tcpip` channel over a shared SSH session
    Ssh(Arc<SshSession>),
}

/// Dialer bound to one remote and one transport
pub struct ProxyDialer {
    transport: Arc<dyn Transport>,
    upstream: Upstream,
    connect_timeout: Duration,
}

impl ProxyDialer {
    pub fn new(transport: Arc<dyn Transport>, upstream: Upstream, connect_timeout: Duration) -> Self {
        Self {
            transport,
            upstream,
            connect_timeout,
        }
    }

    pub fn kind(&self) -> RemoteKind {
        self.transport.kind()
    }

    async fn open(&self, host: &str, port: u16) -> Result<TransportStream> {
        match &self.upstream {
            Upstream::Tls(dialer) => dialer.connect(self.connect_timeout).await,
            Upstream::Tcp {
                host: remote_host,
                port: remote_port,
            } => {
                let tcp = connect_tcp(remote_host, *remote_port, self.connect_timeout).await?;
                Ok(Box::pin(tcp))
            }
            Upstream::Ssh(session) => {
                tokio::time::timeout(self.connect_timeout, session.open_channel(host, port))
                    .await
                    .map_err(|_| {
                        ProxyError::UpstreamDial(format!(
                            "ssh channel to {}:{} timed out",
                            host, port
                        ))
                    })?
            }
        }
    }
}

#[async_trait]
impl ProxyDial for ProxyDialer {
    async fn dial(&self, _network: &str, host: &str, port: u16) -> Result<TransportStream> {
        if host.is_empty() || port == 0 {
            return Err(ProxyError::InvalidTarget {
                host: host.to_string(),
                port,
            });
        }

        let mut conn = self.open(host, port).await?;
        if let Err(e) = self.transport.wrap(&mut conn, host, port).await {
            // never hand out or leak a half-framed upstream
            drop(conn);
            log::debug!(host = host, port = port, error = %e, "Wrap failed");
            return Err(e);
        }
        Ok(conn)
    }
}

/// Plain TCP to the destination itself
pub struct DirectDialer {
    connect_timeout: Duration,
}

impl DirectDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ProxyDial for DirectDialer {
    async fn dial(&self, _network: &str, host: &str, port: u16) -> Result<TransportStream> {
        if host.is_empty() || port == 0 {
            return Err(ProxyError::InvalidTarget {
                host: host.to_string(),
                port,
            });
        }
        let tcp = connect_tcp(host, port, self.connect_timeout).await?;
        Ok(Box::pin(tcp))
    }
}

async fn connect_tcp(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProxyError::UpstreamDial(format!("connect {}:{} timed out", host, port)))?
        .map_err(|e| ProxyError::UpstreamDial(format!("connect {}:{}: {}", host, port, e)))?;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

/// Build the dialer for the configured remote.
///
/// For sshd this authenticates the shared session, so it must run before
/// any listener starts.
pub async fn gen_proxy_dial(
    remote: &RemoteConfig,
    connect_timeout: Duration,
) -> Result<Arc<ProxyDialer>> {
    let (host, port) = remote
        .endpoint()
        .map_err(|e| ProxyError::Config(e.to_string()))?;

    let dialer = match remote.kind {
        RemoteKind::Sower => ProxyDialer::new(
            Arc::new(Sower::new(&remote.password)),
            Upstream::Tls(TlsDialer::new(&host, port)?),
            connect_timeout,
        ),
        RemoteKind::Trojan => ProxyDialer::new(
            Arc::new(Trojan::new(&remote.password)),
            Upstream::Tls(TlsDialer::new(&host, port)?),
            connect_timeout,
        ),
        RemoteKind::Socks5 => ProxyDialer::new(
            Arc::new(Socks5::new()),
            Upstream::Tcp { host, port },
            connect_timeout,
        ),
        RemoteKind::Sshd => {
            let session = SshSession::connect(
                &host,
                port,
                &remote.user,
                &remote.password,
                connect_timeout,
            )
            .await?;
            ProxyDialer::new(
                Arc::new(SshTunnel::new()),
                Upstream::Ssh(Arc::new(session)),
                connect_timeout,
            )
        }
    };

    log::info!(remote = %remote.addr, kind = %dialer.kind(), "Proxy dialer ready");
    Ok(Arc::new(dialer))
}
