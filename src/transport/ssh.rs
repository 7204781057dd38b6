//! SSH tunnel backend
//!
//! The destination travels in the `direct-tcpip` channel open request, so
//! the stream itself carries no request frame.

use async_trait::async_trait;
use russh::client;
use std::sync::Arc;
use std::time::Duration;

use super::{AsyncStream, RemoteKind, Transport, TransportStream};
use crate::core::Address;
use crate::error::{ProxyError, Result};
use crate::logger::log;

/// `Transport` side of the SSH backend
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTunnel;

impl SshTunnel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SshTunnel {
    async fn wrap(&self, _conn: &mut dyn AsyncStream, _host: &str, _port: u16) -> Result<()> {
        Ok(())
    }

    async fn unwrap(&self, _conn: &mut dyn AsyncStream) -> Result<Address> {
        Err(ProxyError::Unsupported("ssh tunnel cannot serve inbound requests"))
    }

    fn kind(&self) -> RemoteKind {
        RemoteKind::Sshd
    }
}

/// Accepts any host key
struct SshClient;

#[async_trait]
impl client::Handler for SshClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One authenticated SSH connection shared by all proxied streams
pub struct SshSession {
    handle: client::Handle<SshClient>,
}

impl SshSession {
    /// Connect and authenticate with a password
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let connecting = client::connect(config, (host, port), SshClient);
        let mut handle = tokio::time::timeout(connect_timeout, connecting)
            .await
            .map_err(|_| ProxyError::UpstreamDial(format!("ssh connect to {}:{} timed out", host, port)))?
            .map_err(|e| ProxyError::UpstreamDial(format!("ssh connect to {}:{}: {}", host, port, e)))?;

        let authenticated = handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| ProxyError::UpstreamDial(format!("ssh auth: {}", e)))?;
        if !authenticated {
            return Err(ProxyError::UpstreamDial(format!(
                "ssh password rejected for user {}",
                user
            )));
        }

        log::info!(remote = %format!("{}:{}", host, port), user = user, "SSH session established");
        Ok(Self { handle })
    }

    /// Open a forwarded stream to `host:port` through the server
    pub async fn open_channel(&self, host: &str, port: u16) -> Result<TransportStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                ProxyError::UpstreamDial(format!("ssh channel to {}:{}: {}", host, port, e))
            })?;
        Ok(Box::pin(channel.into_stream()))
    }
}
