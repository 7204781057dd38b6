//! Transport layer abstraction
//!
//! Every remote backend implements the same two operations:
//! - `wrap`: client side, write the destination request to an outbound stream
//! - `unwrap`: server side, read the destination request from an inbound stream
//!
//! Backends:
//! - sower (compact framed request, over TLS)
//! - trojan (SHA224 secret head, over TLS)
//! - socks5 (plain SOCKS5 CONNECT)
//! - sshd (direct-tcpip channel; the channel itself carries the target)

pub mod socks5;
pub mod sower;
pub mod ssh;
pub mod tls;
pub mod trojan;

pub use socks5::Socks5;
pub use sower::Sower;
pub use ssh::{SshSession, SshTunnel};
pub use tls::TlsDialer;
pub use trojan::Trojan;

use async_trait::async_trait;
use std::pin::Pin;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::core::Address;
use crate::error::{ProxyError, Result};

/// Unified transport stream trait combining AsyncRead + AsyncWrite + Send + Unpin
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Unified transport stream type
pub type TransportStream = Pin<Box<dyn AsyncStream>>;

/// Remote backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    /// Compact framed request over TLS
    Sower,
    /// Trojan over TLS
    Trojan,
    /// Plain SOCKS5 proxy
    Socks5,
    /// SSH server with TCP forwarding
    Sshd,
}

impl RemoteKind {
    /// Port used when the remote address carries none
    pub fn default_port(&self) -> u16 {
        match self {
            RemoteKind::Sower | RemoteKind::Trojan => 443,
            RemoteKind::Socks5 => 1080,
            RemoteKind::Sshd => 22,
        }
    }
}

impl std::fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteKind::Sower => write!(f, "sower"),
            RemoteKind::Trojan => write!(f, "trojan"),
            RemoteKind::Socks5 => write!(f, "socks5"),
            RemoteKind::Sshd => write!(f, "sshd"),
        }
    }
}

impl FromStr for RemoteKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sower" => Ok(RemoteKind::Sower),
            "trojan" => Ok(RemoteKind::Trojan),
            "socks5" => Ok(RemoteKind::Socks5),
            "sshd" | "ssh" => Ok(RemoteKind::Sshd),
            _ => Err(ProxyError::Config(format!(
                "unknown remote type '{}', expected sower/trojan/socks5/sshd",
                s
            ))),
        }
    }
}

// config files accept exactly the spellings the CLI does
impl<'de> serde::Deserialize<'de> for RemoteKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Request framing shared by all backends
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write the request for `host:port` to a freshly opened outbound stream
    async fn wrap(&self, conn: &mut dyn AsyncStream, host: &str, port: u16) -> Result<()>;

    /// Read the request from a freshly accepted inbound stream.
    ///
    /// On failure the consumed bytes are not pushed back; the stream is no
    /// longer usable for this protocol.
    async fn unwrap(&self, conn: &mut dyn AsyncStream) -> Result<Address>;

    /// Which backend this is
    fn kind(&self) -> RemoteKind;
}

/// Write a complete frame with a single write call.
///
/// A write that accepts fewer bytes than the frame is a `ShortWrite`, never
/// retried, so a peer cannot observe half a request followed by a retry.
pub(crate) async fn write_frame(conn: &mut dyn AsyncStream, frame: &[u8]) -> Result<()> {
    let written = conn.write(frame).await?;
    if written != frame.len() {
        return Err(ProxyError::ShortWrite {
            written,
            expected: frame.len(),
        });
    }
    conn.flush().await?;
    Ok(())
}
