//! Hook traits for extensibility
//!
//! The front-ends only know these two contracts. Rule matching, DNS and the
//! choice between direct and proxied upstreams live behind them.

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::TransportStream;

/// Obtain an outbound stream for `host:port`, already carrying whatever
/// request frame the upstream expects
#[async_trait]
pub trait ProxyDial: Send + Sync {
    async fn dial(&self, network: &str, host: &str, port: u16) -> Result<TransportStream>;
}

/// Routing entry point used by the front-ends once a destination is known
#[async_trait]
pub trait Router: Send + Sync {
    /// Dial `host:port` directly, through the remote, or fail with `Blocked`
    async fn proxy_dial(&self, network: &str, host: &str, port: u16) -> Result<TransportStream>;

    /// Dial `host:port` and relay `conn` to it until either side closes
    async fn route_handle(&self, conn: TransportStream, host: &str, port: u16) -> Result<()>;
}
