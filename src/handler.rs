//! Connection handling logic
//!
//! One function per front-end. Each extracts the destination, hands the
//! connection to the router and returns once the relay is over. Any
//! failure closes the client connection without a response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{PeekStream, Router};
use crate::error::{ProxyError, Result};
use crate::logger::log;
use crate::sniff::{sniff_http, sniff_tls};
use crate::transport::{AsyncStream, Socks5, Transport};

const HTTPS_PORT: u16 = 443;

/// Listener flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frontend {
    /// Plain HTTP, routed by `Host`
    Http,
    /// TLS, routed by SNI
    Https,
    /// Explicit SOCKS5 proxy
    Socks5,
}

impl std::fmt::Display for Frontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frontend::Http => write!(f, "http"),
            Frontend::Https => write!(f, "https"),
            Frontend::Socks5 => write!(f, "socks5"),
        }
    }
}

impl Frontend {
    /// Serve one accepted connection with this front-end
    pub async fn serve<S>(
        self,
        router: Arc<dyn Router>,
        conn: S,
        request_timeout: Duration,
    ) -> Result<()>
    where
        S: AsyncStream + 'static,
    {
        match self {
            Frontend::Http => serve_http(router, conn, request_timeout).await,
            Frontend::Https => serve_https(router, conn, request_timeout).await,
            Frontend::Socks5 => serve_socks5(router, conn, request_timeout).await,
        }
    }
}

async fn with_deadline<T>(
    request_timeout: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(request_timeout, fut)
        .await
        .map_err(|_| ProxyError::SniffParse(format!("{} timed out", what)))?
}

/// Route by the HTTP `Host` header, default port 80
pub async fn serve_http<S>(router: Arc<dyn Router>, conn: S, request_timeout: Duration) -> Result<()>
where
    S: AsyncStream + 'static,
{
    let start = Instant::now();
    let mut conn = PeekStream::new(conn);

    let (host, port) = with_deadline(request_timeout, "http request head", sniff_http(&mut conn))
        .await
        .inspect_err(|e| log::warn!(error = %e, "Sniff http failed"))?;
    log::sniffed("http", &host, port);

    conn.stop_peeking().replay();
    router.route_handle(Box::pin(conn), &host, port).await?;

    log::debug!(host = %host, spend = ?start.elapsed(), "Serve http");
    Ok(())
}

/// Route by the TLS SNI, port 443
pub async fn serve_https<S>(
    router: Arc<dyn Router>,
    conn: S,
    request_timeout: Duration,
) -> Result<()>
where
    S: AsyncStream + 'static,
{
    let start = Instant::now();
    let mut conn = PeekStream::new(conn);

    let host = with_deadline(request_timeout, "tls client hello", sniff_tls(&mut conn))
        .await
        .inspect_err(|e| log::warn!(error = %e, "Sniff https failed"))?;
    log::sniffed("https", &host, HTTPS_PORT);

    conn.stop_peeking().replay();
    router.route_handle(Box::pin(conn), &host, HTTPS_PORT).await?;

    log::debug!(host = %host, spend = ?start.elapsed(), "Serve https");
    Ok(())
}

/// Route to the SOCKS5 CONNECT target. The handshake is not replayed.
pub async fn serve_socks5<S>(
    router: Arc<dyn Router>,
    mut conn: S,
    request_timeout: Duration,
) -> Result<()>
where
    S: AsyncStream + 'static,
{
    let start = Instant::now();
    let socks5 = Socks5::new();
    let target = with_deadline(request_timeout, "socks5 request", socks5.unwrap(&mut conn))
        .await
        .inspect_err(|e| log::warn!(error = %e, "Parse socks5 target failed"))?;
    let (host, port) = (target.host(), target.port());
    log::sniffed("socks5", &host, port);

    router.route_handle(Box::pin(conn), &host, port).await?;

    log::debug!(host = %host, spend = ?start.elapsed(), "Serve socks5");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportStream;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Captures what the front-end hands over
    #[derive(Default)]
    struct CaptureRouter {
        seen: Mutex<Vec<(String, u16, Vec<u8>)>>,
    }

    #[async_trait]
    impl Router for CaptureRouter {
        async fn proxy_dial(&self, _: &str, host: &str, _: u16) -> Result<TransportStream> {
            Err(ProxyError::Blocked(host.to_string()))
        }

        async fn route_handle(&self, mut conn: TransportStream, host: &str, port: u16) -> Result<()> {
            let mut bytes = Vec::new();
            conn.read_to_end(&mut bytes).await?;
            self.seen
                .lock()
                .unwrap()
                .push((host.to_string(), port, bytes));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serve_http_replays_request() {
        let router = Arc::new(CaptureRouter::default());
        let (mut client, server) = tokio::io::duplex(4096);

        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        client.write_all(request).await.unwrap();
        client.shutdown().await.unwrap();

        serve_http(router.clone(), server, Duration::from_secs(5))
            .await
            .unwrap();

        let seen = router.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "example.com");
        assert_eq!(seen[0].1, 80);
        assert_eq!(seen[0].2, request);
    }

    #[tokio::test]
    async fn test_serve_http_garbage_closes_silently() {
        let router = Arc::new(CaptureRouter::default());
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"\x00\x01\x02 not http\r\n\r\n").await.unwrap();

        let result = serve_http(router.clone(), server, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ProxyError::SniffParse(_))));
        assert!(router.seen.lock().unwrap().is_empty());

        // no response bytes, just EOF
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_http_header_timeout() {
        let router = Arc::new(CaptureRouter::default());
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let result = serve_http(router, server, Duration::from_secs(3)).await;
        assert!(matches!(result, Err(ProxyError::SniffParse(_))));
        drop(client);
    }

    #[tokio::test]
    async fn test_serve_socks5_does_not_replay_handshake() {
        let router = Arc::new(CaptureRouter::default());
        let (mut client, server) = tokio::io::duplex(4096);

        let task = {
            let router = router.clone();
            tokio::spawn(async move { serve_socks5(router, server, Duration::from_secs(5)).await })
        };

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        client
            .write_all(&[5, 1, 0, 1, 93, 184, 216, 34, 0x01, 0xBB])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0);

        client.write_all(b"payload").await.unwrap();
        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let seen = router.seen.lock().unwrap();
        assert_eq!(seen[0].0, "93.184.216.34");
        assert_eq!(seen[0].1, 443);
        assert_eq!(seen[0].2, b"payload");
    }

    #[test]
    fn test_frontend_display() {
        assert_eq!(Frontend::Http.to_string(), "http");
        assert_eq!(Frontend::Https.to_string(), "https");
        assert_eq!(Frontend::Socks5.to_string(), "socks5");
    }
}
