//! TLS SNI sniffing
//!
//! The ClientHello is parsed by rustls' lazy acceptor, which stops as soon
//! as the hello is complete. No server config is ever chosen, so the
//! handshake never progresses past the hello.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::LazyConfigAcceptor;

use crate::core::PeekStream;
use crate::error::{ProxyError, Result};

/// Read side of a peek stream with writes swallowed, so a malformed hello
/// cannot make the acceptor send an alert to the client
struct Silent<'a, S> {
    inner: &'a mut PeekStream<S>,
}

impl<S: AsyncRead + Unpin> AsyncRead for Silent<'_, S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl<S: Unpin> AsyncWrite for Silent<'_, S> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Read the ClientHello through `conn` and return its server name
pub async fn sniff_tls<S>(conn: &mut PeekStream<S>) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let acceptor = LazyConfigAcceptor::new(
        rustls::server::Acceptor::default(),
        Silent { inner: conn },
    );
    let start = acceptor
        .await
        .map_err(|e| ProxyError::SniffParse(format!("tls client hello: {}", e)))?;

    let hello = start.client_hello();
    hello
        .server_name()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::SniffParse("client hello carries no SNI".into()))
}
