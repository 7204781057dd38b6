//! Peek-and-replay stream wrapper
//!
//! While peeking, every byte read from the inner stream is also recorded.
//! After `stop_peeking().replay()` the recorded bytes are served again before
//! the inner stream is read, so a later consumer sees the original byte
//! stream exactly once. Writes always pass straight through.

use bytes::{Buf, BytesMut};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Stream that can re-serve the bytes read while sniffing
    pub struct PeekStream<S> {
        #[pin]
        inner: S,
        // bytes recorded in peek mode; drained from the front on replay
        buf: BytesMut,
        peeking: bool,
        replaying: bool,
    }
}

impl<S> PeekStream<S> {
    /// Wrap a stream; peek mode is active from construction
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            peeking: true,
            replaying: false,
        }
    }

    /// Freeze the recorded bytes; later reads are no longer recorded
    pub fn stop_peeking(&mut self) -> &mut Self {
        self.peeking = false;
        self
    }

    /// Serve the recorded bytes before any further live bytes.
    ///
    /// Implies `stop_peeking`, so replayed bytes are never recorded twice.
    pub fn replay(&mut self) -> &mut Self {
        self.peeking = false;
        self.replaying = true;
        self
    }

    /// Bytes recorded so far and not yet replayed
    pub fn peeked(&self) -> &[u8] {
        &self.buf
    }

    /// Whether reads are still being recorded
    pub fn is_peeking(&self) -> bool {
        self.peeking
    }
}

impl<S: AsyncRead> AsyncRead for PeekStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();

        if *this.replaying && !this.buf.is_empty() {
            let n = this.buf.len().min(out.remaining());
            out.put_slice(&this.buf[..n]);
            this.buf.advance(n);
            if this.buf.is_empty() {
                // release the peek buffer once drained
                *this.buf = BytesMut::new();
                *this.replaying = false;
            }
            return Poll::Ready(Ok(()));
        }

        let before = out.filled().len();
        let result = this.inner.poll_read(cx, out);
        if *this.peeking {
            if let Poll::Ready(Ok(())) = &result {
                this.buf.extend_from_slice(&out.filled()[before..]);
            }
        }
        result
    }
}

impl<S: AsyncWrite> AsyncWrite for PeekStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const DATA: &[u8] = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\nbody";

    async fn read_prefix<S: AsyncRead + Unpin>(stream: &mut PeekStream<S>, len: usize) -> Vec<u8> {
        let mut prefix = vec![0u8; len];
        stream.read_exact(&mut prefix).await.unwrap();
        prefix
    }

    async fn replay_after_prefix(len: usize) -> Vec<u8> {
        let mut stream = PeekStream::new(Cursor::new(DATA.to_vec()));
        let prefix = read_prefix(&mut stream, len).await;
        assert_eq!(prefix, &DATA[..len]);

        stream.stop_peeking().replay();
        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();
        all
    }

    #[tokio::test]
    async fn test_replay_empty_prefix() {
        assert_eq!(replay_after_prefix(0).await, DATA);
    }

    #[tokio::test]
    async fn test_replay_one_byte_prefix() {
        assert_eq!(replay_after_prefix(1).await, DATA);
    }

    #[tokio::test]
    async fn test_replay_full_sequence() {
        assert_eq!(replay_after_prefix(DATA.len()).await, DATA);
    }

    #[tokio::test]
    async fn test_replay_partial_prefix() {
        assert_eq!(replay_after_prefix(17).await, DATA);
    }

    #[tokio::test]
    async fn test_replay_into_small_reads() {
        let mut stream = PeekStream::new(Cursor::new(DATA.to_vec()));
        let _ = read_prefix(&mut stream, 20).await;
        stream.replay();

        // drain through a buffer smaller than the recorded prefix
        let mut all = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            all.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(all, DATA);
    }

    #[tokio::test]
    async fn test_stop_peeking_freezes_buffer() {
        let mut stream = PeekStream::new(Cursor::new(DATA.to_vec()));
        let _ = read_prefix(&mut stream, 4).await;
        stream.stop_peeking();
        assert!(!stream.is_peeking());

        let _ = read_prefix(&mut stream, 4).await;
        assert_eq!(stream.peeked(), &DATA[..4]);
    }

    #[tokio::test]
    async fn test_without_replay_bytes_are_consumed_once() {
        let mut stream = PeekStream::new(Cursor::new(DATA.to_vec()));
        let _ = read_prefix(&mut stream, 4).await;
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, &DATA[4..]);
    }

    #[tokio::test]
    async fn test_replay_over_duplex_with_late_bytes() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = PeekStream::new(server);

        client.write_all(b"hello ").await.unwrap();
        let mut first = [0u8; 6];
        stream.read_exact(&mut first).await.unwrap();
        stream.stop_peeking().replay();

        client.write_all(b"world").await.unwrap();
        drop(client);

        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, b"hello world");
    }

    #[tokio::test]
    async fn test_writes_pass_through() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = PeekStream::new(server);

        stream.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        assert!(stream.peeked().is_empty());
    }
}
