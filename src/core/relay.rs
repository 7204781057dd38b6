//! Bidirectional relay with idle timeout detection
//!
//! Copies both directions with a fixed-size chunk per direction. The relay
//! ends as soon as either direction reaches EOF or fails, or when the pair
//! goes idle; both connections are then dropped.

use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::time::Instant;

/// How often the idle checker wakes up
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Result of bidirectional copy
#[derive(Debug, Clone, Copy)]
pub struct CopyResult {
    /// Bytes transferred from A to B (upload)
    pub a_to_b: u64,
    /// Bytes transferred from B to A (download)
    pub b_to_a: u64,
    /// Whether one direction reached EOF (true) or the pair timed out (false)
    pub completed: bool,
}

pin_project! {
    /// A stream wrapper that tracks the last activity time and bytes read
    struct TimedStream<S> {
        #[pin]
        inner: S,
        start_time: Instant,
        last_activity: Arc<AtomicU64>,
        read_bytes: Arc<AtomicU64>,
    }
}

impl<S> TimedStream<S> {
    fn new(
        inner: S,
        start_time: Instant,
        last_activity: Arc<AtomicU64>,
        read_bytes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner,
            start_time,
            last_activity,
            read_bytes,
        }
    }
}

impl<S: AsyncRead> AsyncRead for TimedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let before_len = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let bytes_read = buf.filled().len() - before_len;
            if bytes_read > 0 {
                this.last_activity
                    .store(this.start_time.elapsed().as_secs(), Ordering::Release);
                this.read_bytes
                    .fetch_add(bytes_read as u64, Ordering::Relaxed);
            }
        }
        result
    }
}

impl<S: AsyncWrite> AsyncWrite for TimedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();
        let result = this.inner.poll_write(cx, buf);
        if matches!(&result, Poll::Ready(Ok(n)) if *n > 0) {
            this.last_activity
                .store(this.start_time.elapsed().as_secs(), Ordering::Release);
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Relay bytes between `a` (client side) and `b` (upstream side).
///
/// Both streams are consumed and dropped, closing them, when this returns.
/// Byte counters stay accurate on timeout and are lost only on error.
pub async fn relay<A, B>(
    a: A,
    b: B,
    buffer_size: usize,
    idle_timeout: Duration,
) -> std::io::Result<CopyResult>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let start_time = Instant::now();
    let last_activity = Arc::new(AtomicU64::new(0));
    let a_to_b = Arc::new(AtomicU64::new(0));
    let b_to_a = Arc::new(AtomicU64::new(0));

    // reads from A are uploads, reads from B are downloads
    let stream_a = TimedStream::new(a, start_time, Arc::clone(&last_activity), Arc::clone(&a_to_b));
    let stream_b = TimedStream::new(b, start_time, Arc::clone(&last_activity), Arc::clone(&b_to_a));

    let (a_read, mut a_write) = tokio::io::split(stream_a);
    let (b_read, mut b_write) = tokio::io::split(stream_b);
    let mut a_read = BufReader::with_capacity(buffer_size, a_read);
    let mut b_read = BufReader::with_capacity(buffer_size, b_read);

    let upload = tokio::io::copy_buf(&mut a_read, &mut b_write);
    let download = tokio::io::copy_buf(&mut b_read, &mut a_write);

    let idle_timeout_secs = idle_timeout.as_secs().max(1);
    let timeout_check = async {
        let period = IDLE_CHECK_INTERVAL
            .min(idle_timeout)
            .max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let last_active = last_activity.load(Ordering::Acquire);
            let idle_secs = start_time.elapsed().as_secs().saturating_sub(last_active);
            if idle_secs >= idle_timeout_secs {
                return idle_secs;
            }
        }
    };

    // first direction to finish ends the relay; the halves drop on return
    let completed = tokio::select! {
        result = upload => {
            result?;
            true
        }
        result = download => {
            result?;
            true
        }
        _ = timeout_check => false,
    };

    Ok(CopyResult {
        a_to_b: a_to_b.load(Ordering::Relaxed),
        b_to_a: b_to_a.load(Ordering::Relaxed),
        completed,
    })
}
