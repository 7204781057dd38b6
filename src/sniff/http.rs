//! HTTP `Host` sniffing

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::PeekStream;
use crate::error::{ProxyError, Result};
use crate::utils::split_host_port;

/// Request head larger than this is rejected
pub const MAX_HEADER_SIZE: usize = 16 * 1024;

const DEFAULT_HTTP_PORT: u16 = 80;

/// Read the request head through `conn` and return the `Host` target.
///
/// Every byte read stays recorded in `conn`; the caller replays it.
pub async fn sniff_http<S>(conn: &mut PeekStream<S>) -> Result<(String, u16)>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 2048];
    loop {
        let n = conn.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::SniffParse(
                "connection closed before request head".into(),
            ));
        }

        if let Some(target) = parse_host(conn.peeked())? {
            return Ok(target);
        }
        if conn.peeked().len() >= MAX_HEADER_SIZE {
            return Err(ProxyError::SniffParse("request head too large".into()));
        }
    }
}

/// `Ok(None)` while the head is still incomplete
fn parse_host(buf: &[u8]) -> Result<Option<(String, u16)>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProxyError::SniffParse(format!("http: {}", e))),
    }

    let host = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::SniffParse("missing Host header".into()))?;

    split_host_port(host, DEFAULT_HTTP_PORT)
        .filter(|(h, _)| !h.is_empty())
        .map(Some)
        .ok_or_else(|| ProxyError::SniffParse(format!("invalid Host header: {}", host)))
}
