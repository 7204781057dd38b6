//! Listener startup and accept loops
//!
//! Every listener runs an explicit `accept -> spawn` loop until the shared
//! cancellation token fires.

use crate::config::{Config, ConnConfig};
use crate::core::Router;
use crate::handler::Frontend;
use crate::logger::log;

use anyhow::{anyhow, Context, Result};
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// TCP keepalive interval, dead peers are detected in ~45s (3 probes x 15s)
const TCP_KEEPALIVE_SECS: u64 = 15;

const TCP_BACKLOG: i32 = 1024;

/// Bind a listener with SO_REUSEADDR for fast restarts
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let socket_addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(_) => tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| anyhow!("cannot resolve listen address {}", addr))?,
    };

    let socket = socket2::Socket::new(
        match socket_addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&socket_addr.into())
        .with_context(|| format!("listen on {}", socket_addr))?;
    socket.listen(TCP_BACKLOG)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Socket options for an accepted client connection
fn tune_accepted(stream: &TcpStream, tcp_nodelay: bool) -> std::io::Result<()> {
    if tcp_nodelay {
        stream.set_nodelay(true)?;
    }
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(TCP_KEEPALIVE_SECS))
        .with_interval(Duration::from_secs(TCP_KEEPALIVE_SECS));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Accept connections on `listener` and serve each in its own task
pub async fn run_listener(
    listener: TcpListener,
    frontend: Frontend,
    router: Arc<dyn Router>,
    conn_config: ConnConfig,
    cancel: CancellationToken,
) -> Result<()> {
    // Connection limiter: 0 = unlimited
    let conn_limiter = if conn_config.max_connections > 0 {
        Some(Arc::new(Semaphore::new(conn_config.max_connections)))
    } else {
        None
    };

    log::info!(
        address = %listener.local_addr()?,
        frontend = %frontend,
        max_connections = conn_config.max_connections,
        "Listener started"
    );

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                log::error!(frontend = %frontend, error = %e, "Failed to accept connection");
                continue;
            }
        };
        let peer_addr = addr.to_string();
        log::connection(&peer_addr, "new");

        // Acquire connection permit (backpressure when at limit)
        let permit = match &conn_limiter {
            Some(limiter) => tokio::select! {
                _ = cancel.cancelled() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let router = Arc::clone(&router);
        tokio::spawn(async move {
            // Hold permit for the lifetime of this connection
            let _permit = permit;

            if let Err(e) = tune_accepted(&stream, conn_config.tcp_nodelay) {
                log::debug!(peer = %peer_addr, error = %e, "Failed to set socket options");
            }

            if let Err(e) = frontend
                .serve(router, stream, conn_config.request_timeout)
                .await
            {
                log::connection_failed(&peer_addr, &frontend.to_string(), &e);
            }
            log::connection(&peer_addr, "closed");
        });
    }

    log::info!(frontend = %frontend, "Listener stopped");
    Ok(())
}

/// Bind every enabled listener, then run them until `cancel` fires.
///
/// Bind failures are returned before any connection is accepted.
pub async fn run_server(
    config: &Config,
    router: Arc<dyn Router>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut listeners = Vec::new();

    if config.dns.disable {
        log::info!("HTTP/HTTPS sniffing disabled");
    } else {
        listeners.push((bind(&config.dns.listen_addr(80)).await?, Frontend::Http));
        listeners.push((bind(&config.dns.listen_addr(443)).await?, Frontend::Https));
    }

    if config.socks5.disable {
        log::info!("SOCKS5 proxy disabled");
    } else {
        listeners.push((bind(&config.socks5.listen_addr()).await?, Frontend::Socks5));
    }

    if listeners.is_empty() {
        return Err(anyhow!("all listeners are disabled"));
    }

    let mut tasks = JoinSet::new();
    for (listener, frontend) in listeners {
        tasks.spawn(run_listener(
            listener,
            frontend,
            Arc::clone(&router),
            config.conn,
            cancel.clone(),
        ));
    }

    while let Some(joined) = tasks.join_next().await {
        joined??;
    }
    Ok(())
}
