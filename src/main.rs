// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sower::config::{CliArgs, Config};
use sower::core::Router;
use sower::dialer::{gen_proxy_dial, DirectDialer};
use sower::logger::{self, log};
use sower::router::RuleRouter;
use sower::server_runner;

#[tokio::main]
async fn main() -> Result<()> {
    // Install ring as the default crypto provider for rustls
    // This must be done before any TLS operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let cli = CliArgs::parse_args();
    logger::init_logger(&cli.log_mode);

    let config = Config::load(&cli)?;
    log::info!(
        remote_type = %config.remote.kind,
        remote_addr = %config.remote.addr,
        "Starting sower"
    );

    let connect_timeout = config.conn.connect_timeout;
    let proxy_dial = gen_proxy_dial(&config.remote, connect_timeout).await?;
    let direct_dial = Arc::new(DirectDialer::new(connect_timeout));
    let router: Arc<dyn Router> = Arc::new(RuleRouter::from_config(
        &config.router,
        proxy_dial,
        direct_dial,
        &config.conn,
    )?);

    log::info!("-X- : blockRule matched");
    log::info!("--- : directRule matched");
    log::info!(">>> : proxyRule matched");
    log::info!("... : no rule matched, proxied");

    let cancel_token = CancellationToken::new();
    let cancel_token_clone = cancel_token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        cancel_token_clone.cancel();
    });

    server_runner::run_server(&config, router, cancel_token).await?;
    log::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            _ => {
                log::warn!("Failed to setup signal handlers, falling back to ctrl-c");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                log::info!("SIGINT received, shutting down...");
            }
            _ = sigterm.recv() => {
                log::info!("SIGTERM received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Shutdown signal received...");
    }
}
