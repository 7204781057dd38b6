use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ProxyError;

/// Log level accepted by `--log_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `log_mode`.
pub fn init_logger(log_mode: &str) {
    let filter = if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        env_filter
    } else {
        let level = LogLevel::parse(log_mode).unwrap_or_default();
        EnvFilter::new(format!("sower={}", level.as_str()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(true)
                .with_ansi(true)
                .compact(),
        )
        .init();
}

/// Level a per-connection failure is reported at
pub fn failure_level(err: &ProxyError) -> Level {
    match err {
        // sniffers warn themselves; resets mid-relay are routine
        ProxyError::SniffParse(_) | ProxyError::Io(_) => Level::DEBUG,
        ProxyError::Blocked(_) => Level::INFO,
        _ => Level::WARN,
    }
}

pub mod log {
    pub use tracing::{debug, error, info, warn};

    use crate::error::ProxyError;
    use tracing::Level;

    /// Per-connection failure, at the level `failure_level` picks
    pub fn connection_failed(peer: &str, frontend: &str, err: &ProxyError) {
        let level = super::failure_level(err);
        if level == Level::WARN {
            warn!(peer = peer, frontend = frontend, error = %err, "Connection failed");
        } else if level == Level::INFO {
            info!(peer = peer, frontend = frontend, error = %err, "Connection failed");
        } else {
            debug!(peer = peer, frontend = frontend, error = %err, "Connection failed");
        }
    }

    /// Connection lifecycle event
    pub fn connection(addr: &str, event: &str) {
        debug!(peer = addr, event = event, "Connection");
    }

    /// Destination extracted by a front-end
    pub fn sniffed(frontend: &str, host: &str, port: u16) {
        debug!(frontend = frontend, host = host, port = port, "Sniffed");
    }

    /// Routing decision; the marker mirrors the startup legend
    pub fn route(marker: &str, host: &str, port: u16) {
        info!("{} {}:{}", marker, host, port);
    }
}
