use std::io;
use thiserror::Error;

/// Errors raised while sniffing, wrapping, unwrapping and dialing connections
///
/// Every variant is local to one connection except `Config`, which only
/// appears during startup.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Short read, bad CRLF, unknown command or address type
    #[error("Malformed header: {0}")]
    MalformedHeader(&'static str),

    /// Request secret does not match the configured one
    #[error("Authentication failed")]
    AuthenticationFailure,

    /// Outbound frame was not fully written by a single write
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Empty host or zero port before dial
    #[error("Invalid target ({host}:{port})")]
    InvalidTarget { host: String, port: u16 },

    /// Domain names are length-prefixed with one byte on the wire
    #[error("Domain name too long: {0} bytes")]
    DomainTooLong(usize),

    /// Network, TLS or SSH connect to the upstream failed
    #[error("Upstream dial failed: {0}")]
    UpstreamDial(String),

    /// HTTP, TLS or SOCKS5 header could not be parsed
    #[error("Sniff parse failure: {0}")]
    SniffParse(String),

    /// Destination matched a block rule
    #[error("Blocked target: {0}")]
    Blocked(String),

    /// Operation not offered by this transport
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        ProxyError::Config(format!("TOML parse error: {}", err))
    }
}
