//! Configuration module
//!
//! Settings come from three layers, later ones winning:
//! built-in defaults, an optional TOML file (`-f`), then CLI flags and
//! `SOWER_*` environment variables.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

use crate::transport::RemoteKind;
use crate::utils::split_host_port;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    // plain seconds
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Suffixes that always bypass the remote: reverse DNS zones
const DIRECT_BUILTIN_RULES: [&str; 2] = ["**.in-addr.arpa", "**.ip6.arpa"];

/// CLI arguments
///
/// Supports environment variables with SOWER_ prefix
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Sniffing HTTP/HTTPS/SOCKS5 front-end forwarding to a sower, trojan, socks5 or ssh remote"
)]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(short = 'f', long = "config", env = "SOWER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote type: sower, trojan, socks5 or sshd (default: sower)
    #[arg(long, env = "SOWER_REMOTE_TYPE")]
    pub remote_type: Option<String>,

    /// Remote address, e.g. proxy.com or 127.0.0.1:7890
    #[arg(long, env = "SOWER_REMOTE_ADDR")]
    pub remote_addr: Option<String>,

    /// Remote user (sshd)
    #[arg(long, env = "SOWER_REMOTE_USER")]
    pub remote_user: Option<String>,

    /// Remote password
    #[arg(long, env = "SOWER_REMOTE_PASSWORD")]
    pub remote_password: Option<String>,

    /// IP the HTTP/HTTPS sniffers listen on (ports 80 and 443)
    #[arg(long, env = "SOWER_DNS_SERVE")]
    pub dns_serve: Option<String>,

    /// Disable the HTTP/HTTPS sniffers
    #[arg(long, env = "SOWER_DNS_DISABLE")]
    pub dns_disable: bool,

    /// SOCKS5 listen address (default: :1080)
    #[arg(long, env = "SOWER_SOCKS5_ADDR")]
    pub socks5_addr: Option<String>,

    /// Disable the SOCKS5 listener
    #[arg(long, env = "SOWER_SOCKS5_DISABLE")]
    pub socks5_disable: bool,

    /// Block rules, comma separated
    #[arg(long, env = "SOWER_BLOCK_RULES", value_delimiter = ',')]
    pub block_rules: Vec<String>,

    /// Direct rules, comma separated
    #[arg(long, env = "SOWER_DIRECT_RULES", value_delimiter = ',')]
    pub direct_rules: Vec<String>,

    /// Proxy rules, comma separated
    #[arg(long, env = "SOWER_PROXY_RULES", value_delimiter = ',')]
    pub proxy_rules: Vec<String>,

    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "SOWER_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    // ==================== Performance Tuning ====================
    /// Outbound connect timeout (default: 5s)
    #[arg(long, env = "SOWER_CONNECT_TIMEOUT", value_parser = parse_duration, help_heading = "Performance")]
    pub connect_timeout: Option<Duration>,

    /// Timeout for reading the sniffed request header (default: 5s)
    #[arg(long, env = "SOWER_REQUEST_TIMEOUT", value_parser = parse_duration, help_heading = "Performance")]
    pub request_timeout: Option<Duration>,

    /// Relay idle timeout (default: 5m)
    #[arg(long, env = "SOWER_IDLE_TIMEOUT", value_parser = parse_duration, help_heading = "Performance")]
    pub idle_timeout: Option<Duration>,

    /// Relay buffer size in bytes (default: 32KB)
    #[arg(long, env = "SOWER_BUFFER_SIZE", help_heading = "Performance")]
    pub buffer_size: Option<usize>,

    /// Maximum concurrent connections per listener, 0 for unlimited
    #[arg(long, env = "SOWER_MAX_CONNECTIONS", help_heading = "Performance")]
    pub max_connections: Option<usize>,

    /// Enable TCP_NODELAY on accepted connections (default: true)
    #[arg(long, env = "SOWER_TCP_NODELAY", help_heading = "Performance")]
    pub tcp_nodelay: Option<bool>,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    #[serde(rename = "type")]
    pub kind: RemoteKind,
    pub addr: String,
    pub user: String,
    pub password: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::Sower,
            addr: String::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl RemoteConfig {
    /// Host and port of the remote, applying the kind's default port
    pub fn endpoint(&self) -> Result<(String, u16)> {
        split_host_port(&self.addr, self.kind.default_port())
            .filter(|(host, _)| !host.is_empty())
            .ok_or_else(|| anyhow!("Invalid remote address: {}", self.addr))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub disable: bool,
    pub serve: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            disable: false,
            serve: "127.0.0.1".to_string(),
        }
    }
}

impl DnsConfig {
    /// Listen address of a sniffer on `serve`
    pub fn listen_addr(&self, port: u16) -> String {
        if self.serve.contains(':') {
            format!("[{}]:{}", self.serve, port)
        } else {
            format!("{}:{}", self.serve, port)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Socks5Config {
    pub disable: bool,
    pub addr: String,
}

impl Default for Socks5Config {
    fn default() -> Self {
        Self {
            disable: false,
            addr: ":1080".to_string(),
        }
    }
}

impl Socks5Config {
    /// Listen address with an empty host expanded to all interfaces
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

/// One rule list: inline rules plus an optional local file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleListConfig {
    pub file: Option<PathBuf>,
    /// Prepended to every line read from `file`
    pub file_prefix: String,
    pub rules: Vec<String>,
}

impl Default for RuleListConfig {
    fn default() -> Self {
        Self {
            file: None,
            file_prefix: "**.".to_string(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub block: RuleListConfig,
    pub direct: RuleListConfig,
    pub proxy: RuleListConfig,
}

/// Connection performance configuration
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ConnConfig {
    /// Outbound connect timeout
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// Header read timeout for the sniffers
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    /// Relay idle timeout
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    /// Buffer size for data transfer
    pub buffer_size: usize,
    /// 0 = unlimited
    pub max_connections: usize,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            buffer_size: 32 * 1024,
            max_connections: 0,
            tcp_nodelay: true,
        }
    }
}

/// Complete runtime configuration, immutable once loaded
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub dns: DnsConfig,
    pub socks5: Socks5Config,
    pub router: RouterConfig,
    pub conn: ConnConfig,
}

impl Config {
    /// Build the runtime configuration from CLI args and the optional file
    pub fn load(cli: &CliArgs) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_cli(cli)?;
        config.finalize()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &CliArgs) -> Result<()> {
        if let Some(kind) = &cli.remote_type {
            self.remote.kind = kind.parse()?;
        }
        if let Some(addr) = &cli.remote_addr {
            self.remote.addr = addr.clone();
        }
        if let Some(user) = &cli.remote_user {
            self.remote.user = user.clone();
        }
        if let Some(password) = &cli.remote_password {
            self.remote.password = password.clone();
        }

        if let Some(serve) = &cli.dns_serve {
            self.dns.serve = serve.clone();
        }
        self.dns.disable |= cli.dns_disable;
        if let Some(addr) = &cli.socks5_addr {
            self.socks5.addr = addr.clone();
        }
        self.socks5.disable |= cli.socks5_disable;

        self.router.block.rules.extend(cli.block_rules.iter().cloned());
        self.router.direct.rules.extend(cli.direct_rules.iter().cloned());
        self.router.proxy.rules.extend(cli.proxy_rules.iter().cloned());

        if let Some(v) = cli.connect_timeout {
            self.conn.connect_timeout = v;
        }
        if let Some(v) = cli.request_timeout {
            self.conn.request_timeout = v;
        }
        if let Some(v) = cli.idle_timeout {
            self.conn.idle_timeout = v;
        }
        if let Some(v) = cli.buffer_size {
            self.conn.buffer_size = v;
        }
        if let Some(v) = cli.max_connections {
            self.conn.max_connections = v;
        }
        if let Some(v) = cli.tcp_nodelay {
            self.conn.tcp_nodelay = v;
        }
        Ok(())
    }

    /// Validate, then add the rules that keep the remote itself off the proxy
    fn finalize(&mut self) -> Result<()> {
        self.validate()?;
        let (remote_host, _) = self.remote.endpoint()?;
        self.router.direct.rules.push(remote_host);
        self.router
            .direct
            .rules
            .extend(DIRECT_BUILTIN_RULES.iter().map(|r| r.to_string()));
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.remote.addr.is_empty() {
            return Err(anyhow!("Remote address is required (--remote_addr)"));
        }
        self.remote.endpoint()?;

        match self.remote.kind {
            RemoteKind::Sower | RemoteKind::Trojan | RemoteKind::Sshd
                if self.remote.password.is_empty() =>
            {
                return Err(anyhow!(
                    "Remote password is required for {} (--remote_password)",
                    self.remote.kind
                ));
            }
            RemoteKind::Sshd if self.remote.user.is_empty() => {
                return Err(anyhow!("Remote user is required for sshd (--remote_user)"));
            }
            _ => {}
        }

        if !self.dns.disable && self.dns.serve.is_empty() {
            return Err(anyhow!("DNS serve address is required (--dns_serve)"));
        }
        if !self.socks5.disable && self.socks5.addr.is_empty() {
            return Err(anyhow!("SOCKS5 address is required (--socks5_addr)"));
        }
        if self.conn.buffer_size == 0 {
            return Err(anyhow!("buffer_size must be greater than 0"));
        }
        Ok(())
    }
}
