//! Rule based router
//!
//! Rule forms:
//! - `**.example.com`: example.com and every subdomain
//! - `*.example.com`: exactly one label below example.com
//! - `example.com` / `1.2.3.4`: exact match
//!
//! Precedence is block > direct > proxy; a host matching no list is proxied.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConnConfig, RouterConfig, RuleListConfig};
use crate::core::{relay, ProxyDial, Router};
use crate::error::{ProxyError, Result};
use crate::logger::log;
use crate::transport::TransportStream;

/// Compiled rule list
#[derive(Debug, Default)]
pub struct RuleSet {
    exact: HashSet<String>,
    /// `**.` rules, stored without the prefix
    any_depth: HashSet<String>,
    /// `*.` rules, stored without the prefix
    one_label: HashSet<String>,
}

fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl RuleSet {
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for rule in rules {
            set.insert(rule.as_ref());
        }
        set
    }

    pub fn insert(&mut self, rule: &str) {
        let rule = normalize(rule);
        if rule.is_empty() {
            return;
        }
        if let Some(suffix) = rule.strip_prefix("**.") {
            self.any_depth.insert(suffix.to_string());
        } else if let Some(suffix) = rule.strip_prefix("*.") {
            self.one_label.insert(suffix.to_string());
        } else {
            self.exact.insert(rule);
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.any_depth.len() + self.one_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = normalize(host);
        if host.is_empty() {
            return false;
        }
        if self.exact.contains(&host) || self.any_depth.contains(&host) {
            return true;
        }

        let mut first = true;
        for (i, _) in host.match_indices('.') {
            let suffix = &host[i + 1..];
            if self.any_depth.contains(suffix) {
                return true;
            }
            if first && self.one_label.contains(suffix) {
                return true;
            }
            first = false;
        }
        false
    }
}

/// Read a rule file, one rule per non-blank line, each prefixed with `prefix`
pub fn load_rule_file(path: &Path, prefix: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("read rule file {}: {}", path.display(), e))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("{}{}", prefix, line))
        .collect())
}

fn compile(list: &RuleListConfig) -> Result<RuleSet> {
    let mut set = RuleSet::new(&list.rules);
    if let Some(path) = &list.file {
        for rule in load_rule_file(path, &list.file_prefix)? {
            set.insert(&rule);
        }
    }
    Ok(set)
}

/// Which way a destination goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Block,
    Direct,
    Proxy,
    /// No rule matched; proxied
    Unmatched,
}

impl Route {
    /// Marker printed with each routed destination
    pub fn marker(&self) -> &'static str {
        match self {
            Route::Block => "-X-",
            Route::Direct => "---",
            Route::Proxy => ">>>",
            Route::Unmatched => "...",
        }
    }
}

pub struct RuleRouter {
    block: RuleSet,
    direct: RuleSet,
    proxy: RuleSet,
    proxy_dial: Arc<dyn ProxyDial>,
    direct_dial: Arc<dyn ProxyDial>,
    buffer_size: usize,
    idle_timeout: Duration,
}

impl RuleRouter {
    pub fn new(
        block: RuleSet,
        direct: RuleSet,
        proxy: RuleSet,
        proxy_dial: Arc<dyn ProxyDial>,
        direct_dial: Arc<dyn ProxyDial>,
        conn: &ConnConfig,
    ) -> Self {
        Self {
            block,
            direct,
            proxy,
            proxy_dial,
            direct_dial,
            buffer_size: conn.buffer_size,
            idle_timeout: conn.idle_timeout,
        }
    }

    /// Compile inline rules and local rule files. An unreadable file fails.
    pub fn from_config(
        config: &RouterConfig,
        proxy_dial: Arc<dyn ProxyDial>,
        direct_dial: Arc<dyn ProxyDial>,
        conn: &ConnConfig,
    ) -> Result<Self> {
        let router = Self::new(
            compile(&config.block)?,
            compile(&config.direct)?,
            compile(&config.proxy)?,
            proxy_dial,
            direct_dial,
            conn,
        );
        log::info!(
            block_rules = router.block.len(),
            direct_rules = router.direct.len(),
            proxy_rules = router.proxy.len(),
            "Loaded rules"
        );
        Ok(router)
    }

    pub fn decide(&self, host: &str) -> Route {
        if self.block.matches(host) {
            Route::Block
        } else if self.direct.matches(host) {
            Route::Direct
        } else if self.proxy.matches(host) {
            Route::Proxy
        } else {
            Route::Unmatched
        }
    }
}

#[async_trait]
impl Router for RuleRouter {
    async fn proxy_dial(&self, network: &str, host: &str, port: u16) -> Result<TransportStream> {
        let route = self.decide(host);
        log::route(route.marker(), host, port);
        match route {
            Route::Block => Err(ProxyError::Blocked(host.to_string())),
            Route::Direct => self.direct_dial.dial(network, host, port).await,
            Route::Proxy | Route::Unmatched => self.proxy_dial.dial(network, host, port).await,
        }
    }

    async fn route_handle(&self, conn: TransportStream, host: &str, port: u16) -> Result<()> {
        let upstream = self.proxy_dial("tcp", host, port).await?;
        let result = relay(conn, upstream, self.buffer_size, self.idle_timeout).await?;
        log::debug!(
            host = host,
            port = port,
            up = result.a_to_b,
            down = result.b_to_a,
            idle_timeout = !result.completed,
            "Relay finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Records dialed targets and echoes everything back
    struct EchoDial {
        dialed: Mutex<Vec<String>>,
    }

    impl EchoDial {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                dialed: Mutex::new(Vec::new()),
            })
        }

        fn dialed(&self) -> Vec<String> {
            self.dialed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProxyDial for EchoDial {
        async fn dial(&self, _network: &str, host: &str, port: u16) -> Result<TransportStream> {
            self.dialed.lock().unwrap().push(format!("{}:{}", host, port));
            let (near, far) = tokio::io::duplex(1024);
            tokio::spawn(async move {
                let (mut r, mut w) = tokio::io::split(far);
                let _ = tokio::io::copy(&mut r, &mut w).await;
                let _ = w.shutdown().await;
            });
            Ok(Box::pin(near))
        }
    }

    fn router(block: &[&str], direct: &[&str], proxy: &[&str]) -> (RuleRouter, Arc<EchoDial>, Arc<EchoDial>) {
        let proxied = EchoDial::new();
        let direct_dial = EchoDial::new();
        let router = RuleRouter::new(
            RuleSet::new(block),
            RuleSet::new(direct),
            RuleSet::new(proxy),
            proxied.clone(),
            direct_dial.clone(),
            &ConnConfig::default(),
        );
        (router, proxied, direct_dial)
    }

    #[test]
    fn test_any_depth_rule() {
        let set = RuleSet::new(["**.example.com"]);
        assert!(set.matches("example.com"));
        assert!(set.matches("www.example.com"));
        assert!(set.matches("a.b.example.com"));
        assert!(!set.matches("notexample.com"));
        assert!(!set.matches("example.org"));
    }

    #[test]
    fn test_one_label_rule() {
        let set = RuleSet::new(["*.example.com"]);
        assert!(set.matches("www.example.com"));
        assert!(!set.matches("example.com"));
        assert!(!set.matches("a.b.example.com"));
    }

    #[test]
    fn test_exact_rule() {
        let set = RuleSet::new(["example.com", "10.0.0.1"]);
        assert!(set.matches("example.com"));
        assert!(set.matches("EXAMPLE.com."));
        assert!(set.matches("10.0.0.1"));
        assert!(!set.matches("www.example.com"));
        assert!(!set.matches(""));
    }

    #[test]
    fn test_precedence() {
        let (router, _, _) = router(
            &["ads.example.com"],
            &["**.example.com"],
            &["**.com"],
        );
        assert_eq!(router.decide("ads.example.com"), Route::Block);
        assert_eq!(router.decide("www.example.com"), Route::Direct);
        assert_eq!(router.decide("github.com"), Route::Proxy);
        assert_eq!(router.decide("example.org"), Route::Unmatched);
    }

    #[test]
    fn test_load_rule_file_applies_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("direct.txt");
        std::fs::write(&path, "example.com\n\n  lan  \n").unwrap();

        let rules = load_rule_file(&path, "**.").unwrap();
        assert_eq!(rules, vec!["**.example.com", "**.lan"]);
    }

    #[test]
    fn test_missing_rule_file_is_config_error() {
        let list = RuleListConfig {
            file: Some("/nonexistent/sower/rules.txt".into()),
            ..RuleListConfig::default()
        };
        assert!(matches!(compile(&list), Err(ProxyError::Config(_))));
    }

    #[tokio::test]
    async fn test_proxy_dial_dispatch() {
        let (router, proxied, direct) = router(&["blocked.test"], &["**.lan"], &[]);

        assert!(matches!(
            router.proxy_dial("tcp", "blocked.test", 80).await,
            Err(ProxyError::Blocked(_))
        ));
        router.proxy_dial("tcp", "nas.lan", 445).await.unwrap();
        router.proxy_dial("tcp", "example.com", 443).await.unwrap();

        assert_eq!(direct.dialed(), vec!["nas.lan:445"]);
        assert_eq!(proxied.dialed(), vec!["example.com:443"]);
    }

    #[tokio::test]
    async fn test_route_handle_relays() {
        let (router, proxied, _) = router(&[], &[], &[]);
        let (mut client, server) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move {
            router
                .route_handle(Box::pin(server), "example.com", 80)
                .await
        });

        client.write_all(b"hello").await.unwrap();
        let mut echo = [0u8; 5];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"hello");

        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        task.await.unwrap().unwrap();
        assert_eq!(proxied.dialed(), vec!["example.com:80"]);
    }
}
