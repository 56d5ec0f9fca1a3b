//! Lifecycle and configuration wrapper around [`ProxyServer`].

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::interceptor::StatementInterceptor;
use crate::proxy::{ProxyServer, UpstreamTarget};
use crate::rules::{MaskingRule, RuleStore};
use crate::state::{Metrics, ProxyState};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Resolve the upstream host and port from a datasource connection string.
///
/// Accepts `jdbc:mysql://host[:port]/db?...`, `mysql://...`, `mariadb://...`
/// and bare `host[:port]`. The port defaults to 3306.
///
/// ```
/// use sqlmask_proxy::manager::resolve_target;
///
/// let target = resolve_target("jdbc:mysql://db.internal/shop?useSSL=false").unwrap();
/// assert_eq!(target.to_string(), "db.internal:3306");
/// ```
pub fn resolve_target(datasource_url: &str) -> Result<UpstreamTarget> {
    let invalid = |reason: &str| ConfigError::InvalidDatasource {
        url: datasource_url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = datasource_url.trim();
    let without_jdbc = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
        _ => trimmed,
    };

    if without_jdbc.contains("://") {
        let parsed = url::Url::parse(without_jdbc).map_err(|e| invalid(&e.to_string()))?;
        match parsed.scheme() {
            "mysql" | "mariadb" => {}
            other => return Err(invalid(&format!("unsupported scheme '{}'", other)).into()),
        }
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        return Ok(UpstreamTarget::new(
            host,
            parsed.port().unwrap_or(DEFAULT_MYSQL_PORT),
        ));
    }

    let authority = without_jdbc.split(['/', '?']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("missing host").into());
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(&format!("invalid port '{}'", port)))?;
            Ok(UpstreamTarget::new(host, port))
        }
        Some(_) => Err(invalid("missing host").into()),
        None => Ok(UpstreamTarget::new(authority, DEFAULT_MYSQL_PORT)),
    }
}

/// Snapshot returned by [`ProxyManager::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub running: bool,
    pub port: u16,
    pub target: String,
    pub rule_table_count: usize,
}

pub struct ProxyManager {
    config: Config,
    rules: Arc<RuleStore>,
    server: ProxyServer,
}

impl ProxyManager {
    pub fn new(config: Config, rules: Arc<RuleStore>) -> Result<Self> {
        let target = resolve_target(&config.datasource.url)?;
        let server = ProxyServer::new(config.proxy.clone(), target, rules.clone());

        Ok(Self {
            config,
            rules,
            server,
        })
    }

    /// Start the proxy if the configuration asks for it.
    pub async fn init(&self) -> Result<()> {
        if self.config.proxy.auto_start {
            tracing::info!("Auto-start enabled, starting proxy");
            self.start_proxy().await?;
        } else {
            tracing::info!("Auto-start disabled, proxy stays stopped until requested");
        }
        Ok(())
    }

    /// Idempotent; concurrent calls share a single listener.
    pub async fn start_proxy(&self) -> Result<SocketAddr> {
        self.server.start().await
    }

    /// Idempotent.
    pub async fn stop_proxy(&self) -> Result<()> {
        self.server.stop().await
    }

    pub fn get_status(&self) -> ProxyStatus {
        let port = self
            .server
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.config.proxy.port);

        ProxyStatus {
            running: self.server.is_running(),
            port,
            target: self.server.target().to_string(),
            rule_table_count: self.rules.table_count(),
        }
    }

    pub fn state(&self) -> ProxyState {
        self.server.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Replace every rule for `table`.
    pub fn update_masking_rules(&self, table: &str, rules: Vec<MaskingRule>) {
        tracing::info!(table, count = rules.len(), "Updating masking rules");
        self.rules.set_rules(table, rules);
    }

    pub fn clear_masking_rules(&self) {
        tracing::info!("Clearing all masking rules");
        self.rules.clear_all();
    }

    pub fn clear_table(&self, table: &str) {
        tracing::info!(table, "Clearing masking rules");
        self.rules.clear_table(table);
    }

    /// Point subsequent connections at a new datasource. Open pairs keep
    /// their current upstream.
    pub fn retarget(&self, datasource_url: &str) -> Result<UpstreamTarget> {
        let target = resolve_target(datasource_url)?;
        self.server.retarget(target.clone());
        Ok(target)
    }

    /// Interceptor bound to the same rule store and rewriter as the proxy.
    pub fn interceptor(&self) -> StatementInterceptor {
        StatementInterceptor::with_rewriter(self.rules.clone(), self.server.rewriter().clone())
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.server.metrics()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
