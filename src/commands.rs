use crate::config::Config;
use crate::error::{ConfigError, ProxyError, Result};
use crate::interceptor::StatementInterceptor;
use crate::manager::resolve_target;
use crate::proxy::UpstreamTarget;
use crate::rules::RuleStore;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{error, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_config_check(config: Config, probe: bool) -> Result<()> {
    info!("Checking configuration...");

    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");

    let target = resolve_target(&config.datasource.url)?;
    info!("  Listen address: {}", config.proxy.listen_address());
    info!("  Upstream target: {}", target);
    info!("  Auto-start: {}", config.proxy.auto_start);

    let rules = RuleStore::new();
    rules.load(&config.rules);
    info!("  {} rule table(s) configured", rules.table_count());
    for table in rules.tables() {
        for rule in rules.get_rules(&table).iter() {
            info!(
                "    {}.{} -> {}{}",
                rule.table,
                rule.column,
                rule.masking_type,
                if rule.active { "" } else { " (inactive)" }
            );
        }
    }

    if probe {
        match probe_upstream(&target).await {
            Ok(()) => info!("  ✓ Upstream {} is reachable", target),
            Err(e) => {
                error!("  ✗ Upstream probe failed: {}", e);
                return Err(ConfigError::Validation(format!(
                    "upstream {} is not reachable",
                    target
                ))
                .into());
            }
        }
    }

    info!("✓ All checks passed");
    Ok(())
}

async fn probe_upstream(target: &UpstreamTarget) -> Result<()> {
    match timeout(PROBE_TIMEOUT, TcpStream::connect(target.address())).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(ProxyError::UpstreamUnavailable(e.to_string())),
        Err(_) => Err(ProxyError::UpstreamUnavailable(format!(
            "connect timed out after {:?}",
            PROBE_TIMEOUT
        ))),
    }
}

/// SQL the interceptor would execute for `sql` under the configured rules.
pub fn run_rewrite(config: &Config, sql: &str) -> String {
    let rules = RuleStore::shared();
    rules.load(&config.rules);
    StatementInterceptor::new(rules).rewrite(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{MaskingRule, MaskingType};

    #[test]
    fn test_run_rewrite_applies_configured_rules() {
        let mut config = Config::for_datasource("mysql://localhost:3306/app");
        config
            .rules
            .push(MaskingRule::new("users", "phone", MaskingType::Replace));

        assert_eq!(
            run_rewrite(&config, "SELECT phone FROM users"),
            "SELECT '***' FROM users"
        );
        assert_eq!(run_rewrite(&config, "SELECT 1"), "SELECT 1");
    }

    #[tokio::test]
    async fn test_check_probes_upstream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config::for_datasource(format!("mysql://127.0.0.1:{}/app", addr.port()));
        run_config_check(config, true).await.unwrap();

        drop(listener);
        let config = Config::for_datasource(format!("mysql://127.0.0.1:{}/app", addr.port()));
        assert!(run_config_check(config, true).await.is_err());
    }
}
