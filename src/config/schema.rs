use crate::protocol::MAX_PAYLOAD_LEN;
use crate::rules::MaskingRule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub datasource: DatasourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Initial rule set installed into the rule store at startup
    #[serde(default)]
    pub rules: Vec<MaskingRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default, alias = "autostart")]
    pub auto_start: bool,
    /// 0 means unlimited
    #[serde(default, alias = "maxconnections")]
    pub max_connections: usize,
    #[serde(default = "default_max_frame_size", alias = "maxframesize")]
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceConfig {
    /// e.g. `jdbc:mysql://db.internal:3306/app?useSSL=false`
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// Default value functions
fn default_proxy_host() -> String {
    "0.0.0.0".to_string()
}

fn default_proxy_port() -> u16 {
    3307
}

fn default_max_frame_size() -> usize {
    MAX_PAYLOAD_LEN
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
            auto_start: false,
            max_connections: 0,
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ProxyConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Config with default proxy/logging sections pointing at `datasource_url`.
    pub fn for_datasource(datasource_url: impl Into<String>) -> Self {
        Self {
            proxy: ProxyConfig::default(),
            datasource: DatasourceConfig {
                url: datasource_url.into(),
                username: None,
                password: None,
            },
            logging: LoggingConfig::default(),
            rules: Vec::new(),
        }
    }
}
