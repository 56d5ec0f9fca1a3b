//! Dynamic SQL masking: a MySQL wire-protocol proxy and an in-process
//! statement interceptor that rewrite queries against per-table masking
//! rules before they reach the database.

pub mod commands;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod proxy;
pub mod rewrite;
pub mod rules;
pub mod state;

pub use error::{ProxyError, Result};
pub use interceptor::StatementInterceptor;
pub use manager::{resolve_target, ProxyManager, ProxyStatus};
pub use proxy::{ProxyServer, UpstreamTarget};
pub use rewrite::SqlRewriter;
pub use rules::{MaskingRule, MaskingType, RuleStore};
