use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` directives still apply on top of
/// the configured level; `debug` forces debug output for this crate.
pub fn init(config: &LoggingConfig, debug: bool) {
    let level = if debug { "debug" } else { config.level.as_str() };
    let filter = match format!("sqlmask_proxy={level}").parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if let Err(e) = result {
        // A subscriber is already installed (tests, embedding applications)
        eprintln!("Logging already initialized: {e}");
    }
}
