use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const ENV_PREFIX: &str = "SQLMASK_PROXY_";

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        // Try to load from various config files
        .merge(Toml::file("sqlmask-proxy.toml"))
        .merge(Json::file("sqlmask-proxy.json"))
        .merge(Yaml::file("sqlmask-proxy.yaml"))
        .merge(Yaml::file("sqlmask-proxy.yml"))
        // Override with environment variables (SQLMASK_PROXY_ prefix)
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finalize(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
            .extract(),
        Some("json") => Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
            .extract(),
        Some("yaml") | Some("yml") => Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
            .extract(),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config = config.map_err(|e| ConfigError::Parse(e.to_string()))?;
    finalize(config)
}

fn finalize(config: Config) -> Result<Config> {
    // Substitute before validating so `${DB_URL}` style datasources resolve
    let config = apply_env_substitutions(config)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.datasource.url.trim().is_empty() {
        return Err(ConfigError::MissingField("datasource.url".into()).into());
    }

    crate::manager::resolve_target(&config.datasource.url)?;

    if config.proxy.max_frame_size == 0 {
        return Err(ConfigError::Validation("maxFrameSize must be greater than 0".into()).into());
    }

    for (index, rule) in config.rules.iter().enumerate() {
        rule.validate().map_err(|e| {
            ConfigError::Validation(format!("Rule #{} ({}.{}): {}", index, rule.table, rule.column, e))
        })?;
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.datasource.url = substitute_env_vars(&config.datasource.url)?;

    if let Some(username) = &mut config.datasource.username {
        *username = substitute_env_vars(username)?;
    }
    if let Some(password) = &mut config.datasource.password {
        *password = substitute_env_vars(password)?;
    }

    Ok(config)
}

fn substitute_env_vars(input: &str) -> Result<String> {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static env var pattern"));
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        // ${VAR:-default}
        if let Some((name, default)) = var_name.split_once(":-") {
            match std::env::var(name) {
                Ok(value) => result = result.replace(&cap[0], &value),
                Err(_) => result = result.replace(&cap[0], default),
            }
            continue;
        }

        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                return Err(ConfigError::EnvVar(format!(
                    "Environment variable '{}' not found",
                    var_name
                ))
                .into());
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::rules::{MaskingRule, MaskingType};
    use std::io::Write;

    #[test]
    fn test_env_substitution() {
        std::env::set_var("SQLMASK_TEST_DB_HOST", "db.internal");

        let result = substitute_env_vars("mysql://${SQLMASK_TEST_DB_HOST}:3306/app").unwrap();
        assert_eq!(result, "mysql://db.internal:3306/app");

        let result = substitute_env_vars("${SQLMASK_TEST_MISSING:-fallback}").unwrap();
        assert_eq!(result, "fallback");

        assert!(substitute_env_vars("${SQLMASK_TEST_MISSING}").is_err());

        std::env::remove_var("SQLMASK_TEST_DB_HOST");
    }

    #[test]
    fn test_validate_rejects_empty_datasource() {
        let config = Config::for_datasource("  ");
        assert!(matches!(
            validate(&config),
            Err(ProxyError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_rule() {
        let mut config = Config::for_datasource("mysql://localhost:3306/app");
        config
            .rules
            .push(MaskingRule::new("users", "", MaskingType::FullMask));
        assert!(matches!(
            validate(&config),
            Err(ProxyError::Config(ConfigError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "proxy:\n  host: 127.0.0.1\n  port: 4406\ndatasource:\n  url: jdbc:mysql://${{SQLMASK_TEST_YAML_HOST:-localhost}}:3306/shop\nrules:\n  - table: users\n    column: phone\n    maskingType: FULL_MASK\n"
        )
        .unwrap();

        let config = load_from_path(file.path()).await.unwrap();
        assert_eq!(config.proxy.port, 4406);
        assert_eq!(config.datasource.url, "jdbc:mysql://localhost:3306/shop");
        assert_eq!(config.rules.len(), 1);
    }

    #[tokio::test]
    async fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[proxy]\nport = 5506\nautoStart = true\n\n[datasource]\nurl = \"mysql://db:3306/app\"\n"
        )
        .unwrap();

        let config = load_from_path(file.path()).await.unwrap();
        assert_eq!(config.proxy.port, 5506);
        assert!(config.proxy.auto_start);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            load_from_path(file.path()).await,
            Err(ProxyError::Config(ConfigError::Parse(_)))
        ));
    }
}
