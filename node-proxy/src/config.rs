use proxy::config::{Config as ProxyConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "node_proxy".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: LoggingConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Loads the config file (if any), applies environment overrides read
    /// through `env`, and validates the result.
    ///
    /// Returns the config together with warnings to be logged once logging is
    /// initialized.
    pub fn load(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let warnings = config.apply_env(env);
        config.proxy.validate()?;

        Ok((config, warnings))
    }

    /// Applies `API_URL`, `LOG_LEVEL` and `STRIP_ORIGIN`.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(url) = env("API_URL").filter(|url| !url.is_empty()) {
            self.proxy.workloads_api.url = url;
        }

        if let Some(level) = env("LOG_LEVEL").filter(|level| !level.is_empty()) {
            self.logging.level = match level.to_ascii_uppercase().as_str() {
                "DEBUG" => "debug",
                "INFO" => "info",
                "WARN" => "warn",
                "ERROR" => "error",
                _ => {
                    warnings.push(format!("Invalid LOG_LEVEL '{level}', defaulting to INFO"));
                    "info"
                }
            }
            .to_string();
        }

        if env("STRIP_ORIGIN").is_some_and(|v| v == "true") {
            self.proxy.strip_origin = true;
        }

        warnings
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
}
