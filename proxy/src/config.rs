use crate::forwarder::ForwarderOptions;
use http::header::{HeaderName, ORIGIN};
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use workloads::RefreshConfig;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Workloads API URL is required")]
    MissingApiUrl,

    #[error("Invalid workloads API URL '{url}': {reason}")]
    InvalidApiUrl { url: String, reason: String },

    #[error("Node scheme must be http or https, got: {0}")]
    InvalidNodeScheme(String),

    #[error("Streaming chunk size cannot be 0")]
    InvalidChunkSize,

    #[error("Refresh interval cannot be 0")]
    InvalidRefreshInterval,

    #[error("Idle eviction threshold ({eviction}s) is below the warning threshold ({warning}s)")]
    InvalidIdleThresholds { warning: u64, eviction: u64 },

    #[error("Invalid header name in drop_headers: {0}")]
    InvalidHeaderName(String),
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener for incoming tenant requests
    pub listener: Listener,
    /// Upstream workload listing API
    pub workloads_api: WorkloadsApi,
    /// Never forward the `Origin` header to nodes
    pub strip_origin: bool,
    /// Additional request headers that are never forwarded to nodes
    pub drop_headers: Vec<String>,
    /// Scheme used to reach backend nodes
    pub node_scheme: String,
    pub streaming: StreamingConfig,
    pub refresh: RefreshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            workloads_api: WorkloadsApi::default(),
            strip_origin: false,
            drop_headers: Vec::new(),
            node_scheme: "https".to_string(),
            streaming: StreamingConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl Config {
    /// Validates the proxy configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.workloads_api.validate()?;

        if !matches!(self.node_scheme.as_str(), "http" | "https") {
            return Err(ValidationError::InvalidNodeScheme(self.node_scheme.clone()));
        }

        if self.streaming.chunk_size == 0 {
            return Err(ValidationError::InvalidChunkSize);
        }

        if self.refresh.interval_secs == 0 {
            return Err(ValidationError::InvalidRefreshInterval);
        }

        if self.refresh.idle_eviction_secs < self.refresh.idle_warning_secs {
            return Err(ValidationError::InvalidIdleThresholds {
                warning: self.refresh.idle_warning_secs,
                eviction: self.refresh.idle_eviction_secs,
            });
        }

        self.drop_header_names()?;
        Ok(())
    }

    /// Request headers removed before forwarding: the configured list, plus
    /// `Origin` when origin stripping is enabled.
    pub fn drop_header_names(&self) -> Result<Vec<HeaderName>, ValidationError> {
        let mut names = self
            .drop_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ValidationError::InvalidHeaderName(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.strip_origin && !names.contains(&ORIGIN) {
            names.push(ORIGIN);
        }
        Ok(names)
    }
}

impl TryFrom<&Config> for ForwarderOptions {
    type Error = ValidationError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        Ok(ForwarderOptions {
            node_scheme: config.node_scheme.clone(),
            drop_headers: config.drop_header_names()?,
            streaming: config.streaming.enabled,
            chunk_size: config.streaming.chunk_size,
        })
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkloadsApi {
    /// Base URL; workloads are listed at `{url}/workloads`
    pub url: String,
}

impl WorkloadsApi {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingApiUrl);
        }

        let invalid = |reason: String| ValidationError::InvalidApiUrl {
            url: self.url.clone(),
            reason,
        };
        let parsed = Url::parse(&self.url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
        }
        Ok(())
    }
}

/// Response relay settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Relay bodies incrementally to clients that support it
    pub enabled: bool,
    /// Largest frame written to the client, in bytes
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            enabled: true,
            chunk_size: 1024,
        }
    }
}
