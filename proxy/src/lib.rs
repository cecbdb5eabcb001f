pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod forwarder;
pub mod metrics_defs;
pub mod routing;
pub mod service;

#[cfg(test)]
mod testutils;

use config::Config;
use errors::ProxyError;
use forwarder::{Forwarder, ForwarderOptions};
use service::ProxyService;
use shared::http::run_http_service;
use std::sync::Arc;
use workloads::{ListingClient, RequestTracker, WorkloadRegistry};

/// Serves the proxy until `shutdown` resolves, then stops every tenant's
/// refresh task before returning.
pub async fn run<F>(config: Config, shutdown: F) -> Result<(), ProxyError>
where
    F: Future<Output = ()>,
{
    let source = ListingClient::new(&config.workloads_api.url)
        .map_err(|e| ProxyError::InvalidConfig(e.to_string()))?;
    let options = ForwarderOptions::try_from(&config)
        .map_err(|e| ProxyError::InvalidConfig(e.to_string()))?;

    let tracker = Arc::new(RequestTracker::new());
    let registry = WorkloadRegistry::new(Arc::new(source), tracker.clone(), config.refresh.clone());
    let forwarder = Forwarder::new(tracker, options)?;
    let service = ProxyService::new(registry.clone(), forwarder);

    tracing::info!(
        api_url = %config.workloads_api.url,
        strip_origin = config.strip_origin,
        streaming = config.streaming.enabled,
        "Starting proxy server"
    );

    let result = tokio::select! {
        result = run_http_service(&config.listener.host, config.listener.port, service) => result,
        _ = shutdown => {
            tracing::info!("Shutdown signal received, stopping proxy server");
            Ok(())
        }
    };

    registry.shutdown().await;
    result
}
