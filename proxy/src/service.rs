use crate::api::{health_response, json_response};
use crate::auth::extract_api_key;
use crate::errors::ProxyError;
use crate::forwarder::Forwarder;
use crate::metrics_defs::REQUEST_DURATION;
use crate::routing::RouteTarget;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::histogram;
use shared::http::ResponseBody;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use workloads::{LoadBalancer, WorkloadRegistry, redact};

/// Inbound surface of the proxy: health check, workload listing, and tag or
/// index routing to backend nodes.
#[derive(Clone)]
pub struct ProxyService {
    registry: WorkloadRegistry,
    balancer: LoadBalancer,
    forwarder: Arc<Forwarder>,
}

impl ProxyService {
    pub fn new(registry: WorkloadRegistry, forwarder: Forwarder) -> Self {
        ProxyService {
            balancer: LoadBalancer::new(registry.clone()),
            registry,
            forwarder: Arc::new(forwarder),
        }
    }

    pub async fn handle<B>(
        &self,
        request: Request<B>,
    ) -> Result<Response<ResponseBody<ProxyError>>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = request.uri().path().to_string();

        if request.method() == Method::GET && path == "/" {
            tracing::debug!("Health check request");
            return health_response();
        }

        let api_key = extract_api_key(request.headers())?;
        self.registry.touch(&api_key);

        tracing::debug!(
            tenant = %redact(&api_key),
            method = %request.method(),
            path = %path,
            "Incoming request"
        );

        match RouteTarget::parse(&path)? {
            RouteTarget::Workloads => {
                let snapshot = self.registry.get_or_refresh(&api_key).await?;
                json_response(StatusCode::OK, snapshot.workloads())
            }
            RouteTarget::Tag { tag, rest } => {
                self.registry.get_or_refresh(&api_key).await?;
                let node = self.balancer.select_node(&api_key, &tag).await?;
                self.forwarder.forward(&api_key, &node, &rest, request).await
            }
            RouteTarget::Index { index, rest } => {
                self.registry.get_or_refresh(&api_key).await?;
                let node = self.balancer.select_by_index(&api_key, index).await?;
                tracing::debug!(tenant = %redact(&api_key), node = %node, index, "Selected node by index");
                self.forwarder.forward(&api_key, &node, &rest, request).await
            }
        }
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = Response<ResponseBody<ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().clone();

            let response = match service.handle(request).await {
                Ok(response) => response,
                Err(e) => {
                    let status = e.status_code();
                    if status.is_server_error() {
                        tracing::warn!(method = %method, status = status.as_u16(), error = %e, "Request failed");
                    } else {
                        tracing::debug!(method = %method, status = status.as_u16(), error = %e, "Request rejected");
                    }
                    e.into_response()
                }
            };

            histogram!(REQUEST_DURATION, "status" => status_class(response.status()))
                .record(start.elapsed().as_secs_f64());
            Ok(response)
        })
    }
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::ForwarderOptions;
    use crate::testutils::start_node_server;
    use http_body_util::{BodyExt, Empty};
    use workloads::testutils::{FakeSource, workload};
    use workloads::{RefreshConfig, RequestTracker, Workload};

    const API_KEY: &str = "tenant-key-123";

    struct Harness {
        service: ProxyService,
        registry: WorkloadRegistry,
        source: Arc<FakeSource>,
    }

    fn harness(workloads: Vec<Workload>) -> Harness {
        let source = Arc::new(FakeSource::with_workloads(workloads));
        let tracker = Arc::new(RequestTracker::new());
        let registry = WorkloadRegistry::new(source.clone(), tracker.clone(), RefreshConfig::default());
        let forwarder = Forwarder::new(
            tracker,
            ForwarderOptions {
                node_scheme: "http".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        Harness {
            service: ProxyService::new(registry.clone(), forwarder),
            registry,
            source,
        }
    }

    fn request(method: &str, uri: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-c3-api-key", API_KEY)
            .body(Empty::new())
            .unwrap()
    }

    async fn send(
        service: &ProxyService,
        request: Request<Empty<Bytes>>,
    ) -> (StatusCode, Bytes) {
        let response = match service.handle(request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn test_health_needs_no_credential() {
        let h = harness(vec![]);
        let request = Request::get("/").body(Empty::<Bytes>::new()).unwrap();

        let (status, body) = send(&h.service, request).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(h.source.fetch_count(), 0);
        assert_eq!(h.registry.tenant_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let h = harness(vec![]);
        let request = Request::get("/workloads").body(Empty::<Bytes>::new()).unwrap();

        let (status, body) = send(&h.service, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body,
            "Missing API key (use X-C3-API-KEY header or Authorization Bearer)\n"
        );
        assert_eq!(h.source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_list_workloads() {
        let mut stopped = workload("node-b", &["llm"]);
        stopped.running = false;
        let h = harness(vec![workload("node-a", &["llm"]), stopped]);

        let request = Request::get("/workloads")
            .header("authorization", format!("Bearer {API_KEY}"))
            .body(Empty::<Bytes>::new())
            .unwrap();
        let (status, body) = send(&h.service, request).await;

        assert_eq!(status, StatusCode::OK);
        let listed: Vec<Workload> = serde_json::from_slice(&body).unwrap();
        // Non-running workloads are listed too
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].node, "node-a");
        assert!(h.registry.contains(API_KEY));

        h.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_route_by_tag() {
        let node = start_node_server().await;
        let h = harness(vec![
            workload("127.0.0.1:1", &["other"]),
            workload(&node, &["llm"]),
        ]);

        let (status, body) = send(&h.service, request("POST", "/tags/llm/v1/chat?x=1")).await;
        assert_eq!(status, StatusCode::OK);

        let echoed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(echoed["path"], "/v1/chat");
        assert_eq!(echoed["query"], "x=1");
        assert_eq!(echoed["host"], node.as_str());
        // The credential is passed through to the node
        assert_eq!(echoed["x-c3-api-key"], API_KEY);

        let (status, body) = send(&h.service, request("GET", "/tags/llm")).await;
        assert_eq!(status, StatusCode::OK);
        let echoed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(echoed["path"], "/");

        assert!(!h.registry.tracker().has_in_flight(API_KEY));
        h.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_route_by_index() {
        let a = start_node_server().await;
        let b = start_node_server().await;
        let c = start_node_server().await;
        let mut stopped = workload("127.0.0.1:1", &[]);
        stopped.status = "stopped".into();
        let h = harness(vec![
            workload(&a, &[]),
            stopped,
            workload(&b, &[]),
            workload(&c, &[]),
        ]);

        let (status, body) = send(&h.service, request("GET", "/1/foo")).await;
        assert_eq!(status, StatusCode::OK);
        let echoed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(echoed["host"], b.as_str());
        assert_eq!(echoed["path"], "/foo");

        let (status, body) = send(&h.service, request("GET", "/5/foo")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Workload index 5 out of range (0-2)\n");

        let (status, _) = send(&h.service, request("GET", "/-1/foo")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let h = harness(vec![workload("node-a", &["llm"])]);

        let (status, body) = send(&h.service, request("GET", "/tags/vision")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "No running nodes found for tag vision\n");

        let (status, _) = send(&h.service, request("GET", "/tags/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&h.service, request("GET", "/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid workload index. Must be a number\n");

        let (status, _) = send(&h.service, request("POST", "/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        h.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_running_workloads() {
        let h = harness(vec![]);

        let (status, _) = send(&h.service, request("GET", "/0")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&h.service, request("GET", "/tags/all")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_listing_failure_without_cache() {
        let h = harness(vec![]);
        h.source.set_failing(true);

        let (status, _) = send(&h.service, request("GET", "/workloads")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = send(&h.service, request("GET", "/tags/llm")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        h.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let h = harness(vec![workload("127.0.0.1:1", &["llm"])]);

        let (status, _) = send(&h.service, request("GET", "/tags/llm")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!h.registry.tracker().has_in_flight(API_KEY));

        h.registry.shutdown().await;
    }

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::NOT_FOUND), "4xx");
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), "5xx");
    }
}
