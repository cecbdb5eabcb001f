use crate::types::{API_KEY_HEADER, Workload};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum ListingError {
    #[error("workloads API request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("workloads API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Source of truth for the workloads visible to a tenant.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn fetch(&self, api_key: &str) -> Result<Vec<Workload>, ListingError>;
}

#[derive(Serialize)]
struct ListingRequest {
    running: bool,
}

/// Client for the upstream workload listing API.
pub struct ListingClient {
    client: reqwest::Client,
    full_url: Url,
}

impl ListingClient {
    pub fn new(base_url: &str) -> Result<Self, ListingError> {
        let full_url = format!("{}/{}", base_url.trim_end_matches('/'), "workloads");
        let full_url =
            Url::parse(&full_url).map_err(|e| ListingError::InvalidUrl(e.to_string()))?;

        Ok(ListingClient {
            client: reqwest::Client::new(),
            full_url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.full_url
    }
}

#[async_trait]
impl WorkloadSource for ListingClient {
    async fn fetch(&self, api_key: &str) -> Result<Vec<Workload>, ListingError> {
        let response = self
            .client
            .post(self.full_url.clone())
            .header(API_KEY_HEADER, api_key)
            .header(ACCEPT, "application/json")
            .json(&ListingRequest { running: true })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ListingError::Status { status, body });
        }

        // A `null` listing means no workloads
        let workloads = response.json::<Option<Vec<Workload>>>().await?;
        Ok(workloads.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::{Request, Response};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    // Answers like the listing API: checks the credential and the request body.
    async fn listing_handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await.unwrap().to_bytes();

        let api_key = parts.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        let authorized = matches!(api_key, Some("tenant-key-123" | "empty-tenant"));
        let expected_body = serde_json::from_slice::<serde_json::Value>(&body)
            .is_ok_and(|v| v == serde_json::json!({"running": true}));

        let response = if parts.method != hyper::Method::POST || parts.uri.path() != "/workloads" {
            Response::builder().status(404).body(Full::new(Bytes::new()))
        } else if !authorized {
            Response::builder()
                .status(401)
                .body(Full::new(Bytes::from_static(b"invalid api key")))
        } else if !expected_body {
            Response::builder().status(400).body(Full::new(Bytes::new()))
        } else if api_key == Some("empty-tenant") {
            Response::builder()
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from_static(b"null")))
        } else {
            let payload = serde_json::json!([
                {
                    "created": 1, "expires": 2, "node": "node-a", "running": true,
                    "status": "running", "type": "gpu", "workload": "wl-a", "tags": ["llm"]
                },
                {
                    "created": 1, "expires": null, "node": "node-b", "running": false,
                    "status": null, "type": "gpu", "workload": "wl-b"
                }
            ]);
            Response::builder()
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(payload.to_string())))
        };

        Ok(response.unwrap())
    }

    async fn start_listing_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, hyper::service::service_fn(listing_handler))
                        .await;
                });
            }
        });

        port
    }

    #[test]
    fn test_url_join() {
        let client = ListingClient::new("https://api.example.com/").unwrap();
        assert_eq!(client.url().as_str(), "https://api.example.com/workloads");

        let client = ListingClient::new("https://api.example.com/v1").unwrap();
        assert_eq!(client.url().as_str(), "https://api.example.com/v1/workloads");

        assert!(matches!(
            ListingClient::new("not a url"),
            Err(ListingError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_workloads() {
        let port = start_listing_server().await;
        let client = ListingClient::new(&format!("http://127.0.0.1:{port}")).unwrap();

        let workloads = client.fetch("tenant-key-123").await.unwrap();
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].node, "node-a");
        assert!(workloads[0].is_running());
        assert!(!workloads[1].is_running());
        assert_eq!(workloads[1].status, "");
        assert_eq!(workloads[1].expires, 0);
    }

    #[tokio::test]
    async fn test_fetch_null_listing() {
        let port = start_listing_server().await;
        let client = ListingClient::new(&format!("http://127.0.0.1:{port}")).unwrap();

        let workloads = client.fetch("empty-tenant").await.unwrap();
        assert!(workloads.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let port = start_listing_server().await;
        let client = ListingClient::new(&format!("http://127.0.0.1:{port}")).unwrap();

        let err = client.fetch("wrong-key").await.unwrap_err();
        match err {
            ListingError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        // Nothing listens on port 1 locally
        let client = ListingClient::new("http://127.0.0.1:1").unwrap();
        assert!(matches!(
            client.fetch("tenant-key-123").await,
            Err(ListingError::ReqwestError(_))
        ));
    }
}
