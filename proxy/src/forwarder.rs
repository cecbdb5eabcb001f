//! Relays one tenant request to a backend node.
//!
//! The in-flight slot for the (tenant, node) pair is taken before the request
//! is sent and travels with the response body, so it is released exactly once
//! on every path: a failed send drops it immediately, a relayed response drops
//! it when the body finishes, fails, or is abandoned by the client.

use crate::errors::ProxyError;
use crate::metrics_defs::{GATEWAY_ERRORS, STREAM_ERRORS};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::header::{HOST, HeaderName, HeaderValue};
use http::{Request, Response, Version};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use shared::http::{ResponseBody, drop_headers, filter_hop_by_hop};
use shared::counter;
use std::sync::Arc;
use url::Url;
use workloads::{InFlightGuard, RequestTracker, redact};

#[derive(Clone, Debug, PartialEq)]
pub struct ForwarderOptions {
    /// Scheme used for every node URL
    pub node_scheme: String,
    /// Request headers removed before forwarding
    pub drop_headers: Vec<HeaderName>,
    /// Relay bodies frame by frame to clients that support it
    pub streaming: bool,
    /// Largest frame relayed in streaming mode
    pub chunk_size: usize,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        ForwarderOptions {
            node_scheme: "https".to_string(),
            drop_headers: Vec::new(),
            streaming: true,
            chunk_size: 1024,
        }
    }
}

pub struct Forwarder {
    client: reqwest::Client,
    tracker: Arc<RequestTracker>,
    options: ForwarderOptions,
}

impl Forwarder {
    pub fn new(tracker: Arc<RequestTracker>, options: ForwarderOptions) -> Result<Self, ProxyError> {
        // Redirects are the caller's business
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Forwarder {
            client,
            tracker,
            options,
        })
    }

    /// Sends `request` to `node` with its path replaced by `rest` and returns
    /// the node's response with a body that is relayed as it arrives.
    ///
    /// Status and headers are passed through as received. Failing to build
    /// the outbound request or to reach the node is a gateway error.
    pub async fn forward<B>(
        &self,
        api_key: &str,
        node: &str,
        rest: &str,
        request: Request<B>,
    ) -> Result<Response<ResponseBody<ProxyError>>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let gateway = |reason: String| ProxyError::Gateway {
            node: node.to_string(),
            reason,
        };

        let (mut parts, body) = request.into_parts();
        let url = self
            .target_url(node, rest, parts.uri.query())
            .map_err(|e| gateway(e.to_string()))?;

        let client_version = parts.version;
        filter_hop_by_hop(&mut parts.headers, client_version);
        drop_headers(&mut parts.headers, &self.options.drop_headers);
        let host = HeaderValue::from_str(node).map_err(|e| gateway(e.to_string()))?;
        parts.headers.insert(HOST, host);

        let outbound = if body.is_end_stream() {
            reqwest::Body::from(Bytes::new())
        } else {
            reqwest::Body::wrap_stream(body.into_data_stream())
        };

        let guard = self.tracker.acquire(api_key, node);

        tracing::debug!(
            tenant = %redact(api_key),
            node,
            method = %parts.method,
            url = %url,
            "Proxying request"
        );

        let upstream = match self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(parts.headers)
            .body(outbound)
            .send()
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::debug!(node, url = %url, error = %e, "Proxy request failed");
                counter!(GATEWAY_ERRORS).increment(1);
                return Err(gateway(e.to_string()));
            }
        };

        let status = upstream.status();
        if !status.is_success() {
            tracing::debug!(
                node,
                status = status.as_u16(),
                method = %parts.method,
                url = %url,
                "Node returned non-success status"
            );
        }

        let mut headers = upstream.headers().clone();
        filter_hop_by_hop(&mut headers, upstream.version());

        let mode = if self.options.streaming && supports_streaming(client_version) {
            RelayMode::Chunked(self.options.chunk_size.max(1))
        } else {
            RelayMode::Passthrough
        };
        let body = relay_body(upstream.bytes_stream().boxed(), mode, guard);

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn target_url(&self, node: &str, rest: &str, query: Option<&str>) -> Result<Url, url::ParseError> {
        let mut target = format!("{}://{}{}", self.options.node_scheme, node, rest);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }
        Url::parse(&target)
    }
}

// HTTP/1.0 clients get node chunks as they arrive, never re-sliced.
fn supports_streaming(version: Version) -> bool {
    matches!(
        version,
        Version::HTTP_11 | Version::HTTP_2 | Version::HTTP_3
    )
}

#[derive(Clone, Copy, Debug)]
enum RelayMode {
    Chunked(usize),
    Passthrough,
}

struct Relay {
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: Bytes,
    mode: RelayMode,
    finished: bool,
    guard: InFlightGuard,
}

impl Relay {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.finished {
            return None;
        }

        match self.mode {
            RelayMode::Chunked(size) => loop {
                if !self.pending.is_empty() {
                    let len = size.min(self.pending.len());
                    return Some(self.pending.split_to(len));
                }
                match self.upstream.next().await {
                    Some(Ok(bytes)) => self.pending = bytes,
                    Some(Err(e)) => {
                        self.fail(e);
                        return None;
                    }
                    None => {
                        self.finished = true;
                        return None;
                    }
                }
            },
            RelayMode::Passthrough => match self.upstream.next().await {
                Some(Ok(bytes)) => Some(bytes),
                Some(Err(e)) => {
                    self.fail(e);
                    None
                }
                None => {
                    self.finished = true;
                    None
                }
            },
        }
    }

    // Status and headers are already on the wire, so the body just ends early.
    fn fail(&mut self, error: reqwest::Error) {
        tracing::debug!(node = self.guard.node(), error = %error, "Error reading from node");
        counter!(STREAM_ERRORS).increment(1);
        self.finished = true;
    }
}

fn relay_body(
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    mode: RelayMode,
    guard: InFlightGuard,
) -> ResponseBody<ProxyError> {
    let relay = Relay {
        upstream,
        pending: Bytes::new(),
        mode,
        finished: false,
        guard,
    };

    let frames = futures::stream::unfold(relay, |mut relay| async move {
        let chunk = relay.next_chunk().await?;
        Some((Ok::<_, ProxyError>(Frame::data(chunk)), relay))
    });

    StreamBody::new(frames).boxed_unsync()
}
