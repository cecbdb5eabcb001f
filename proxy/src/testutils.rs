use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use shared::http::ResponseBody;
use std::convert::Infallible;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const STREAM_PARTS: usize = 3;
const STREAM_PART_SIZE: usize = 250;

/// Bytes a truncating node sends before closing the connection.
pub const TRUNCATED_BODY: &[u8] = b"0123456789";

// Stands in for a backend node:
// - /stream sends three 250 byte parts with a pause between them
// - /status/{code} answers with that status
// - anything else echoes the request back as JSON
async fn node_handler(req: Request<Incoming>) -> Result<Response<ResponseBody<Infallible>>, Infallible> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    if path == "/stream" {
        let frames = futures::stream::unfold(0, |sent| async move {
            if sent == STREAM_PARTS {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            let part = Bytes::from(vec![b'x'; STREAM_PART_SIZE]);
            Some((Ok::<_, Infallible>(Frame::data(part)), sent + 1))
        });
        return Ok(Response::new(StreamBody::new(frames).boxed_unsync()));
    }

    if let Some(code) = path.strip_prefix("/status/") {
        let status = code
            .parse::<u16>()
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(
            Full::new(Bytes::from(format!("status {}", status.as_u16()))).boxed_unsync(),
        );
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert("x-node-status", status.as_u16().into());
        return Ok(response);
    }

    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let echoed = serde_json::json!({
        "method": parts.method.as_str(),
        "path": path,
        "query": parts.uri.query(),
        "host": header("host"),
        "origin": header("origin"),
        "x-custom": header("x-custom"),
        "x-hop": header("x-hop"),
        "x-c3-api-key": header("x-c3-api-key"),
        "body": String::from_utf8_lossy(&body),
    });

    let mut response = Response::new(Full::new(Bytes::from(echoed.to_string())).boxed_unsync());
    response
        .headers_mut()
        .insert("content-type", "application/json".parse().unwrap());
    Ok(response)
}

/// Starts a local node server and returns its `host:port`.
pub async fn start_node_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, hyper::service::service_fn(node_handler))
                    .await;
            });
        }
    });

    format!("127.0.0.1:{port}")
}

/// Starts a node that announces a 1000 byte body, sends `TRUNCATED_BODY`
/// and then closes the connection.
pub async fn start_truncating_node() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\n")
                    .await;
                let _ = stream.write_all(TRUNCATED_BODY).await;
                let _ = stream.flush().await;
            });
        }
    });

    format!("127.0.0.1:{port}")
}
