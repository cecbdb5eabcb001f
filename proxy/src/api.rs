use crate::errors::ProxyError;
use chrono::{SecondsFormat, Utc};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use hyper::Response;
use serde::Serialize;
use shared::http::{ResponseBody, full_body};

#[derive(Serialize)]
struct Health {
    status: &'static str,
    time: String,
}

/// `GET /` needs no credential and never touches the registry.
pub fn health_response<E: 'static>() -> Result<Response<ResponseBody<E>>, ProxyError> {
    let health = Health {
        status: "healthy",
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    json_response(StatusCode::OK, &health)
}

pub fn json_response<T, E>(status: StatusCode, value: &T) -> Result<Response<ResponseBody<E>>, ProxyError>
where
    T: Serialize + ?Sized,
    E: 'static,
{
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');

    let response = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(full_body(payload))?;
    Ok(response)
}
