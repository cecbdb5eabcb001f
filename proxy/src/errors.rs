use http::StatusCode;
use hyper::Response;
use shared::http::{ResponseBody, make_error_response};
use std::io;
use workloads::{RegistryError, SelectError};

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("Missing API key (use X-C3-API-KEY header or Authorization Bearer)")]
    MissingApiKey,
    #[error("Invalid path. Use /tags/{{tag}} or /{{index}} to access workloads")]
    InvalidPath,
    #[error("Invalid workload index. Must be a number")]
    InvalidIndex,
    #[error("Missing tag. Use /tags/{{tag}}")]
    MissingTag,
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Listing(#[from] RegistryError),
    #[error("failed to reach node {node}: {reason}")]
    Gateway { node: String, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingApiKey => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidPath | ProxyError::InvalidIndex | ProxyError::MissingTag => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Listing(_)
            | ProxyError::InvalidConfig(_)
            | ProxyError::Client(_)
            | ProxyError::Io(_)
            | ProxyError::Hyper(_)
            | ProxyError::Json(_)
            | ProxyError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text error response carrying this error's message.
    pub fn into_response<E: 'static>(self) -> Response<ResponseBody<E>> {
        make_error_response(self.status_code(), Some(&self.to_string()))
    }
}

impl From<SelectError> for ProxyError {
    fn from(e: SelectError) -> Self {
        match e {
            SelectError::NoNodes { tag } => {
                ProxyError::NotFound(format!("No running nodes found for tag {tag}"))
            }
            SelectError::NoRunningWorkloads => {
                ProxyError::NotFound("No running workloads found".to_string())
            }
            SelectError::IndexOutOfRange { index, running } => ProxyError::NotFound(format!(
                "Workload index {index} out of range (0-{})",
                running.saturating_sub(1)
            )),
            SelectError::Registry(e) => ProxyError::Listing(e),
        }
    }
}
