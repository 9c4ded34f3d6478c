//! Request forwarding
//!
//! Every inbound request goes to exactly one backend, chosen by the pool.
//! The upstream status is relayed, the body is streamed through, and only
//! `content-type` and `content-length` are copied from the upstream headers.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::pool::BackendPool;

/// Upstream response headers relayed to the caller
const RELAYED_HEADERS: [HeaderName; 2] = [header::CONTENT_TYPE, header::CONTENT_LENGTH];

/// Failure to forward one request
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(axum::Error),

    #[error("backend {index} ({addr}) failed: {source}")]
    Upstream {
        index: usize,
        addr: SocketAddr,
        source: reqwest::Error,
    },

    #[error("backend {index} ({addr}) sent an unusable response: {source}")]
    Response {
        index: usize,
        addr: SocketAddr,
        source: axum::http::Error,
    },
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ForwardError::Body(_) => StatusCode::BAD_REQUEST,
            ForwardError::Upstream { .. } | ForwardError::Response { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::BAD_GATEWAY {
            error!("Forwarding failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Shared state of the dispatcher
#[derive(Debug)]
pub struct ProxyState {
    pub pool: BackendPool,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ProxyState {
    pub fn new(
        pool: BackendPool,
        upstream_timeout: Duration,
        max_body_bytes: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            pool,
            client,
            max_body_bytes,
        })
    }
}

/// Collect the request body, failing once it grows past `limit`.
///
/// Covers bodies without a declared length, such as chunked uploads.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ForwardError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ForwardError::Body)?;
        if buf.len() + chunk.len() > limit {
            return Err(ForwardError::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// Forward any request to the next backend in the rotation
pub async fn forward(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Result<Response, ForwardError> {
    let backend = state.pool.next();
    let (parts, body) = req.into_parts();

    let declared_len = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.max_body_bytes) {
        return Err(ForwardError::BodyTooLarge {
            limit: state.max_body_bytes,
        });
    }
    let body = read_body(body, state.max_body_bytes).await?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", backend.addr(), path_and_query);
    debug!("Redirected {} to {}", parts.method, url);

    let mut upstream_req = state.client.request(parts.method, &url).body(body);
    if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
        upstream_req = upstream_req.header(header::CONTENT_TYPE, content_type.clone());
    }

    let upstream = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(source) => {
            backend.record(false);
            return Err(ForwardError::Upstream {
                index: backend.index(),
                addr: backend.addr(),
                source,
            });
        }
    };
    backend.record(true);

    let mut builder = Response::builder().status(upstream.status());
    for name in RELAYED_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|source| ForwardError::Response {
            index: backend.index(),
            addr: backend.addr(),
            source,
        })
}
