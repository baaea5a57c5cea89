use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::request::ErrorResponse;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id attached to every request's extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Client key for rate limiting and logs: the peer IP when known
pub fn client_address(request: &Request) -> String
{   request.extensions()
      .get::<ConnectInfo<SocketAddr>>()
      .map(|ConnectInfo(addr)| addr.ip().to_string())
      .unwrap_or_else(|| "unknown".to_string())
}

/// Logs start and completion of every request, tags it with a
/// request id, and feeds the counters
pub async fn request_logger(
  State(state): State<AppState>
, mut request: Request
, next: Next
) -> Response
{   let started = Instant::now();
    let request_id = request.headers()
      .get(REQUEST_ID_HEADER)
      .and_then(|v| v.to_str().ok())
      .filter(|v| !v.is_empty())
      .map(str::to_string)
      .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    info!(
      request_id = request_id.as_str(), method:% = method,
      path = path.as_str(), remote = client_address(&request).as_str();
      "Request started"
    );
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    state.metrics.record(response.status());

    if let Ok(value) = HeaderValue::from_str(&request_id)
    {   response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
      request_id = request_id.as_str(), method:% = method,
      path = path.as_str(), status_code = response.status().as_u16(),
      duration_ms = started.elapsed().as_millis() as u64;
      "Request completed"
    );
    response
}

/// Refuses requests past the per-client budget with a 429
pub async fn rate_limit(
  State(state): State<AppState>
, request: Request
, next: Next
) -> Response
{   let client = client_address(&request);
    match state.limiter.check(&client)
    {   Ok(()) => next.run(request).await
      , Err(e) => {
          state.metrics.rate_limited_total.fetch_add(1, Ordering::Relaxed);
          warn!(remote = client.as_str(); "Rate limit exceeded");
          ErrorResponse::from_error("Rate limit exceeded", &e).into_response()
        }
    }
}
