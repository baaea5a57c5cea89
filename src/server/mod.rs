//! REST surface: routes, middleware, and the listener

pub mod handlers;
pub mod middleware;
pub mod rate_limit;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::client::InferenceApi;
use crate::error::Error;
use crate::request::ErrorResponse;

pub use rate_limit::RateLimiter;

pub const SERVICE_NAME: &str = "hf-gateway";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-lifetime request counters
#[derive(Debug)]
pub struct Metrics
{   pub requests_total: AtomicU64
  , pub errors_total: AtomicU64
  , pub rate_limited_total: AtomicU64
  , started: Instant
}

impl Metrics
{   pub fn new() -> Self
    {   Metrics
        {   requests_total: AtomicU64::new(0)
          , errors_total: AtomicU64::new(0)
          , rate_limited_total: AtomicU64::new(0)
          , started: Instant::now()
        }
    }

    pub fn record(&self, status: StatusCode)
    {   self.requests_total.fetch_add(1, Ordering::Relaxed);
        if status.is_client_error() || status.is_server_error()
        {   self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration
    {   self.started.elapsed()
    }
}

impl Default for Metrics
{   fn default() -> Self
    {   Metrics::new()
    }
}

/// Shared state handed to every handler and middleware
#[derive(Clone)]
pub struct AppState
{   pub service: Arc<dyn InferenceApi>
  , pub limiter: RateLimiter
  , pub metrics: Arc<Metrics>
  , /// Deadline after which an inference call is cancelled
    pub request_timeout: Duration
}

impl AppState
{   pub fn new(
      service: Arc<dyn InferenceApi>
    , requests_per_minute: usize
    ) -> Self
    {   AppState
        {   service
          , limiter: RateLimiter::per_minute(requests_per_minute)
          , metrics: Arc::new(Metrics::new())
          , request_timeout: DEFAULT_REQUEST_TIMEOUT
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self
    {   self.request_timeout = timeout;
        self
    }
}

impl IntoResponse for ErrorResponse
{   fn into_response(self) -> Response
    {   let status = StatusCode::from_u16(self.code)
          .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// All routes with CORS, rate limiting and request logging applied,
/// outermost last
pub fn router(state: AppState) -> Router
{   let cors = CorsLayer::new()
      .allow_origin(Any)
      .allow_methods([
        Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS,
      ])
      .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
      .route("/", get(handlers::index))
      .route("/health", get(handlers::health))
      .route("/metrics", get(handlers::metrics))
      .route("/v1/text/generate", post(handlers::generate_text))
      .route("/v1/text/complete", post(handlers::generate_completion))
      .route("/v1/text/sentiment", post(handlers::analyze_sentiment))
      .route("/v1/text/summarize", post(handlers::summarize_text))
      .route("/v1/models/validate", get(handlers::validate_model))
      .fallback(handlers::not_found)
      .method_not_allowed_fallback(handlers::method_not_allowed)
      .layer(cors)
      .layer(axum::middleware::from_fn_with_state(
        state.clone()
      , middleware::rate_limit
      ))
      .layer(axum::middleware::from_fn_with_state(
        state.clone()
      , middleware::request_logger
      ))
      .with_state(state)
}

/// Bind and serve until SIGINT/SIGTERM, then give in-flight requests
/// `shutdown_timeout_secs` to finish
pub async fn serve(
  config: &crate::config::ServerConfig
, state: AppState
) -> Result<(), Error>
{   let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address).await
      .map_err(|e| Error::InvalidConfiguration(
        format!("failed to bind {}: {}", address, e)
      ))?;
    info!(address = address.as_str(); "Server starting");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    let server = axum::serve(
        listener
      , router(state).into_make_service_with_connect_info::<SocketAddr>()
      )
      .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Server is shutting down...");
        trigger.cancel();
      });

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    tokio::select!
    { served = server.into_future() => {
        served.map_err(|e| Error::Other(format!("server error: {}", e)))
      }
    , _ = async { shutdown.cancelled().await; tokio::time::sleep(grace).await } => {
        warn!(grace_secs = grace.as_secs(); "Server forced to shutdown");
        Ok(())
      }
    }
}

async fn shutdown_signal()
{   let ctrl_c = async {
      if let Err(e) = tokio::signal::ctrl_c().await
      {   warn!(error:% = e; "Failed to listen for ctrl-c");
          std::future::pending::<()>().await;
      }
    };

    #[cfg(unix)]
    let terminate = async {
      match tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate()
      )
      {   Ok(mut signal) => { signal.recv().await; }
        , Err(e) => {
            warn!(error:% = e; "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
          }
      }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select!
    { _ = ctrl_c => {}
    , _ = terminate => {}
    }
}
