use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Extension, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::middleware::RequestId;
use super::{AppState, SERVICE_NAME, SERVICE_VERSION};
use crate::request::{
  ErrorResponse, GenerationRequest, SentimentRequest, SummarizeRequest,
};

fn now_rfc3339() -> String
{   Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn request_id(id: &Option<Extension<RequestId>>) -> &str
{   id.as_ref().map(|Extension(RequestId(id))| id.as_str()).unwrap_or("-")
}

/// Log and render an error body
fn reject(request_id: &str, body: ErrorResponse) -> Response
{   error!(
      request_id = request_id, error_code = body.code,
      error_message = body.message.as_str(), error_type = body.kind.as_str();
      "Request error"
    );
    body.into_response()
}

/// Decode a JSON body whatever its declared content type
fn parse_body<T: DeserializeOwned>(
  rid: &str
, body: &Bytes
) -> Result<T, Response>
{   serde_json::from_slice(body).map_err(|e| {
      reject(rid, ErrorResponse::validation(format!("Invalid JSON: {}", e)))
    })
}

/// Drive `call` to completion, cancelling `cancel` once `deadline`
/// elapses so the call unwinds with `Error::Cancelled`
async fn with_deadline<T, F>(
  rid: &str
, cancel: &CancellationToken
, deadline: Duration
, call: F
) -> T
where F: Future<Output = T>
{   tokio::pin!(call);
    tokio::select!
    { biased;
      outcome = &mut call => outcome
    , _ = tokio::time::sleep(deadline) => {
        warn!(
          request_id = rid, deadline_ms = deadline.as_millis() as u64;
          "Request deadline elapsed, cancelling"
        );
        cancel.cancel();
        call.await
      }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationMode
{   Generate
  , Complete
}

async fn run_generation(
  state: AppState
, rid: &str
, body: Bytes
, mode: GenerationMode
) -> Response
{   let mut request: GenerationRequest = match parse_body(rid, &body)
    {   Ok(request) => request
      , Err(response) => return response
    };

    if request.id.is_empty()
    {   request.id = Uuid::new_v4().to_string();
    }
    request.created_at = Some(Utc::now());

    if let Err(e) = request.validate()
    {   return reject(rid, ErrorResponse::from_error("", &e));
    }

    let cancel = CancellationToken::new();
    let deadline = state.request_timeout;
    let (outcome, failure_message) = match mode
    {   GenerationMode::Generate => (
          with_deadline(
            rid, &cancel, deadline
          , state.service.generate_text(request, &cancel)
          ).await
        , "Failed to generate text"
        )
      , GenerationMode::Complete => (
          with_deadline(
            rid, &cancel, deadline
          , state.service.generate_completion(request, &cancel)
          ).await
        , "Failed to generate completion"
        )
    };

    match outcome
    {   Ok(result) => Json(result).into_response()
      , Err(e) => reject(rid, ErrorResponse::from_error(failure_message, &e))
    }
}

pub async fn generate_text(
  State(state): State<AppState>
, id: Option<Extension<RequestId>>
, body: Bytes
) -> Response
{   let rid = request_id(&id);
    info!(request_id = rid; "Received text generation request");
    run_generation(state, rid, body, GenerationMode::Generate).await
}

pub async fn generate_completion(
  State(state): State<AppState>
, id: Option<Extension<RequestId>>
, body: Bytes
) -> Response
{   let rid = request_id(&id);
    info!(request_id = rid; "Received completion request");
    run_generation(state, rid, body, GenerationMode::Complete).await
}

pub async fn analyze_sentiment(
  State(state): State<AppState>
, id: Option<Extension<RequestId>>
, body: Bytes
) -> Response
{   let rid = request_id(&id);
    info!(request_id = rid; "Received sentiment analysis request");

    let request: SentimentRequest = match parse_body(rid, &body)
    {   Ok(request) => request
      , Err(response) => return response
    };
    if request.text.is_empty()
    {   return reject(rid, ErrorResponse::validation("Text is required"));
    }

    let cancel = CancellationToken::new();
    let outcome = with_deadline(
        rid, &cancel, state.request_timeout
      , state.service.analyze_sentiment(request.text, &cancel)
      ).await;
    match outcome
    {   Ok(result) => Json(result).into_response()
      , Err(e) => reject(
          rid
        , ErrorResponse::from_error("Failed to analyze sentiment", &e)
        )
    }
}

pub async fn summarize_text(
  State(state): State<AppState>
, id: Option<Extension<RequestId>>
, body: Bytes
) -> Response
{   let rid = request_id(&id);
    info!(request_id = rid; "Received summarization request");

    let request: SummarizeRequest = match parse_body(rid, &body)
    {   Ok(request) => request
      , Err(response) => return response
    };
    if request.text.is_empty()
    {   return reject(rid, ErrorResponse::validation("Text is required"));
    }

    let max_length = request.effective_max_length();
    let cancel = CancellationToken::new();
    let outcome = with_deadline(
        rid, &cancel, state.request_timeout
      , state.service.summarize_text(request.text, max_length, &cancel)
      ).await;
    match outcome
    {   Ok(result) => Json(result).into_response()
      , Err(e) => reject(
          rid
        , ErrorResponse::from_error("Failed to summarize text", &e)
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelQuery
{   #[serde(default)]
    pub model: Option<String>
}

pub async fn validate_model(
  State(state): State<AppState>
, id: Option<Extension<RequestId>>
, Query(query): Query<ModelQuery>
) -> Response
{   let rid = request_id(&id);
    let model = query.model.unwrap_or_default();
    if model.is_empty()
    {   return reject(
          rid
        , ErrorResponse::validation("Model parameter is required")
        );
    }

    match state.service.validate_model(&model)
    {   Ok(()) => Json(json!({ "model": model, "valid": true })).into_response()
      , Err(e) => reject(
          rid
        , ErrorResponse::validation(format!("Invalid model: {}", e))
        )
    }
}

pub async fn health() -> Response
{   Json(json!({
      "status": "healthy",
      "timestamp": now_rfc3339(),
      "service": SERVICE_NAME,
      "version": SERVICE_VERSION,
    })).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response
{   let m = &state.metrics;
    Json(json!({
      "requests_total": m.requests_total.load(Ordering::Relaxed),
      "errors_total": m.errors_total.load(Ordering::Relaxed),
      "rate_limited_total": m.rate_limited_total.load(Ordering::Relaxed),
      "tracked_clients": state.limiter.tracked_clients(),
      "uptime_secs": m.uptime().as_secs(),
      "timestamp": now_rfc3339(),
    })).into_response()
}

pub async fn index() -> Response
{   Json(json!({
      "service": SERVICE_NAME,
      "version": SERVICE_VERSION,
      "endpoints": {
        "health": "GET /health",
        "metrics": "GET /metrics",
        "generate_text": "POST /v1/text/generate",
        "complete_text": "POST /v1/text/complete",
        "analyze_sentiment": "POST /v1/text/sentiment",
        "summarize_text": "POST /v1/text/summarize",
        "validate_model": "GET /v1/models/validate?model=<model_name>",
      },
    })).into_response()
}

pub async fn not_found() -> Response
{   ErrorResponse
    {   code: 404
      , message: "Not found".to_string()
      , kind: "not_found_error".to_string()
      , details: None
    }.into_response()
}

pub async fn method_not_allowed() -> Response
{   ErrorResponse
    {   code: 405
      , message: "Method not allowed".to_string()
      , kind: "method_not_allowed_error".to_string()
      , details: None
    }.into_response()
}
