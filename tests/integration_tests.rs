use std::time::{Duration, Instant};

use hf_gateway::client::{SENTIMENT_MODEL, SUMMARIZATION_MODEL};
use hf_gateway::providers::huggingface::USER_AGENT;
use hf_gateway::providers::{HuggingFaceClient, InferencePayload};
use hf_gateway::{
  Choice, Error, GenerationDefaults, GenerationRequest, InferenceApi,
  InferenceService, RetryPolicy,
};
use mockito::{Matcher, Server};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "hf_test";

fn transport(
  base_url: &str
, retry_attempts: usize
, delay: Duration
) -> HuggingFaceClient
{   HuggingFaceClient::new(
      base_url
    , API_KEY
    , Duration::from_secs(5)
    , RetryPolicy::new(retry_attempts, delay)
    ).expect("client builds")
}

fn service(base_url: &str, retry_attempts: usize) -> InferenceService
{   InferenceService::new(
      transport(base_url, retry_attempts, Duration::from_millis(10))
    , GenerationDefaults { max_tokens: 100, temperature: 0.7 }
    )
}

/// Upstream that accepts connections and never answers
async fn silent_upstream() -> String
{   let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await
      .expect("bind");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
      let mut held = Vec::new();
      while let Ok((socket, _)) = listener.accept().await
      {   held.push(socket);
      }
    });
    format!("http://{}", address)
}

// ===== Transport Client =====

#[tokio::test]
async fn sends_auth_and_identity_headers()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/models/gpt2")
      .match_header("authorization", "Bearer hf_test")
      .match_header("content-type", "application/json")
      .match_header("user-agent", USER_AGENT)
      .match_body(Matcher::Json(json!({ "inputs": "ping" })))
      .with_status(200)
      .with_body("raw, not even json")
      .expect(1)
      .create_async()
      .await;

    let client = transport(&server.url(), 0, Duration::ZERO);
    let body = assert_ok!(
      client.send(
        "gpt2"
      , &InferencePayload::new("ping")
      , &CancellationToken::new()
      ).await
    );

    assert_eq!(body, b"raw, not even json");
    mock.assert_async().await;
}

#[tokio::test]
async fn always_failing_upstream_gets_retry_budget_plus_one_attempts()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/models/gpt2")
      .with_status(500)
      .with_body(r#"{"error":"Internal failure","message":"try again"}"#)
      .expect(3)
      .create_async()
      .await;

    let delay = Duration::from_millis(50);
    let client = transport(&server.url(), 2, delay);
    let started = Instant::now();
    let err = assert_err!(
      client.send(
        "gpt2"
      , &InferencePayload::new("Hi")
      , &CancellationToken::new()
      ).await
    );

    assert!(started.elapsed() >= delay * 2);
    match err
    {   Error::UpstreamTransient { attempts, last } => {
          assert_eq!(attempts, 3);
          assert_eq!(last.status, Some(500));
          assert_eq!(last.message, "Internal failure");
          assert_eq!(last.detail.as_deref(), Some("try again"));
        }
      , other => panic!("expected exhaustion, got {:?}", other)
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn client_error_stops_after_one_attempt()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/models/no-such-model")
      .with_status(404)
      .with_body(r#"{"error":"Model no-such-model does not exist"}"#)
      .expect(1)
      .create_async()
      .await;

    let client = transport(&server.url(), 3, Duration::from_millis(10));
    let err = assert_err!(
      client.send(
        "no-such-model"
      , &InferencePayload::new("Hi")
      , &CancellationToken::new()
      ).await
    );

    match err
    {   Error::UpstreamClient(upstream) => {
          assert_eq!(upstream.status, Some(404));
          assert_eq!(upstream.message, "Model no-such-model does not exist");
          assert_eq!(upstream.detail, None);
        }
      , other => panic!("expected client error, got {:?}", other)
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn recovers_when_a_retry_succeeds()
{   let mut server = Server::new_async().await;
    let loading = server.mock("POST", "/models/gpt2")
      .with_status(503)
      .with_body("Service Unavailable")
      .expect(1)
      .create_async()
      .await;
    let ready = server.mock("POST", "/models/gpt2")
      .with_status(200)
      .with_body(r#"[{"generated_text":"ok"}]"#)
      .expect(1)
      .create_async()
      .await;

    let client = transport(&server.url(), 2, Duration::from_millis(10));
    let body = assert_ok!(
      client.send(
        "gpt2"
      , &InferencePayload::new("Hi")
      , &CancellationToken::new()
      ).await
    );

    assert_eq!(body, br#"[{"generated_text":"ok"}]"#);
    loading.assert_async().await;
    ready.assert_async().await;
}

#[tokio::test]
async fn network_failures_are_retried_then_reported()
{   // Nothing listens on port 1
    let client = transport("http://127.0.0.1:1", 1, Duration::from_millis(10));
    let err = assert_err!(
      client.send(
        "gpt2"
      , &InferencePayload::new("Hi")
      , &CancellationToken::new()
      ).await
    );

    match err
    {   Error::UpstreamTransient { attempts, last } => {
          assert_eq!(attempts, 2);
          assert_eq!(last.status, None);
        }
      , other => panic!("expected exhaustion, got {:?}", other)
    }
}

#[tokio::test]
async fn cancellation_during_retry_wait_returns_promptly()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/models/gpt2")
      .with_status(500)
      .with_body("boom")
      .expect(1)
      .create_async()
      .await;

    let client = transport(&server.url(), 3, Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      trigger.cancel();
    });

    let started = Instant::now();
    let err = assert_err!(
      client.send("gpt2", &InferencePayload::new("Hi"), &cancel).await
    );

    assert_eq!(err, Error::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    mock.assert_async().await;
}

#[tokio::test]
async fn cancellation_interrupts_an_in_flight_call()
{   let base_url = silent_upstream().await;
    let client = HuggingFaceClient::new(
        base_url
      , API_KEY
      , Duration::from_secs(30)
      , RetryPolicy::new(0, Duration::ZERO)
      ).expect("client builds");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      trigger.cancel();
    });

    let started = Instant::now();
    let err = assert_err!(
      client.send("gpt2", &InferencePayload::new("Hi"), &cancel).await
    );

    assert_eq!(err, Error::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn already_cancelled_call_never_reaches_upstream()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", Matcher::Any)
      .expect(0)
      .create_async()
      .await;

    let client = transport(&server.url(), 3, Duration::ZERO);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assert_err!(
      client.send("gpt2", &InferencePayload::new("Hi"), &cancel).await
    );
    assert_eq!(err, Error::Cancelled);
    mock.assert_async().await;
}

// ===== Request Orchestrator =====

#[tokio::test]
async fn invalid_requests_never_reach_upstream()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", Matcher::Any)
      .expect(0)
      .create_async()
      .await;

    let svc = service(&server.url(), 3);
    let cancel = CancellationToken::new();

    for request in [
      GenerationRequest::new("gpt2", "")
    , GenerationRequest::new("", "Hello")
    , GenerationRequest { temperature: Some(1.5), ..GenerationRequest::new("gpt2", "Hi") }
    , GenerationRequest { max_tokens: Some(-5), ..GenerationRequest::new("gpt2", "Hi") }
    ]
    {   let err = assert_err!(svc.generate_text(request, &cancel).await);
        assert!(err.is_validation(), "unexpected {:?}", err);
    }

    let err = assert_err!(svc.analyze_sentiment(String::new(), &cancel).await);
    assert!(err.is_validation());
    let err = assert_err!(
      svc.summarize_text(String::new(), 130, &cancel).await
    );
    assert!(err.is_validation());

    mock.assert_async().await;
}

#[tokio::test]
async fn generation_end_to_end()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/models/gpt2")
      .match_body(Matcher::Json(json!({
        "inputs": "Hi",
        "parameters": { "max_new_tokens": 10, "temperature": 0.5 },
        "options": { "wait_for_model": true }
      })))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"[{"generated_text":"Hi there!"}]"#)
      .expect(1)
      .create_async()
      .await;

    let svc = service(&server.url(), 0);
    let request = GenerationRequest
    {   id: "req-42".into()
      , max_tokens: Some(10)
      , temperature: Some(0.5)
      , ..GenerationRequest::new("gpt2", "Hi")
    };
    let result = assert_ok!(
      svc.generate_text(request, &CancellationToken::new()).await
    );

    assert_eq!(result.id, "req-42");
    assert_eq!(result.model, "gpt2");
    assert_eq!(
      result.choices,
      vec![Choice
      {   index: 0
        , text: " there!".into()
        , finish_reason: "stop".into()
      }]
    );
    assert_eq!(result.usage.total_tokens, 2);
    assert_eq!(
      result.usage.total_tokens,
      result.usage.prompt_tokens + result.usage.completion_tokens
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn parse_failures_are_not_retried()
{   let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/models/gpt2")
      .with_status(200)
      .with_body("[]")
      .expect(1)
      .create_async()
      .await;

    let svc = service(&server.url(), 3);
    let err = assert_err!(
      svc.generate_text(
        GenerationRequest::new("gpt2", "Hi")
      , &CancellationToken::new()
      ).await
    );
    assert_eq!(err, Error::ParseError("no response generated".into()));
    mock.assert_async().await;
}

#[tokio::test]
async fn sentiment_uses_fixed_model()
{   let mut server = Server::new_async().await;
    let path = format!("/models/{}", SENTIMENT_MODEL);
    let mock = server.mock("POST", path.as_str())
      .match_body(Matcher::Json(json!({ "inputs": "What a day" })))
      .with_status(200)
      .with_body(
        r#"[[{"label":"negative","score":0.2},{"label":"positive","score":0.8}]]"#
      )
      .expect(1)
      .create_async()
      .await;

    let svc = service(&server.url(), 0);
    let result = assert_ok!(
      svc.analyze_sentiment("What a day".into(), &CancellationToken::new()).await
    );
    assert_eq!(result.sentiment, "positive");
    assert_eq!(result.confidence, 0.8);
    mock.assert_async().await;
}

#[tokio::test]
async fn summarization_sends_length_bounds()
{   let mut server = Server::new_async().await;
    let path = format!("/models/{}", SUMMARIZATION_MODEL);
    let mock = server.mock("POST", path.as_str())
      .match_body(Matcher::PartialJson(json!({
        "parameters": { "max_length": 60, "min_length": 15 }
      })))
      .with_status(200)
      .with_body(r#"[{"summary_text":"short"}]"#)
      .expect(1)
      .create_async()
      .await;

    let svc = service(&server.url(), 0);
    let result = assert_ok!(
      svc.summarize_text("a much longer text".into(), 60, &CancellationToken::new())
        .await
    );
    assert_eq!(result.summary, "short");
    assert!((result.compression - 5.0 / 18.0).abs() < 1e-9);
    mock.assert_async().await;
}

#[tokio::test]
async fn upstream_errors_propagate_unchanged()
{   let mut server = Server::new_async().await;
    let _mock = server.mock("POST", "/models/gpt2")
      .with_status(401)
      .with_body(r#"{"error":"Invalid credentials in Authorization header"}"#)
      .create_async()
      .await;

    let svc = service(&server.url(), 3);
    let err = assert_err!(
      svc.generate_text(
        GenerationRequest::new("gpt2", "Hi")
      , &CancellationToken::new()
      ).await
    );
    assert_eq!(err.kind(), "service_error");
    assert_eq!(
      err.to_string(),
      "API error (401): Invalid credentials in Authorization header"
    );
}
