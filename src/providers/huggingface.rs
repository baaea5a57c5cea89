use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use log::info;

use crate::error::{Error, UpstreamError};
use crate::retry::RetryPolicy;

pub const USER_AGENT: &str
  = concat!("hf-gateway/", env!("CARGO_PKG_VERSION"));

// ===== Wire Types =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOptions
{   pub wait_for_model: bool
}

/// Body POSTed to `{base_url}/models/{model_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferencePayload
{   pub inputs: String
  , #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<InferenceOptions>
}

impl InferencePayload
{   pub fn new(inputs: impl Into<String>) -> Self
    {   InferencePayload
        {   inputs: inputs.into()
          , parameters: serde_json::Map::new()
          , options: None
        }
    }
}

/// Error object the upstream returns on failure
#[derive(Debug, Clone, Deserialize)]
struct ErrorBody
{   error: String
  , #[serde(default)]
    message: Option<String>
}

fn upstream_error(status: u16, body: &[u8]) -> UpstreamError
{   match serde_json::from_slice::<ErrorBody>(body)
    {   Ok(parsed) => {
          UpstreamError::http(
            status
          , parsed.error
          , parsed.message.filter(|m| !m.is_empty())
          )
        }
      , Err(_) => {
          UpstreamError::http(
            status
          , String::from_utf8_lossy(body).into_owned()
          , None
          )
        }
    }
}

// ===== Transport Client =====

/// Outbound client for the inference API.
/// Cheap to share: the connection pool lives inside `reqwest::Client`
#[derive(Clone)]
pub struct HuggingFaceClient
{   http_client: reqwest::Client
  , base_url: String
  , api_key: String
  , retry: RetryPolicy
}

impl std::fmt::Debug for HuggingFaceClient
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   f.debug_struct("HuggingFaceClient")
          .field("base_url", &self.base_url)
          .field("api_key", &"<redacted>")
          .field("retry", &self.retry)
          .finish()
    }
}

impl HuggingFaceClient
{   pub fn new(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    , timeout: Duration
    , retry: RetryPolicy
    ) -> Result<Self, Error>
    {   let base_url: String = base_url.into();
        let http_client = reqwest::Client::builder()
          .timeout(timeout)
          .user_agent(USER_AGENT)
          .build()
          .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;

        Ok(HuggingFaceClient
        {   http_client
          , base_url: base_url.trim_end_matches('/').to_string()
          , api_key: api_key.into()
          , retry
        })
    }

    pub fn from_config(
      config: &crate::config::HuggingFaceConfig
    ) -> Result<Self, Error>
    {   HuggingFaceClient::new(
          config.base_url.clone()
        , config.api_key.clone()
        , config.timeout()
        , RetryPolicy::from_config(config)
        )
    }

    pub fn model_url(&self, model_id: &str) -> String
    {   format!("{}/models/{}", self.base_url, model_id)
    }

    /// POST `payload` for `model_id`, retrying transient failures.
    /// Returns the raw 2xx body without looking at it
    pub async fn send(
      &self
    , model_id: &str
    , payload: &InferencePayload
    , cancel: &CancellationToken
    ) -> Result<Vec<u8>, Error>
    {   let body = serde_json::to_vec(payload)
          .map_err(|e| Error::Other(
            format!("failed to marshal request: {}", e)
          ))?;
        let url = self.model_url(model_id);

        let max_attempts = self.retry.max_attempts();
        let mut last_failure = None;
        for attempt in 0..max_attempts
        {   if let Some(delay) = self.retry.delay_before(attempt)
            {   tokio::select!
                { biased;
                  _ = cancel.cancelled() => return Err(Error::Cancelled)
                , _ = tokio::time::sleep(delay) => {}
                }
                info!(attempt = attempt, model = model_id; "Retrying request");
            }

            let outcome = tokio::select!
            { biased;
              _ = cancel.cancelled() => return Err(Error::Cancelled)
            , outcome = self.attempt(&url, body.clone()) => outcome
            };

            match outcome
            {   Ok(bytes) => return Ok(bytes)
              , Err(failure) if failure.is_client_error() => {
                  return Err(Error::UpstreamClient(failure));
                }
              , Err(failure) => last_failure = Some(failure)
            }
        }

        Err(Error::UpstreamTransient
        {   attempts: max_attempts
          , last: last_failure.unwrap_or_else(|| {
              UpstreamError::network("no attempt was made")
            })
        })
    }

    /// One request/response exchange. The body is handed over fresh
    /// each time since reqwest consumes it
    async fn attempt(
      &self
    , url: &str
    , body: Vec<u8>
    ) -> Result<Vec<u8>, UpstreamError>
    {   let response = self.http_client
          .post(url)
          .bearer_auth(&self.api_key)
          .header(reqwest::header::CONTENT_TYPE, "application/json")
          .body(body)
          .send()
          .await
          .map_err(|e| UpstreamError::network(e.to_string()))?;

        let status = response.status();
        let bytes = response.bytes().await
          .map_err(|e| UpstreamError::network(
            format!("failed to read response: {}", e)
          ))?;

        if status.is_success()
        {   Ok(bytes.to_vec())
        } else
        {   Err(upstream_error(status.as_u16(), &bytes))
        }
    }
}
