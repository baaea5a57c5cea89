use std::time::Instant;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use log::{debug, error, info, warn};

use crate::error::Error;
use crate::providers::{HuggingFaceClient, InferenceOptions, InferencePayload};
use crate::request::{
  GenerationRequest, GenerationResult, SentimentResult, SummaryResult,
};

/// Model used for every sentiment request
pub const SENTIMENT_MODEL: &str
  = "cardiffnlp/twitter-roberta-base-sentiment-latest";

/// Model used for every summarization request
pub const SUMMARIZATION_MODEL: &str = "facebook/bart-large-cnn";

/// Models known to work with the generation path. Advisory only
pub const SUPPORTED_MODELS: &[&str] = &[
  "gpt2", "gpt2-medium", "gpt2-large", "gpt2-xl",
  "microsoft/DialoGPT-medium", "microsoft/DialoGPT-large",
  SUMMARIZATION_MODEL, SENTIMENT_MODEL,
];

/// Operations the HTTP layer needs from the inference backend
#[async_trait]
pub trait InferenceApi: Send + Sync
{   async fn generate_text(
      &self
    , request: GenerationRequest
    , cancel: &CancellationToken
    ) -> Result<GenerationResult, Error>;

    /// Same pipeline as [`InferenceApi::generate_text`]
    async fn generate_completion(
      &self
    , request: GenerationRequest
    , cancel: &CancellationToken
    ) -> Result<GenerationResult, Error>
    {   self.generate_text(request, cancel).await
    }

    async fn analyze_sentiment(
      &self
    , text: String
    , cancel: &CancellationToken
    ) -> Result<SentimentResult, Error>;

    async fn summarize_text(
      &self
    , text: String
    , max_length: i64
    , cancel: &CancellationToken
    ) -> Result<SummaryResult, Error>;

    fn validate_model(&self, model: &str) -> Result<(), Error>;
}

/// Values applied when a generation request leaves them out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults
{   pub max_tokens: i64
  , pub temperature: f64
}

impl GenerationDefaults
{   pub fn from_config(config: &crate::config::HuggingFaceConfig) -> Self
    {   GenerationDefaults
        {   max_tokens: config.max_tokens
          , temperature: config.temperature
        }
    }
}

/// Validates requests, builds payloads, calls the upstream and
/// normalizes what comes back
#[derive(Debug, Clone)]
pub struct InferenceService
{   transport: HuggingFaceClient
  , defaults: GenerationDefaults
}

impl InferenceService
{   pub fn new(
      transport: HuggingFaceClient
    , defaults: GenerationDefaults
    ) -> Self
    {   debug!(defaults:? = defaults; "Creating InferenceService");
        InferenceService
        {   transport
          , defaults
        }
    }

    pub fn from_config(
      config: &crate::config::HuggingFaceConfig
    ) -> Result<Self, Error>
    {   Ok(InferenceService::new(
          HuggingFaceClient::from_config(config)?
        , GenerationDefaults::from_config(config)
        ))
    }

    /// Base parameters overlaid with the caller's extras
    pub fn generation_payload(
      &self
    , request: &GenerationRequest
    ) -> InferencePayload
    {   let mut payload = InferencePayload::new(request.prompt.clone());
        payload.parameters.insert(
          "max_new_tokens".to_string()
        , request.max_tokens.unwrap_or(self.defaults.max_tokens).into()
        );
        payload.parameters.insert(
          "temperature".to_string()
        , request.temperature.unwrap_or(self.defaults.temperature).into()
        );
        if let Some(top_p) = request.top_p
        {   payload.parameters.insert("top_p".to_string(), top_p.into());
        }
        for (key, value) in &request.parameters
        {   payload.parameters.insert(key.clone(), value.clone().into());
        }
        payload.options = Some(InferenceOptions { wait_for_model: true });
        payload
    }

    pub fn summarization_payload(
      text: &str
    , max_length: i64
    ) -> InferencePayload
    {   let mut payload = InferencePayload::new(text);
        payload.parameters.insert("max_length".to_string(), max_length.into());
        payload.parameters.insert(
          "min_length".to_string()
        , (max_length / 4).into()
        );
        payload
    }
}

fn require_text(text: &str) -> Result<(), Error>
{   if text.is_empty()
    {   Err(Error::Validation("text is required".into()))
    } else
    {   Ok(())
    }
}

fn preview(prompt: &str) -> String
{   let head: String = prompt.chars().take(100).collect();
    format!("{}...", head)
}

#[async_trait]
impl InferenceApi for InferenceService
{   async fn generate_text(
      &self
    , request: GenerationRequest
    , cancel: &CancellationToken
    ) -> Result<GenerationResult, Error>
    {   request.validate()?;
        self.validate_model(&request.model)?;

        let started = Instant::now();
        info!(
          request_id = request.id.as_str(), model = request.model.as_str(),
          prompt = preview(&request.prompt).as_str();
          "Starting text generation"
        );

        let payload = self.generation_payload(&request);
        let outcome = match self.transport
          .send(&request.model, &payload, cancel)
          .await
        {   Ok(body) => crate::normalize::generation(&request, &body)
          , Err(e) => Err(e)
        };
        let processing_ms = started.elapsed().as_millis() as u64;

        match outcome
        {   Ok(mut result) => {
              result.processing_ms = processing_ms;
              info!(
                request_id = request.id.as_str(), processing_ms = processing_ms,
                total_tokens = result.usage.total_tokens;
                "Text generation completed"
              );
              Ok(result)
            }
          , Err(e) => {
              error!(
                request_id = request.id.as_str(), processing_ms = processing_ms,
                error:% = e;
                "Failed to generate text"
              );
              Err(e)
            }
        }
    }

    async fn analyze_sentiment(
      &self
    , text: String
    , cancel: &CancellationToken
    ) -> Result<SentimentResult, Error>
    {   require_text(&text)?;

        let started = Instant::now();
        info!(text_length = text.len(); "Starting sentiment analysis");

        let payload = InferencePayload::new(text.clone());
        let outcome = match self.transport
          .send(SENTIMENT_MODEL, &payload, cancel)
          .await
        {   Ok(body) => crate::normalize::sentiment(&text, &body)
          , Err(e) => Err(e)
        };

        if let Err(e) = &outcome
        {   error!(
              processing_ms = started.elapsed().as_millis() as u64, error:% = e;
              "Failed to analyze sentiment"
            );
        }
        outcome
    }

    async fn summarize_text(
      &self
    , text: String
    , max_length: i64
    , cancel: &CancellationToken
    ) -> Result<SummaryResult, Error>
    {   require_text(&text)?;
        if max_length <= 0
        {   return Err(Error::Validation(
              "max_length must be positive".into()
            ));
        }

        let started = Instant::now();
        info!(
          text_length = text.len(), max_length = max_length;
          "Starting text summarization"
        );

        let payload = InferenceService::summarization_payload(&text, max_length);
        let outcome = match self.transport
          .send(SUMMARIZATION_MODEL, &payload, cancel)
          .await
        {   Ok(body) => crate::normalize::summary(&text, &body)
          , Err(e) => Err(e)
        };

        if let Err(e) = &outcome
        {   error!(
              processing_ms = started.elapsed().as_millis() as u64, error:% = e;
              "Failed to summarize text"
            );
        }
        outcome
    }

    /// Unknown names pass with a warning
    fn validate_model(&self, model: &str) -> Result<(), Error>
    {   if model.is_empty()
        {   return Err(Error::Validation(
              "model name cannot be empty".into()
            ));
        }
        if !SUPPORTED_MODELS.contains(&model)
        {   warn!(model = model; "Using unvalidated model");
        }
        Ok(())
    }
}
