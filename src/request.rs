//! Request and result types exchanged with callers

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form extra parameter value merged into the upstream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue
{   Bool(bool)
  , Integer(i64)
  , Float(f64)
  , Text(String)
}

impl From<ParamValue> for serde_json::Value
{   fn from(value: ParamValue) -> Self
    {   match value
        {   ParamValue::Bool(b) => serde_json::Value::Bool(b)
          , ParamValue::Integer(i) => serde_json::Value::from(i)
          , ParamValue::Float(f) => serde_json::Value::from(f)
          , ParamValue::Text(s) => serde_json::Value::String(s)
        }
    }
}

/// Text generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest
{   #[serde(default)]
    pub id: String
  , #[serde(default)]
    pub model: String
  , #[serde(default)]
    pub prompt: String
  , /// Falls back to the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>
  , /// Falls back to the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>
  , /// Overlaid onto the upstream parameters; wins on key collision
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParamValue>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>
}

impl GenerationRequest
{   pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self
    {   GenerationRequest
        {   model: model.into()
          , prompt: prompt.into()
          , ..Default::default()
        }
    }

    /// Check request invariants; the first violation wins
    pub fn validate(&self) -> Result<(), crate::error::Error>
    {   use crate::error::Error;

        if self.prompt.is_empty()
        {   return Err(Error::Validation("prompt is required".into()));
        }
        if self.model.is_empty()
        {   return Err(Error::Validation("model is required".into()));
        }
        if matches!(self.max_tokens, Some(n) if n < 0)
        {   return Err(Error::Validation(
              "max_tokens must be positive".into()
            ));
        }
        if let Some(t) = self.temperature
        {   if !(0.0..=1.0).contains(&t)
            {   return Err(Error::Validation(
                  "temperature must be between 0 and 1".into()
                ));
            }
        }
        Ok(())
    }
}

/// Sentiment analysis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentRequest
{   #[serde(default)]
    pub text: String
}

/// Summarization request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeRequest
{   #[serde(default)]
    pub text: String
  , /// Values <= 0 or absent mean [`DEFAULT_SUMMARY_MAX_LENGTH`]
    #[serde(default)]
    pub max_length: Option<i64>
}

pub const DEFAULT_SUMMARY_MAX_LENGTH: i64 = 130;

impl SummarizeRequest
{   pub fn effective_max_length(&self) -> i64
    {   match self.max_length
        {   Some(n) if n > 0 => n
          , _ => DEFAULT_SUMMARY_MAX_LENGTH
        }
    }
}

/// One generated continuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice
{   pub index: usize
  , pub text: String
  , pub finish_reason: String
}

/// Heuristic token accounting, 1 token ~ 4 characters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEstimate
{   pub prompt_tokens: usize
  , pub completion_tokens: usize
  , pub total_tokens: usize
}

/// Normalized generation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult
{   pub id: String
  , pub model: String
  , pub choices: Vec<Choice>
  , pub usage: UsageEstimate
  , pub generated_at: DateTime<Utc>
  , pub processing_ms: u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult
{   pub text: String
  , pub sentiment: String
  , pub score: f64
  , pub confidence: f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult
{   pub original_text: String
  , pub summary: String
  , pub compression: f64
}

/// JSON error body returned to HTTP callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse
{   pub code: u16
  , pub message: String
  , #[serde(rename = "type")]
    pub kind: String
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>
}

impl ErrorResponse
{   pub fn validation(message: impl Into<String>) -> Self
    {   ErrorResponse
        {   code: 400
          , message: message.into()
          , kind: "validation_error".to_string()
          , details: None
        }
    }

    /// Service failure with a fixed public message; the error text goes
    /// into `details`. Validation and rate-limit errors keep their own
    /// message and status.
    pub fn from_error(
      message: &str
    , err: &crate::error::Error
    ) -> Self
    {   match err
        {   crate::error::Error::Validation(_)
          | crate::error::Error::RateLimitExceeded => {
              ErrorResponse
              {   code: err.status_code()
                , message: err.to_string()
                , kind: err.kind().to_string()
                , details: None
              }
            }
          , _ => {
              ErrorResponse
              {   code: err.status_code()
                , message: message.to_string()
                , kind: err.kind().to_string()
                , details: Some(err.to_string())
              }
            }
        }
    }
}
