//! Configuration for the gateway, its upstream, and its logger
//!
//! Everything here is read once at startup and shared read-only afterwards.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::warn;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig
{   /// Bind address
    pub host: String
  , /// Bind port
    pub port: u16
  , /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout_secs: u64
  , /// Deadline for one inference request; its upstream call is
    /// cancelled once this elapses
    pub request_timeout_secs: u64
}

impl ServerConfig
{   pub fn request_timeout(&self) -> Duration
    {   Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig
{   fn default() -> Self
    {   ServerConfig
        {   host: "127.0.0.1".to_string()
          , port: 8080
          , shutdown_timeout_secs: 30
          , request_timeout_secs: 30
        }
    }
}

/// Upstream inference API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuggingFaceConfig
{   /// Bearer token; never serialized
    #[serde(skip_serializing, default)]
    pub api_key: String
  , /// API base URL
    pub base_url: String
  , /// Advertised model, reported at startup
    pub default_model: String
  , /// Per-call timeout in seconds
    pub timeout_secs: u64
  , /// Retries after the first attempt
    pub retry_attempts: usize
  , /// Fixed wait before each retry, in milliseconds
    pub retry_delay_ms: u64
  , /// Default `max_new_tokens`
    pub max_tokens: i64
  , /// Default sampling temperature
    pub temperature: f64
  , /// Requests per minute allowed per client address
    pub rate_limit_rpm: usize
}

impl HuggingFaceConfig
{   pub fn timeout(&self) -> Duration
    {   Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration
    {   Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for HuggingFaceConfig
{   fn default() -> Self
    {   HuggingFaceConfig
        {   api_key: String::new()
          , base_url: "https://api-inference.huggingface.co".to_string()
          , default_model: "gpt2".to_string()
          , timeout_secs: 30
          , retry_attempts: 3
          , retry_delay_ms: 1000
          , max_tokens: 100
          , temperature: 0.7
          , rate_limit_rpm: 60
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput
{   Stdout
  , Stderr
}

impl FromStr for LogOutput
{   type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {   match s.to_ascii_lowercase().as_str()
        {   "stdout" => Ok(LogOutput::Stdout)
          , "stderr" => Ok(LogOutput::Stderr)
          , other => Err(format!("unknown log output: {}", other))
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig
{   /// One of error, warn, info, debug, trace
    pub level: String
  , pub output: LogOutput
  , /// Emit one JSON object per line
    pub structured: bool
}

impl Default for LoggerConfig
{   fn default() -> Self
    {   LoggerConfig
        {   level: "info".to_string()
          , output: LogOutput::Stdout
          , structured: true
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config
{   pub server: ServerConfig
  , pub hugging_face: HuggingFaceConfig
  , pub logger: LoggerConfig
}

impl Config
{   /// Build from process environment variables, defaults for
    /// anything unset or unparseable
    pub fn from_env() -> Result<Self, crate::error::Error>
    {   Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, crate::error::Error>
    where F: Fn(&str) -> Option<String>
    {   let server_default = ServerConfig::default();
        let hf_default = HuggingFaceConfig::default();
        let log_default = LoggerConfig::default();

        let api_key = lookup("HUGGINGFACE_API_KEY")
          .filter(|k| !k.is_empty())
          .ok_or_else(|| crate::error::Error::InvalidConfiguration(
            "HUGGINGFACE_API_KEY environment variable is required"
              .to_string()
          ))?;

        let server = ServerConfig
        {   host: lookup("SERVER_HOST")
              .filter(|h| !h.is_empty())
              .unwrap_or(server_default.host)
          , port: parsed(&lookup, "SERVER_PORT", server_default.port)
          , shutdown_timeout_secs: parsed(
              &lookup
            , "SERVER_SHUTDOWN_TIMEOUT_SECS"
            , server_default.shutdown_timeout_secs
            )
          , request_timeout_secs: parsed(
              &lookup
            , "SERVER_WRITE_TIMEOUT_SECS"
            , server_default.request_timeout_secs
            )
        };

        let hugging_face = HuggingFaceConfig
        {   api_key
          , base_url: lookup("HUGGINGFACE_BASE_URL")
              .filter(|u| !u.is_empty())
              .unwrap_or(hf_default.base_url)
          , default_model: lookup("HUGGINGFACE_DEFAULT_MODEL")
              .filter(|m| !m.is_empty())
              .unwrap_or(hf_default.default_model)
          , timeout_secs: parsed(
              &lookup, "HUGGINGFACE_TIMEOUT_SECS", hf_default.timeout_secs
            )
          , retry_attempts: parsed(
              &lookup, "HUGGINGFACE_RETRY_ATTEMPTS", hf_default.retry_attempts
            )
          , retry_delay_ms: parsed(
              &lookup, "HUGGINGFACE_RETRY_DELAY_MS", hf_default.retry_delay_ms
            )
          , max_tokens: parsed(
              &lookup, "HUGGINGFACE_MAX_TOKENS", hf_default.max_tokens
            )
          , temperature: parsed(
              &lookup, "HUGGINGFACE_TEMPERATURE", hf_default.temperature
            )
          , rate_limit_rpm: parsed(
              &lookup, "HUGGINGFACE_RATE_LIMIT_RPM", hf_default.rate_limit_rpm
            )
        };

        let logger = LoggerConfig
        {   level: lookup("LOG_LEVEL")
              .filter(|l| !l.is_empty())
              .unwrap_or(log_default.level)
          , output: parsed(&lookup, "LOG_OUTPUT", log_default.output)
          , structured: parsed(
              &lookup, "LOG_STRUCTURED", log_default.structured
            )
        };

        Ok(Config
        {   server
          , hugging_face
          , logger
        })
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<(), crate::error::Error>
    {   let invalid = |msg: &str| {
          Err(crate::error::Error::InvalidConfiguration(msg.to_string()))
        };

        if self.hugging_face.api_key.is_empty()
        {   return invalid("hugging face API key is required");
        }
        if self.server.port == 0
        {   return invalid("invalid server port: 0");
        }
        if self.server.request_timeout_secs == 0
        {   return invalid("request timeout must be positive");
        }
        if self.hugging_face.max_tokens <= 0
        {   return invalid("max tokens must be positive");
        }
        if !(0.0..=1.0).contains(&self.hugging_face.temperature)
        {   return invalid("temperature must be between 0 and 1");
        }
        if self.hugging_face.rate_limit_rpm == 0
        {   return invalid("rate limit must be positive");
        }
        Ok(())
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where T: FromStr
  , F: Fn(&str) -> Option<String>
{   match lookup(key)
    {   Some(raw) if !raw.is_empty() => {
          raw.trim().parse().unwrap_or_else(|_| {
            warn!(
              key = key, value = raw.as_str();
              "Ignoring unparseable setting"
            );
            default
          })
        }
      , _ => default
    }
}
