use std::fmt;

/// Failure of a single upstream attempt.
/// `status` is `None` when no HTTP response was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError
{   pub status: Option<u16>
  , pub message: String
  , pub detail: Option<String>
}

impl UpstreamError
{   /// Network-level failure, no status available
    pub fn network(message: impl Into<String>) -> Self
    {   UpstreamError
        {   status: None
          , message: message.into()
          , detail: None
        }
    }

    /// Non-success HTTP response
    pub fn http(
      status: u16
    , message: impl Into<String>
    , detail: Option<String>
    ) -> Self
    {   UpstreamError
        {   status: Some(status)
          , message: message.into()
          , detail
        }
    }

    /// Upstream rejected the request itself (4xx); never retried
    pub fn is_client_error(&self) -> bool
    {   matches!(self.status, Some(code) if (400..500).contains(&code))
    }
}

impl fmt::Display for UpstreamError
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match (self.status, &self.detail)
        {   (Some(code), Some(detail)) => {
              write!(f, "API error ({}): {} - {}", code, self.message, detail)
            }
          , (Some(code), None) => {
              write!(f, "API error ({}): {}", code, self.message)
            }
          , (None, _) => {
              write!(f, "HTTP request failed: {}", self.message)
            }
        }
    }
}

/// Error type for every gateway operation
/// Implements Clone so results can be shared with the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Caller input violates a request invariant
    Validation(String)
  , /// Upstream answered 4xx; terminal on the first attempt
    UpstreamClient(UpstreamError)
  , /// Network failure or non-4xx error after the retry budget was spent
    UpstreamTransient
    {   attempts: usize
      , last: UpstreamError
    }
  , /// Caller cancelled during an in-flight call or a retry wait
    Cancelled
  , /// Upstream answered 2xx with a body we cannot interpret
    ParseError(String)
  , /// Per-client request budget exhausted
    RateLimitExceeded
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Generic error
    Other(String)
}

impl Error
{   /// Machine-readable tag used in JSON error bodies
    pub fn kind(&self) -> &'static str
    {   match self
        {   Error::Validation(_) => "validation_error"
          , Error::Cancelled => "cancelled_error"
          , Error::RateLimitExceeded => "rate_limit_error"
          , Error::InvalidConfiguration(_) => "configuration_error"
          , Error::UpstreamClient(_)
          | Error::UpstreamTransient { .. }
          | Error::ParseError(_)
          | Error::Other(_) => "service_error"
        }
    }

    /// HTTP status the REST layer answers with
    pub fn status_code(&self) -> u16
    {   match self
        {   Error::Validation(_) => 400
          , Error::Cancelled => 408
          , Error::RateLimitExceeded => 429
          , _ => 500
        }
    }

    pub fn is_validation(&self) -> bool
    {   matches!(self, Error::Validation(_))
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::Validation(msg) => {
              write!(f, "{}", msg)
            }
          , Error::UpstreamClient(err) => {
              write!(f, "{}", err)
            }
          , Error::UpstreamTransient { attempts, last } => {
              write!(f,
                "{} (gave up after {} attempts)",
                last, attempts
              )
            }
          , Error::Cancelled => {
              write!(f, "Request cancelled")
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::RateLimitExceeded => {
              write!(f, "Rate limit exceeded")
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}
