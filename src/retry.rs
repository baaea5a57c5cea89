//! Retry policy for upstream calls

use std::time::Duration;
use log::debug;

/// Fixed-delay retry policy.
/// Attempt 0 is the first call; attempts `1..=retry_attempts` are retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy
{   pub retry_attempts: usize
  , pub delay: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      retry_attempts: usize
    , delay: Duration
    ) -> Self
    {   RetryPolicy
        {   retry_attempts
          , delay
        }
    }

    pub fn from_config(config: &crate::config::HuggingFaceConfig) -> Self
    {   RetryPolicy::new(config.retry_attempts, config.retry_delay())
    }

    /// Total number of calls the policy allows, first one included
    pub fn max_attempts(&self) -> usize
    {   self.retry_attempts + 1
    }

    /// How long to wait before `attempt`; `None` for the first call
    pub fn delay_before(
      &self
    , attempt: usize
    ) -> Option<Duration>
    {   if attempt == 0
        {   None
        } else
        {   debug!(
              attempt = attempt, delay_ms = self.delay.as_millis() as u64;
              "Backoff before retry"
            );
            Some(self.delay)
        }
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(3, Duration::from_secs(1))
    }
}
