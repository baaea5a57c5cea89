//! Per-client sliding-window request limiter

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use log::debug;

use crate::error::Error;

/// Keys beyond which stale clients are swept on access
const SWEEP_THRESHOLD: usize = 1024;

/// Allows `limit` requests per `window` for each client key.
/// Clones share the same state
#[derive(Debug, Clone)]
pub struct RateLimiter
{   requests: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>
  , limit: usize
  , window: Duration
}

impl RateLimiter
{   pub fn new(limit: usize, window: Duration) -> Self
    {   RateLimiter
        {   requests: Arc::new(Mutex::new(HashMap::new()))
          , limit
          , window
        }
    }

    /// `requests_per_minute` over a 60 second window
    pub fn per_minute(requests_per_minute: usize) -> Self
    {   RateLimiter::new(requests_per_minute, Duration::from_secs(60))
    }

    pub fn check(&self, client: &str) -> Result<(), Error>
    {   self.check_at(client, Instant::now())
    }

    /// Record a request from `client` at `now`, or refuse it when the
    /// window is full. Refused requests are not recorded
    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), Error>
    {   let mut requests = self.requests
          .lock()
          .unwrap_or_else(|poisoned| poisoned.into_inner());

        if requests.len() > SWEEP_THRESHOLD
        {   let window = self.window;
            requests.retain(|_, times| {
              times.back()
                .map(|last| now.saturating_duration_since(*last) < window)
                .unwrap_or(false)
            });
        }

        let times = requests.entry(client.to_string()).or_default();
        while let Some(oldest) = times.front()
        {   if now.saturating_duration_since(*oldest) >= self.window
            {   times.pop_front();
            } else
            {   break;
            }
        }

        if times.len() >= self.limit
        {   debug!(
              client = client, in_window = times.len();
              "Rate limit hit"
            );
            return Err(Error::RateLimitExceeded);
        }
        times.push_back(now);
        Ok(())
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize
    {   self.requests
          .lock()
          .map(|r| r.len())
          .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn refuses_past_limit_within_window()
    {   let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.check_at("10.0.0.1", t0).is_ok());
        assert!(limiter.check_at("10.0.0.1", t0).is_ok());
        assert_eq!(
          limiter.check_at("10.0.0.1", t0 + Duration::from_secs(1)),
          Err(Error::RateLimitExceeded)
        );
    }

    #[test]
    fn clients_are_independent()
    {   let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.check_at("10.0.0.1", t0).is_ok());
        assert!(limiter.check_at("10.0.0.2", t0).is_ok());
        assert!(limiter.check_at("10.0.0.1", t0).is_err());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn window_slides()
    {   let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.check_at("c", t0).is_ok());
        assert!(limiter.check_at("c", t0 + Duration::from_secs(59)).is_err());
        assert!(limiter.check_at("c", t0 + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn refused_requests_do_not_extend_the_window()
    {   let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(limiter.check_at("c", t0).is_ok());
        for s in 1..10
        {   assert!(limiter.check_at("c", t0 + Duration::from_secs(s)).is_err());
        }
        assert!(limiter.check_at("c", t0 + Duration::from_secs(10)).is_ok());
    }
}
