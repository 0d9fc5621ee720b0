use crate::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const WINDOW_KEY_PREFIX: &str = "ratelimit:";

/// Composite key identifying one identifier's window under one policy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identifier: String,
    pub policy_name: String,
}

impl RateLimitKey {
    pub fn new(identifier: &str, policy_name: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            policy_name: policy_name.to_string(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}",
            WINDOW_KEY_PREFIX, self.policy_name, self.identifier
        )
    }
}

/// Raw outcome of the atomic check-and-admit operation
///
/// `count` is the number of entries in the window after the operation,
/// including the newly admitted entry when `admitted` is true. `oldest` is
/// the timestamp of the oldest surviving entry, if any.
#[derive(Debug, Clone)]
pub struct AdmitDecision {
    pub admitted: bool,
    pub count: u64,
    pub oldest: Option<f64>,
}

/// Storage backend for sliding window entries
///
/// Implementations must execute `check_and_admit` as a single indivisible
/// operation for a given key: concurrent callers observing `count < limit`
/// and both admitting would break the window invariant. The distributed
/// backend achieves this with a server-side script; the local backend with
/// a lock.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Purge entries older than the window, then admit the request if the
    /// surviving count is below `limit`
    async fn check_and_admit(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window_seconds: u64,
        now: f64,
    ) -> Result<AdmitDecision>;

    /// Timestamps recorded at or after `window_start`, sorted ascending
    async fn window_entries(&self, key: &RateLimitKey, window_start: f64) -> Result<Vec<f64>>;

    /// Delete all entries for the key; succeeds silently when already empty
    async fn reset(&self, key: &RateLimitKey) -> Result<()>;

    /// Short backend label for logs and metrics
    fn backend_name(&self) -> &'static str;
}

/// Current unix time as fractional seconds
pub fn unix_now() -> Result<f64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| crate::errors::AppError::Internal(format!("Time error: {}", e)))?;
    Ok(now.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = RateLimitKey::new("user42", "login");
        assert_eq!(key.to_string(), "ratelimit:login:user42");
    }

    #[test]
    fn test_unix_now_is_positive() {
        assert!(unix_now().unwrap() > 0.0);
    }
}
