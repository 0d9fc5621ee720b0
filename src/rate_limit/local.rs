use crate::errors::Result;
use crate::rate_limit::store::{AdmitDecision, RateLimitKey, WindowStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process window store used when no shared store is configured, or as
/// the circuit breaker target when the shared store degrades
///
/// Implements the same sliding window algorithm as the distributed backend,
/// but the count is only correct within a single process. Callers selecting
/// this backend must signal the weaker consistency mode; it is never a
/// silent substitute for the shared store.
pub struct LocalWindowStore {
    windows: Mutex<HashMap<String, Vec<f64>>>,
}

impl LocalWindowStore {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Drop entries older than `cutoff` and forget empty keys
    ///
    /// Aging happens lazily on every check for the touched key; this sweep
    /// exists so keys that are never rechecked do not accumulate.
    pub fn sweep(&self, cutoff: f64) {
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|_, entries| {
            entries.retain(|&ts| ts >= cutoff);
            !entries.is_empty()
        });
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn oldest_of(entries: &[f64]) -> Option<f64> {
    entries.iter().cloned().reduce(f64::min)
}

#[async_trait]
impl WindowStore for LocalWindowStore {
    async fn check_and_admit(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window_seconds: u64,
        now: f64,
    ) -> Result<AdmitDecision> {
        let window_start = now - window_seconds as f64;
        let storage_key = key.to_string();

        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(storage_key.clone()).or_default();

        // Purge entries strictly below the window start
        entries.retain(|&ts| ts >= window_start);

        let count = entries.len() as u64;
        if count < limit {
            entries.push(now);
            return Ok(AdmitDecision {
                admitted: true,
                count: count + 1,
                oldest: oldest_of(entries),
            });
        }

        let decision = AdmitDecision {
            admitted: false,
            count,
            oldest: oldest_of(entries),
        };

        if entries.is_empty() {
            windows.remove(&storage_key);
        }

        Ok(decision)
    }

    async fn window_entries(&self, key: &RateLimitKey, window_start: f64) -> Result<Vec<f64>> {
        let windows = self.windows.lock().unwrap();
        let mut entries: Vec<f64> = windows
            .get(&key.to_string())
            .map(|entries| {
                entries
                    .iter()
                    .cloned()
                    .filter(|&ts| ts >= window_start)
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.total_cmp(b));
        Ok(entries)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<()> {
        self.windows.lock().unwrap().remove(&key.to_string());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
