use crate::errors::{AppError, Result};
use crate::rate_limit::policy::PolicyRegistry;
use crate::rate_limit::store::{unix_now, RateLimitKey, WindowStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Aggregate view over a key's recorded window entries
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatistics {
    pub identifier: String,
    pub policy_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Raw recorded timestamps, unix seconds, ascending
    pub timestamps: Vec<f64>,
    pub request_count: u64,
    pub average_requests_per_minute: f64,
    pub peak_requests_per_minute: u64,
}

/// Derives occupancy, average and peak rates from raw window entries
///
/// Reads the same store the evaluator writes, independently of the hot
/// path. Corrupt persisted data is logged and reported as an empty data
/// set rather than propagated.
pub struct StatisticsReporter {
    store: Arc<dyn WindowStore>,
    registry: Arc<PolicyRegistry>,
    default_window_seconds: u64,
}

impl StatisticsReporter {
    pub fn new(
        store: Arc<dyn WindowStore>,
        registry: Arc<PolicyRegistry>,
        default_window_seconds: u64,
    ) -> Self {
        Self {
            store,
            registry,
            default_window_seconds,
        }
    }

    pub async fn report(
        &self,
        identifier: &str,
        policy_name: &str,
    ) -> Result<RateLimitStatistics> {
        let policy = self
            .registry
            .get(policy_name)
            .ok_or_else(|| AppError::PolicyNotFound(policy_name.to_string()))?;

        let key = RateLimitKey::new(identifier, &policy.name);
        let now = unix_now()?;
        let window_start = now - self.default_window_seconds as f64;

        let timestamps = match self.store.window_entries(&key, window_start).await {
            Ok(timestamps) => timestamps,
            Err(AppError::StatisticsCorrupt(msg)) => {
                tracing::warn!(
                    key = %key,
                    error = %msg,
                    "Discarding corrupt window data for statistics"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        Ok(RateLimitStatistics {
            identifier: identifier.to_string(),
            policy_name: policy.name.clone(),
            window_start: timestamp_to_datetime(window_start),
            window_end: timestamp_to_datetime(now),
            request_count: timestamps.len() as u64,
            average_requests_per_minute: average_per_minute(&timestamps),
            peak_requests_per_minute: peak_per_minute(&timestamps),
            timestamps,
        })
    }
}

fn timestamp_to_datetime(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or_default()
}

/// Requests per minute averaged over the observed span
///
/// The elapsed span is clamped to one minute so a single data point yields
/// exactly the count instead of dividing by zero.
fn average_per_minute(timestamps: &[f64]) -> f64 {
    if timestamps.is_empty() {
        return 0.0;
    }

    let elapsed_minutes = (timestamps[timestamps.len() - 1] - timestamps[0]) / 60.0;
    timestamps.len() as f64 / elapsed_minutes.max(1.0)
}

/// Maximum number of entries in any rolling one-minute sub-window
///
/// Forward scan over the sorted timestamps; both cursors only advance.
fn peak_per_minute(timestamps: &[f64]) -> u64 {
    let mut peak = 0;
    let mut end = 0;

    for start in 0..timestamps.len() {
        while end < timestamps.len() && timestamps[end] < timestamps[start] + 60.0 {
            end += 1;
        }
        peak = peak.max(end - start);
    }

    peak as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailMode, PolicyConfig, RateLimitConfig};
    use crate::rate_limit::local::LocalWindowStore;

    #[test]
    fn test_average_single_data_point_is_count() {
        assert_eq!(average_per_minute(&[100.0]), 1.0);
    }

    #[test]
    fn test_average_empty_is_zero() {
        assert_eq!(average_per_minute(&[]), 0.0);
    }

    #[test]
    fn test_average_over_span() {
        // 6 requests over 2 minutes
        let timestamps = [0.0, 20.0, 40.0, 60.0, 90.0, 120.0];
        assert_eq!(average_per_minute(&timestamps), 3.0);
    }

    #[test]
    fn test_average_sub_minute_span_clamps_to_one_minute() {
        // 4 requests in 10 seconds still reads as 4/min, not 24/min
        let timestamps = [0.0, 2.0, 5.0, 10.0];
        assert_eq!(average_per_minute(&timestamps), 4.0);
    }

    #[test]
    fn test_peak_rolling_minute() {
        // Burst of 3 within one minute, then sparse
        let timestamps = [0.0, 10.0, 50.0, 200.0, 400.0];
        assert_eq!(peak_per_minute(&timestamps), 3);
        assert_eq!(peak_per_minute(&[]), 0);
        assert_eq!(peak_per_minute(&[5.0]), 1);
    }

    #[test]
    fn test_peak_window_is_half_open() {
        // An entry exactly 60s after the start falls outside the sub-window
        let timestamps = [0.0, 59.9, 60.0];
        assert_eq!(peak_per_minute(&timestamps), 2);
    }

    fn reporter_fixture() -> (Arc<LocalWindowStore>, StatisticsReporter) {
        let config = RateLimitConfig {
            enabled: true,
            default_window_seconds: 3600,
            fail_mode: FailMode::Open,
            breaker_threshold: 0,
            breaker_cooldown_seconds: 30,
            middleware_policy: None,
            policies: vec![PolicyConfig {
                name: "reports".to_string(),
                request_limit: 100,
                window_seconds: 60,
                description: String::new(),
                applies_to: vec![],
            }],
        };
        let registry = Arc::new(PolicyRegistry::from_config(&config).unwrap());
        let store = Arc::new(LocalWindowStore::new());
        let reporter = StatisticsReporter::new(store.clone(), registry, 3600);
        (store, reporter)
    }

    #[tokio::test]
    async fn test_report_over_recorded_entries() {
        let (store, reporter) = reporter_fixture();
        let key = RateLimitKey::new("user42", "reports");

        let now = unix_now().unwrap();
        for offset in [30.0, 20.0, 10.0] {
            store
                .check_and_admit(&key, 100, 3600, now - offset)
                .await
                .unwrap();
        }

        let stats = reporter.report("user42", "reports").await.unwrap();
        assert_eq!(stats.request_count, 3);
        assert_eq!(stats.timestamps.len(), 3);
        assert!(stats.timestamps.windows(2).all(|w| w[0] <= w[1]));
        // 3 requests over 20 seconds clamps to 3/min
        assert_eq!(stats.average_requests_per_minute, 3.0);
        assert_eq!(stats.peak_requests_per_minute, 3);
        assert!(stats.window_start < stats.window_end);
    }

    #[tokio::test]
    async fn test_report_empty_key() {
        let (_store, reporter) = reporter_fixture();

        let stats = reporter.report("nobody", "reports").await.unwrap();
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.average_requests_per_minute, 0.0);
        assert_eq!(stats.peak_requests_per_minute, 0);
        assert!(stats.timestamps.is_empty());
    }

    #[tokio::test]
    async fn test_report_unknown_policy() {
        let (_store, reporter) = reporter_fixture();

        let err = reporter.report("user42", "nope").await.unwrap_err();
        assert!(matches!(err, AppError::PolicyNotFound(_)));
    }

    #[tokio::test]
    async fn test_corrupt_window_data_reads_as_empty() {
        use crate::rate_limit::store::AdmitDecision;
        use async_trait::async_trait;

        struct CorruptStore;

        #[async_trait]
        impl WindowStore for CorruptStore {
            async fn check_and_admit(
                &self,
                _key: &RateLimitKey,
                _limit: u64,
                _window_seconds: u64,
                _now: f64,
            ) -> Result<AdmitDecision> {
                unreachable!("statistics never admit")
            }

            async fn window_entries(
                &self,
                _key: &RateLimitKey,
                _window_start: f64,
            ) -> Result<Vec<f64>> {
                Err(AppError::StatisticsCorrupt("bad score".to_string()))
            }

            async fn reset(&self, _key: &RateLimitKey) -> Result<()> {
                Ok(())
            }

            fn backend_name(&self) -> &'static str {
                "corrupt"
            }
        }

        let (_store, reporter) = reporter_fixture();
        let reporter = StatisticsReporter::new(
            Arc::new(CorruptStore),
            reporter.registry.clone(),
            reporter.default_window_seconds,
        );

        let stats = reporter.report("user42", "reports").await.unwrap();
        assert_eq!(stats.request_count, 0);
        assert!(stats.timestamps.is_empty());
    }
}
