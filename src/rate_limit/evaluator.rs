use crate::config::{FailMode, RateLimitConfig};
use crate::errors::{AppError, Result};
use crate::observability::MetricsRecorder;
use crate::rate_limit::local::LocalWindowStore;
use crate::rate_limit::policy::{PolicyRegistry, RateLimitPolicy};
use crate::rate_limit::store::{unix_now, AdmitDecision, RateLimitKey, WindowStore};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Result of a rate limit check
///
/// Produced fresh per check, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Number of requests counted in the current window
    pub request_count: u64,
    /// The rate limit (max requests per window)
    pub request_limit: u64,
    /// Window size in seconds
    pub window_seconds: u64,
    /// Unix timestamp when the oldest counted request ages out
    pub reset_time: u64,
    /// Seconds until a denied caller may retry; zero when allowed
    pub retry_after_seconds: u64,
    /// Policy that produced this result, suffixed `:degraded` when the
    /// verdict was synthesized during a store outage
    pub policy_name: String,
}

impl RateLimitResult {
    /// Number of requests remaining in the current window
    pub fn remaining(&self) -> u64 {
        self.request_limit.saturating_sub(self.request_count)
    }
}

/// Evaluator behavior derived from configuration
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub enabled: bool,
    pub fail_mode: FailMode,
    pub breaker_threshold: u32,
    pub breaker_cooldown_seconds: u64,
}

impl From<&RateLimitConfig> for EvaluatorSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            fail_mode: config.fail_mode,
            breaker_threshold: config.breaker_threshold,
            breaker_cooldown_seconds: config.breaker_cooldown_seconds,
        }
    }
}

/// Sliding window rate limit evaluator
///
/// One algorithm and result-shaping layer over an interchangeable window
/// store: the distributed Redis backend in normal operation, the local
/// in-process backend when none is configured or while the circuit breaker
/// is open. Store failures never propagate out of `check`; they are
/// converted into a fail-open or fail-closed verdict per configuration.
pub struct RateLimitEvaluator {
    store: Arc<dyn WindowStore>,
    fallback: Option<Arc<LocalWindowStore>>,
    registry: Arc<PolicyRegistry>,
    settings: EvaluatorSettings,
    consecutive_failures: AtomicU32,
    breaker_open_until_ms: AtomicU64,
}

impl RateLimitEvaluator {
    pub fn new(
        store: Arc<dyn WindowStore>,
        registry: Arc<PolicyRegistry>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            store,
            fallback: None,
            registry,
            settings,
            consecutive_failures: AtomicU32::new(0),
            breaker_open_until_ms: AtomicU64::new(0),
        }
    }

    /// Install a local store served while the circuit breaker is open
    pub fn with_local_fallback(mut self, fallback: Arc<LocalWindowStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Check whether a request from `identifier` is admitted under the
    /// named policy, or under the policy whose `applies_to` tags match the
    /// given endpoint
    pub async fn check(
        &self,
        identifier: &str,
        policy_or_endpoint: &str,
    ) -> Result<RateLimitResult> {
        let policy = self
            .registry
            .resolve(policy_or_endpoint)
            .ok_or_else(|| AppError::PolicyNotFound(policy_or_endpoint.to_string()))?;

        if !self.settings.enabled {
            let now = unix_now()?;
            return Ok(passthrough_result(policy, now));
        }

        self.check_policy(identifier, policy).await
    }

    /// Evaluate several policies strictly in the given order, stopping at
    /// the first denial
    ///
    /// Policies after a denial are neither evaluated nor charged a quota
    /// unit; the returned sequence contains exactly the evaluated policies.
    pub async fn check_multiple(
        &self,
        identifier: &str,
        policies: &[&str],
    ) -> Result<Vec<(String, RateLimitResult)>> {
        let mut results = Vec::with_capacity(policies.len());

        for name in policies {
            let result = self.check(identifier, name).await?;
            let allowed = result.allowed;
            results.push(((*name).to_string(), result));
            if !allowed {
                break;
            }
        }

        Ok(results)
    }

    /// Delete all recorded requests for the identifier under the policy
    ///
    /// Idempotent: resetting an empty or unknown key succeeds silently.
    pub async fn reset(&self, identifier: &str, policy_name: &str) -> Result<()> {
        let policy = self
            .registry
            .get(policy_name)
            .ok_or_else(|| AppError::PolicyNotFound(policy_name.to_string()))?;

        let key = RateLimitKey::new(identifier, &policy.name);
        self.store.reset(&key).await?;
        if let Some(fallback) = &self.fallback {
            fallback.reset(&key).await?;
        }

        MetricsRecorder::record_reset(&policy.name);
        Ok(())
    }

    async fn check_policy(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitResult> {
        let key = RateLimitKey::new(identifier, &policy.name);
        let now = unix_now()?;

        let (store, via_fallback) = self.active_store(now);

        tracing::debug!(
            key = %key,
            limit = policy.request_limit,
            window_seconds = policy.window_seconds,
            backend = store.backend_name(),
            "Checking rate limit"
        );

        let started = Instant::now();
        let outcome = store
            .check_and_admit(&key, policy.request_limit, policy.window_seconds, now)
            .await;
        MetricsRecorder::record_check_duration(
            store.backend_name(),
            started.elapsed().as_secs_f64(),
        );

        match outcome {
            Ok(decision) => {
                if !via_fallback {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                }

                let result = shape_result(policy, &decision, now);
                MetricsRecorder::record_check(&policy.name, result.allowed);

                tracing::debug!(
                    key = %key,
                    allowed = result.allowed,
                    request_count = result.request_count,
                    "Rate limit check result"
                );

                Ok(result)
            }
            Err(e) => {
                if !via_fallback {
                    self.record_store_failure(&policy.name, now);
                }

                tracing::warn!(
                    key = %key,
                    policy = %policy.name,
                    error = %e,
                    "Rate limiter degraded: window store unavailable"
                );

                match self.settings.fail_mode {
                    FailMode::Open => {
                        MetricsRecorder::record_degraded(&policy.name, "fail_open");
                        Ok(degraded_result(policy, now, true))
                    }
                    FailMode::Closed => {
                        MetricsRecorder::record_degraded(&policy.name, "fail_closed");
                        Ok(degraded_result(policy, now, false))
                    }
                }
            }
        }
    }

    /// Pick the backend for this check, honoring an open circuit breaker
    fn active_store(&self, now: f64) -> (&dyn WindowStore, bool) {
        if let Some(fallback) = &self.fallback {
            let open_until = self.breaker_open_until_ms.load(Ordering::Relaxed);
            if ((now * 1000.0) as u64) < open_until {
                return (fallback.as_ref(), true);
            }
        }
        (self.store.as_ref(), false)
    }

    fn record_store_failure(&self, policy_name: &str, now: f64) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        if self.settings.breaker_threshold == 0 || self.fallback.is_none() {
            return;
        }

        if failures >= self.settings.breaker_threshold {
            let open_until =
                (now as u64 + self.settings.breaker_cooldown_seconds) * 1000;
            self.breaker_open_until_ms
                .store(open_until, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);

            tracing::warn!(
                policy = %policy_name,
                consecutive_failures = failures,
                cooldown_seconds = self.settings.breaker_cooldown_seconds,
                "Circuit breaker opened: serving rate limits from local store"
            );
            MetricsRecorder::record_degraded(policy_name, "fallback");
        }
    }
}

fn shape_result(policy: &RateLimitPolicy, decision: &AdmitDecision, now: f64) -> RateLimitResult {
    let window = policy.window_seconds as f64;
    let reset = decision.oldest.unwrap_or(now) + window;
    let retry_after_seconds = if decision.admitted {
        0
    } else {
        (reset - now).max(0.0).ceil() as u64
    };

    RateLimitResult {
        allowed: decision.admitted,
        request_count: decision.count,
        request_limit: policy.request_limit,
        window_seconds: policy.window_seconds,
        reset_time: reset.ceil() as u64,
        retry_after_seconds,
        policy_name: policy.name.clone(),
    }
}

/// Result returned without touching the store when rate limiting is
/// globally disabled
fn passthrough_result(policy: &RateLimitPolicy, now: f64) -> RateLimitResult {
    RateLimitResult {
        allowed: true,
        request_count: 0,
        request_limit: policy.request_limit,
        window_seconds: policy.window_seconds,
        reset_time: (now + policy.window_seconds as f64).ceil() as u64,
        retry_after_seconds: 0,
        policy_name: policy.name.clone(),
    }
}

/// Verdict synthesized while the store is unreachable
fn degraded_result(policy: &RateLimitPolicy, now: f64, allowed: bool) -> RateLimitResult {
    RateLimitResult {
        allowed,
        request_count: 0,
        request_limit: policy.request_limit,
        window_seconds: policy.window_seconds,
        reset_time: (now + policy.window_seconds as f64).ceil() as u64,
        retry_after_seconds: if allowed { 0 } else { policy.window_seconds },
        policy_name: format!("{}:degraded", policy.name),
    }
}
