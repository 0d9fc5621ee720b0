use crate::config::RateLimitConfig;
use crate::errors::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;

/// A named rate limit policy
///
/// Policies are created once from configuration at process start and never
/// mutated at runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitPolicy {
    pub name: String,
    pub request_limit: u64,
    pub window_seconds: u64,
    pub description: String,
    /// Endpoint or role tags this policy applies to
    pub applies_to: Vec<String>,
}

/// Immutable registry of rate limit policies, built once at startup
pub struct PolicyRegistry {
    policies: Vec<RateLimitPolicy>,
    by_name: HashMap<String, usize>,
}

impl PolicyRegistry {
    /// Build the registry from validated configuration
    ///
    /// Rejects duplicate policy names and non-positive limits or windows.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        config.validate()?;

        let mut policies = Vec::with_capacity(config.policies.len());
        let mut by_name = HashMap::with_capacity(config.policies.len());

        for entry in &config.policies {
            if by_name.contains_key(&entry.name) {
                return Err(AppError::Configuration(format!(
                    "Duplicate policy name: {}",
                    entry.name
                )));
            }

            by_name.insert(entry.name.clone(), policies.len());
            policies.push(RateLimitPolicy {
                name: entry.name.clone(),
                request_limit: entry.request_limit,
                window_seconds: entry.window_seconds,
                description: entry.description.clone(),
                applies_to: entry.applies_to.clone(),
            });
        }

        Ok(Self { policies, by_name })
    }

    /// Look up a policy by name
    pub fn get(&self, name: &str) -> Option<&RateLimitPolicy> {
        self.by_name.get(name).map(|&i| &self.policies[i])
    }

    /// Resolve a policy by name, falling back to `applies_to` tag matching
    ///
    /// Tag matches are evaluated in declaration order.
    pub fn resolve(&self, policy_or_endpoint: &str) -> Option<&RateLimitPolicy> {
        if let Some(policy) = self.get(policy_or_endpoint) {
            return Some(policy);
        }

        self.policies
            .iter()
            .find(|p| p.applies_to.iter().any(|tag| tag == policy_or_endpoint))
    }

    /// All registered policies, in declaration order
    pub fn policies(&self) -> &[RateLimitPolicy] {
        &self.policies
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
