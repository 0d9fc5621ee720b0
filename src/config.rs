use crate::errors::{AppError, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: Option<RedisConfig>,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    pub connection_timeout_seconds: u64,
}

/// Behavior when the shared store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit traffic while the store is down
    Open,
    /// Deny traffic while the store is down
    Closed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_window_seconds: u64,
    pub fail_mode: FailMode,
    pub breaker_threshold: u32,
    pub breaker_cooldown_seconds: u64,
    pub middleware_policy: Option<String>,
    pub policies: Vec<PolicyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub request_limit: u64,
    pub window_seconds: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub applies_to: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Determine environment
        let environment = env::var("QUOTA_GATE_ENV").unwrap_or_else(|_| "development".to_string());

        // Build configuration
        let config = config::Config::builder()
            // Start with default config
            .add_source(config::File::with_name("config/default"))
            // Add environment-specific config
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // Add environment variables with prefix QUOTA_GATE
            // e.g., QUOTA_GATE__SERVER__PORT=8080
            .add_source(
                config::Environment::with_prefix("QUOTA_GATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        // Deserialize into our Config struct
        config
            .try_deserialize()
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        // Validate Redis config
        if let Some(redis) = &self.redis {
            if redis.url.is_empty() {
                return Err(AppError::Configuration(
                    "Redis URL is required when the redis section is present".to_string(),
                ));
            }
        }

        self.rate_limit.validate()
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration at load time
    pub fn validate(&self) -> Result<()> {
        if self.default_window_seconds == 0 {
            return Err(AppError::Configuration(
                "Default window size must be at least 1 second".to_string(),
            ));
        }

        for policy in &self.policies {
            if policy.name.is_empty() {
                return Err(AppError::Configuration(
                    "Policy name must not be empty".to_string(),
                ));
            }
            if policy.request_limit == 0 {
                return Err(AppError::Configuration(format!(
                    "Policy '{}' has a zero request limit",
                    policy.name
                )));
            }
            if policy.window_seconds == 0 {
                return Err(AppError::Configuration(format!(
                    "Policy '{}' has a zero window size",
                    policy.name
                )));
            }
        }

        if let Some(name) = &self.middleware_policy {
            if !self.policies.iter().any(|p| &p.name == name) {
                return Err(AppError::Configuration(format!(
                    "Middleware policy '{}' is not defined",
                    name
                )));
            }
        }

        Ok(())
    }
}
