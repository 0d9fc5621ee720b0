use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub window_store: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub message: Option<String>,
}

pub struct HealthChecker {
    redis_manager: Option<ConnectionManager>,
}

impl HealthChecker {
    /// `redis_manager` is `None` when the service runs on the in-process
    /// window store only
    pub fn new(redis_manager: Option<ConnectionManager>) -> Self {
        Self { redis_manager }
    }

    /// Liveness check - is the service running?
    pub async fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                window_store: ComponentStatus {
                    status: "unknown".to_string(),
                    message: None,
                },
            },
        }
    }

    /// Readiness check - can the service handle requests?
    pub async fn readiness(&self) -> HealthStatus {
        let store_status = self.check_window_store().await;

        let overall_status = if store_status.status == "ok" {
            "ok"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                window_store: store_status,
            },
        }
    }

    /// Startup check - has the service finished initializing?
    pub async fn startup(&self) -> HealthStatus {
        self.readiness().await
    }

    async fn check_window_store(&self) -> ComponentStatus {
        match &self.redis_manager {
            Some(manager) => {
                let mut manager = manager.clone();
                match crate::redis::health_check(&mut manager).await {
                    Ok(_) => ComponentStatus {
                        status: "ok".to_string(),
                        message: None,
                    },
                    Err(e) => ComponentStatus {
                        status: "error".to_string(),
                        message: Some(format!("Redis check failed: {}", e)),
                    },
                }
            }
            None => ComponentStatus {
                status: "ok".to_string(),
                message: Some("In-process store: counts are per-instance".to_string()),
            },
        }
    }
}
