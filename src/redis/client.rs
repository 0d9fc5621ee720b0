use crate::{config::RedisConfig, errors::AppError, errors::Result};
use redis::{aio::ConnectionManager, Client};
use std::time::Duration;

/// Create a Redis client and connection manager
pub async fn create_client(config: &RedisConfig) -> Result<ConnectionManager> {
    tracing::info!(url = %config.url, "Creating Redis client");

    let client = Client::open(config.url.as_str())?;

    let connect = ConnectionManager::new(client);
    let manager = tokio::time::timeout(
        Duration::from_secs(config.connection_timeout_seconds),
        connect,
    )
    .await
    .map_err(|_| {
        AppError::Internal(format!(
            "Redis connection timed out after {}s",
            config.connection_timeout_seconds
        ))
    })??;

    tracing::info!("Redis client connected");

    Ok(manager)
}

/// Health check for Redis connection
pub async fn health_check(manager: &mut ConnectionManager) -> Result<()> {
    let _: String = redis::cmd("PING").query_async(manager).await?;
    Ok(())
}
