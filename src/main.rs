use quota_gate::{
    api::create_router,
    config::Config,
    observability::{init_tracing, HealthChecker},
    rate_limit::{
        store::unix_now, EvaluatorSettings, LocalWindowStore, PolicyRegistry, RateLimitEvaluator,
        StatisticsReporter, WindowStore,
    },
    redis::{create_client, RedisWindowStore},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability);

    tracing::info!("Starting Quota Gate service");
    tracing::info!("Configuration loaded: {:?}", config.server);

    // Build the immutable policy registry
    let registry = Arc::new(PolicyRegistry::from_config(&config.rate_limit)?);
    tracing::info!("Policy registry built ({} policies)", registry.len());

    let settings = EvaluatorSettings::from(&config.rate_limit);
    let max_window = registry
        .policies()
        .iter()
        .map(|p| p.window_seconds)
        .max()
        .unwrap_or(config.rate_limit.default_window_seconds);

    // Select the window store backend
    let (store, redis_manager): (Arc<dyn WindowStore>, _) = match &config.redis {
        Some(redis_config) => {
            let manager = create_client(redis_config).await?;
            tracing::info!("Redis connection established");
            (Arc::new(RedisWindowStore::new(manager.clone())), Some(manager))
        }
        None => {
            tracing::warn!(
                "No shared store configured: rate limit counts are per-instance only"
            );
            let local = Arc::new(LocalWindowStore::new());
            spawn_sweeper(local.clone(), max_window);
            (local, None)
        }
    };

    let mut evaluator = RateLimitEvaluator::new(store.clone(), registry.clone(), settings);

    // With a shared store, keep a local fallback behind the circuit breaker
    if redis_manager.is_some() {
        let fallback = Arc::new(LocalWindowStore::new());
        spawn_sweeper(fallback.clone(), max_window);
        evaluator = evaluator.with_local_fallback(fallback);
    }

    let evaluator = Arc::new(evaluator);
    let reporter = Arc::new(StatisticsReporter::new(
        store,
        registry,
        config.rate_limit.default_window_seconds,
    ));
    let health_checker = Arc::new(HealthChecker::new(redis_manager));

    // Create router
    let app = create_router(
        evaluator,
        reporter,
        health_checker,
        config.rate_limit.middleware_policy.clone(),
    );

    // Bind server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Quota Gate service is ready to accept requests");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

/// Periodically drop aged-out entries from an in-process store so keys
/// that are never rechecked do not accumulate
fn spawn_sweeper(store: Arc<LocalWindowStore>, max_window_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Ok(now) = unix_now() {
                store.sweep(now - (max_window_seconds * 2) as f64);
            }
        }
    });
}
