use crate::{
    api::{admin, check, health},
    observability::HealthChecker,
    rate_limit::{rate_limit_middleware, RateLimitEvaluator, RequestLimitLayer, StatisticsReporter},
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<RateLimitEvaluator>,
    pub reporter: Arc<StatisticsReporter>,
    pub health_checker: Arc<HealthChecker>,
}

pub fn create_router(
    evaluator: Arc<RateLimitEvaluator>,
    reporter: Arc<StatisticsReporter>,
    health_checker: Arc<HealthChecker>,
    middleware_policy: Option<String>,
) -> Router {
    let state = AppState {
        evaluator: evaluator.clone(),
        reporter,
        health_checker,
    };

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut v1 = v1_routes();

    // Self-protection: apply a configured policy to the service's own API
    if let Some(policy) = middleware_policy {
        let layer_state = RequestLimitLayer { evaluator, policy };
        v1 = v1.layer(middleware::from_fn_with_state(
            layer_state,
            rate_limit_middleware,
        ));
    }

    Router::new()
        // Health endpoints
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/health/startup", get(health::startup))
        .route("/metrics", get(health::metrics))
        // API v1 routes
        .nest("/v1", v1)
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/check", post(check::check))
        .route("/check/batch", post(check::check_batch))
        .route("/limits/:policy/:identifier", delete(admin::reset))
        .route(
            "/limits/:policy/:identifier/statistics",
            get(admin::statistics),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailMode, PolicyConfig, RateLimitConfig};
    use crate::rate_limit::{EvaluatorSettings, LocalWindowStore, PolicyRegistry};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = RateLimitConfig {
            enabled: true,
            default_window_seconds: 3600,
            fail_mode: FailMode::Open,
            breaker_threshold: 0,
            breaker_cooldown_seconds: 30,
            middleware_policy: None,
            policies: vec![PolicyConfig {
                name: "login".to_string(),
                request_limit: 2,
                window_seconds: 60,
                description: String::new(),
                applies_to: vec![],
            }],
        };

        let registry = Arc::new(PolicyRegistry::from_config(&config).unwrap());
        let store = Arc::new(LocalWindowStore::new());
        let evaluator = Arc::new(RateLimitEvaluator::new(
            store.clone(),
            registry.clone(),
            EvaluatorSettings::from(&config),
        ));
        let reporter = Arc::new(StatisticsReporter::new(store, registry, 3600));
        let health_checker = Arc::new(HealthChecker::new(None));

        create_router(evaluator, reporter, health_checker, None)
    }

    fn check_request(identifier: &str, policy: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/check")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(format!(
                r#"{{"identifier":"{}","policy":"{}"}}"#,
                identifier, policy
            )))
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_endpoint_allows_then_denies() {
        let router = test_router();

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(check_request("user42", "login"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(result["allowed"], true);
        }

        let response = router
            .clone()
            .oneshot(check_request("user42", "login"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["allowed"], false);
        assert_eq!(result["request_count"], 2);
        assert!(result["retry_after_seconds"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_check_unknown_policy_is_404() {
        let router = test_router();

        let response = router
            .oneshot(check_request("user42", "missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_endpoint_is_idempotent() {
        let router = test_router();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/limits/login/user42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_statistics_endpoint() {
        let router = test_router();

        router
            .clone()
            .oneshot(check_request("user42", "login"))
            .await
            .unwrap();

        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/limits/login/user42/statistics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["request_count"], 1);
        assert_eq!(stats["average_requests_per_minute"], 1.0);
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let router = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
