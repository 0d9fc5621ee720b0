use crate::errors::AppError;
use crate::rate_limit::evaluator::{RateLimitEvaluator, RateLimitResult};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// State for the self-protecting rate limit layer: which policy the
/// service applies to its own inbound requests
#[derive(Clone)]
pub struct RequestLimitLayer {
    pub evaluator: Arc<RateLimitEvaluator>,
    pub policy: String,
}

/// Rate limiting middleware
///
/// Turns the evaluator's verdict into protocol-level behavior: 429 with a
/// `Retry-After` header on denial, `X-RateLimit-*` metadata on success.
pub async fn rate_limit_middleware(
    State(layer): State<RequestLimitLayer>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Extract identifier (user token, API key, or IP)
    let identifier = extract_identifier(request.headers());

    let result = layer.evaluator.check(&identifier, &layer.policy).await?;

    if !result.allowed {
        tracing::warn!(
            identifier = %identifier,
            policy = %result.policy_name,
            request_count = result.request_count,
            "Rate limit exceeded"
        );

        let mut response = AppError::RateLimitExceeded.into_response();
        add_rate_limit_headers(response.headers_mut(), &result);
        return Ok(response);
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(response.headers_mut(), &result);

    Ok(response)
}

/// Extract identifier from request headers
fn extract_identifier(headers: &HeaderMap) -> String {
    // Try to get user identity from auth header first
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            return format!("user:{}", auth_str.chars().take(20).collect::<String>());
        }
    }

    // Fall back to IP address
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(ip) = forwarded_for.to_str() {
            return format!("ip:{}", ip.split(',').next().unwrap_or("unknown").trim());
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return format!("ip:{}", ip);
        }
    }

    // Default identifier
    "ip:unknown".to_string()
}

/// Add rate limit headers to response
fn add_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    use axum::http::header::HeaderName;
    use axum::http::HeaderValue;

    // X-RateLimit-Limit: Maximum number of requests allowed in the window
    if let Ok(value) = HeaderValue::from_str(&result.request_limit.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
    }

    // X-RateLimit-Remaining: Number of requests remaining
    if let Ok(value) = HeaderValue::from_str(&result.remaining().to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), value);
    }

    // X-RateLimit-Reset: Unix timestamp when the rate limit resets
    if let Ok(value) = HeaderValue::from_str(&result.reset_time.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-reset"), value);
    }

    // Retry-After: Seconds until reset (only if limit exceeded)
    if !result.allowed {
        if let Ok(value) = HeaderValue::from_str(&result.retry_after_seconds.to_string()) {
            headers.insert(HeaderName::from_static("retry-after"), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_identifier_from_auth() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer test_token_12345"),
        );

        let identifier = extract_identifier(&headers);
        assert!(identifier.starts_with("user:Bearer test_token"));
    }

    #[test]
    fn test_extract_identifier_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        let identifier = extract_identifier(&headers);
        assert_eq!(identifier, "ip:192.168.1.1");
    }

    #[test]
    fn test_extract_identifier_from_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.42"));

        let identifier = extract_identifier(&headers);
        assert_eq!(identifier, "ip:203.0.113.42");
    }

    #[test]
    fn test_extract_identifier_default() {
        let headers = HeaderMap::new();
        let identifier = extract_identifier(&headers);
        assert_eq!(identifier, "ip:unknown");
    }

    #[test]
    fn test_denied_response_headers() {
        let result = RateLimitResult {
            allowed: false,
            request_count: 3,
            request_limit: 3,
            window_seconds: 60,
            reset_time: 1700000060,
            retry_after_seconds: 42,
            policy_name: "login".to_string(),
        };

        let mut headers = HeaderMap::new();
        add_rate_limit_headers(&mut headers, &result);

        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "3");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(headers.get("x-ratelimit-reset").unwrap(), "1700000060");
        assert_eq!(headers.get("retry-after").unwrap(), "42");
    }

    #[test]
    fn test_allowed_response_headers_omit_retry_after() {
        let result = RateLimitResult {
            allowed: true,
            request_count: 1,
            request_limit: 3,
            window_seconds: 60,
            reset_time: 1700000060,
            retry_after_seconds: 0,
            policy_name: "login".to_string(),
        };

        let mut headers = HeaderMap::new();
        add_rate_limit_headers(&mut headers, &result);

        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "2");
        assert!(headers.get("retry-after").is_none());
    }
}
