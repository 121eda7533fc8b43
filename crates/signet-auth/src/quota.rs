//! Per-organization request quotas
//!
//! Sliding-window limiter keyed by the authenticated organization, plus a
//! tower layer that must sit inside (after) one of the auth gates so the
//! organization is already known.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower::{Layer, Service};
use uuid::Uuid;

use crate::config::QuotaConfig;
use crate::error::{AuthError, AuthResult, RPC_RATE_LIMITED};
use crate::gate::{org_id, rpc_error_response};

/// Request quota limiter
#[derive(Clone)]
pub struct QuotaLimiter {
    config: QuotaConfig,
    /// Per-organization request timestamps (single-instance)
    buckets: Arc<RwLock<HashMap<Uuid, Vec<Instant>>>>,
}

impl QuotaLimiter {
    /// Create a new quota limiter
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Count a request against `org_id`, or reject it
    ///
    /// Returns the usage left after this request.
    pub async fn check(&self, org_id: Uuid) -> AuthResult<QuotaInfo> {
        if !self.config.enabled {
            return Ok(self.snapshot(0));
        }

        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let window = self.config.window;
        let requests = buckets.entry(org_id).or_default();

        // Remove expired requests (sliding window)
        requests.retain(|&t| now.duration_since(t) < window);

        if requests.len() >= self.config.requests_per_window as usize {
            let retry_after = requests
                .first()
                .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(window);
            return Err(AuthError::rate_limited(retry_after));
        }

        requests.push(now);
        let used = requests.len() as u32;
        Ok(self.snapshot(used))
    }

    fn snapshot(&self, used: u32) -> QuotaInfo {
        QuotaInfo {
            limit: self.config.requests_per_window,
            remaining: self.config.requests_per_window.saturating_sub(used),
            window: self.config.window,
        }
    }

    /// Current usage for an organization
    pub async fn info(&self, org_id: Uuid) -> QuotaInfo {
        let buckets = self.buckets.read().await;
        let now = Instant::now();
        let used = buckets
            .get(&org_id)
            .map(|requests| {
                requests
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.config.window)
                    .count() as u32
            })
            .unwrap_or(0);

        self.snapshot(used)
    }

    /// Drop organizations with no requests in the current window
    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let window = self.config.window;

        buckets.retain(|_, requests| {
            requests.retain(|&t| now.duration_since(t) < window);
            !requests.is_empty()
        });
    }

    /// Forget an organization's usage (admin function)
    pub async fn reset(&self, org_id: Uuid) {
        self.buckets.write().await.remove(&org_id);
    }
}

/// Quota usage snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaInfo {
    pub limit: u32,
    pub remaining: u32,
    pub window: Duration,
}

impl QuotaInfo {
    /// Get headers for quota info
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
        ]
    }

    fn apply(&self, response: &mut Response) {
        for (name, value) in self.to_headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
    }
}

/// Quota enforcement layer
#[derive(Clone)]
pub struct QuotaLayer {
    limiter: QuotaLimiter,
}

impl QuotaLayer {
    pub fn new(limiter: QuotaLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for QuotaLayer {
    type Service = QuotaMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        QuotaMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Quota enforcement service
#[derive(Clone)]
pub struct QuotaMiddleware<S> {
    inner: S,
    limiter: QuotaLimiter,
}

impl<S> Service<Request> for QuotaMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(org) = org_id(req.extensions()) else {
                return inner.call(req).await;
            };

            match limiter.check(org).await {
                Ok(info) => {
                    let mut response = inner.call(req).await?;
                    if limiter.is_enabled() {
                        info.apply(&mut response);
                    }
                    Ok(response)
                }
                Err(e) => {
                    tracing::warn!(org_id = %org, error = %e, "Request quota exceeded");
                    let mut response = quota_exceeded_response(&e);
                    limiter.snapshot(u32::MAX).apply(&mut response);
                    Ok(response)
                }
            }
        })
    }
}

fn quota_exceeded_response(error: &AuthError) -> Response {
    let mut response = rpc_error_response(
        StatusCode::TOO_MANY_REQUESTS,
        RPC_RATE_LIMITED,
        "Rate limit exceeded",
    );

    if let AuthError::RateLimitExceeded { retry_after } = error {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("retry-after"), value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> QuotaConfig {
        QuotaConfig {
            enabled: true,
            requests_per_window: 3,
            window: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_quota_per_org() {
        let limiter = QuotaLimiter::new(test_config());
        let org = Uuid::new_v4();

        // Should allow up to limit
        for _ in 0..3 {
            assert!(limiter.check(org).await.is_ok());
        }

        // Should reject after limit
        let result = limiter.check(org).await;
        assert!(matches!(result, Err(AuthError::RateLimitExceeded { retry_after }) if retry_after >= 1));

        // Different organization should still work
        assert!(limiter.check(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_quota() {
        let mut config = test_config();
        config.enabled = false;
        let limiter = QuotaLimiter::new(config);
        let org = Uuid::new_v4();

        for _ in 0..100 {
            assert!(limiter.check(org).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_quota_info_and_reset() {
        let limiter = QuotaLimiter::new(test_config());
        let org = Uuid::new_v4();

        let after_first = limiter.check(org).await.unwrap();
        assert_eq!(after_first.remaining, 2);
        let info = limiter.info(org).await;
        assert_eq!(info.limit, 3);
        assert_eq!(info.remaining, 2);
        assert_eq!(
            info.to_headers(),
            vec![
                ("X-RateLimit-Limit", "3".to_string()),
                ("X-RateLimit-Remaining", "2".to_string()),
            ]
        );

        for _ in 0..2 {
            limiter.check(org).await.unwrap();
        }
        assert!(limiter.check(org).await.is_err());

        limiter.reset(org).await;
        assert!(limiter.check(org).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_slides() {
        let mut config = test_config();
        config.window = Duration::from_millis(50);
        let limiter = QuotaLimiter::new(config);
        let org = Uuid::new_v4();

        for _ in 0..3 {
            limiter.check(org).await.unwrap();
        }
        assert!(limiter.check(org).await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check(org).await.is_ok());

        tokio::time::sleep(Duration::from_millis(80)).await;
        limiter.cleanup().await;
        assert!(limiter.buckets.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_middleware_sets_rate_limit_headers() {
        use crate::types::OrgId;
        use axum::body::Body;
        use tower::ServiceExt;

        let ok = tower::service_fn(|_req: Request| async {
            Ok::<_, std::convert::Infallible>(Response::new(Body::empty()))
        });
        let service = QuotaLayer::new(QuotaLimiter::new(test_config())).layer(ok);
        let org = Uuid::new_v4();
        let request = || {
            let mut req = Request::new(Body::empty());
            req.extensions_mut().insert(OrgId(org));
            req
        };

        let response = service.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "3");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "2");

        for _ in 0..2 {
            service.clone().oneshot(request()).await.unwrap();
        }
        let response = service.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");

        // Requests without an organization pass through untouched
        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    #[test]
    fn test_quota_exceeded_response() {
        let response = quota_exceeded_response(&AuthError::RateLimitExceeded { retry_after: 7 });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "7");
    }
}
