// ABOUTME: Bearer token authentication middleware for the agentdeck API.
// ABOUTME: Guards /entities and everything under it; /health stays open for probes.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

const PROTECTED_PREFIX: &str = "/entities";

/// A tower Layer that applies bearer token authentication to entity routes.
#[derive(Clone)]
pub struct AuthLayer {
    token: Arc<String>,
}

impl AuthLayer {
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(token),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            token: Arc::clone(&self.token),
        }
    }
}

/// The middleware service that checks bearer tokens on /entities routes.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    token: Arc<String>,
}

fn is_protected(path: &str) -> bool {
    path == PROTECTED_PREFIX
        || path
            .strip_prefix(PROTECTED_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn unauthorized() -> Response<Body> {
    let mut resp = Response::new(Body::from(r#"{"error":"unauthorized"}"#));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    resp
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if !is_protected(req.uri().path()) {
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await });
        }

        let authorized = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == self.token.as_str());

        if authorized {
            let mut inner = self.inner.clone();
            Box::pin(async move { inner.call(req).await })
        } else {
            tracing::warn!(path = %req.uri().path(), "rejected unauthenticated request");
            Box::pin(async move { Ok(unauthorized()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;

    fn test_router() -> Router {
        Router::new()
            .route("/entities/{kind}", get(|| async { "entities" }))
            .route("/entitiesfoo", get(|| async { "lookalike" }))
            .route("/health", get(|| async { "ok" }))
            .layer(AuthLayer::new("test-token-123".to_string()))
    }

    async fn status(app: Router, req: Request<Body>) -> StatusCode {
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn auth_middleware_rejects_without_token() {
        let req = Request::get("/entities/agent").body(Body::empty()).unwrap();
        assert_eq!(status(test_router(), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_middleware_allows_with_valid_token() {
        let req = Request::get("/entities/agent")
            .header("authorization", "Bearer test-token-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(test_router(), req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_middleware_rejects_with_wrong_token() {
        let req = Request::get("/entities/agent")
            .header("authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(test_router(), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_middleware_exempts_health_and_lookalikes() {
        let req = Request::get("/health").body(Body::empty()).unwrap();
        assert_eq!(status(test_router(), req).await, StatusCode::OK);

        let req = Request::get("/entitiesfoo").body(Body::empty()).unwrap();
        assert_eq!(status(test_router(), req).await, StatusCode::OK);
    }
}
