use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Key guarding the admin routes. With no key configured every admin call is refused.
#[derive(Debug, Clone, Default)]
pub struct AdminKey(pub Option<Arc<str>>);

impl AdminKey {
    pub fn new(key: Option<String>) -> Self {
        Self(key.map(Arc::from))
    }

    fn accepts(&self, presented: &str) -> bool {
        let Some(expected) = self.0.as_deref() else {
            return false;
        };
        let token = presented.strip_prefix("Bearer ").unwrap_or(presented);
        constant_time_eq(token.as_bytes(), expected.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn admin_auth(
    State(key): State<AdminKey>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if key.accepts(auth) => Ok(next.run(req).await),
        _ => {
            tracing::warn!(uri = %req.uri(), "admin request rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn app(key: Option<&str>) -> Router {
        Router::new()
            .route("/admin/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                AdminKey::new(key.map(str::to_string)),
                admin_auth,
            ))
    }

    async fn status_for(key: Option<&str>, header: Option<&str>) -> StatusCode {
        let mut builder = axum::http::Request::builder().uri("/admin/ping");
        if let Some(header) = header {
            builder = builder.header("Authorization", header);
        }
        app(key)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_bearer_key_is_accepted() {
        assert_eq!(status_for(Some("s3cret"), Some("Bearer s3cret")).await, StatusCode::OK);
        assert_eq!(status_for(Some("s3cret"), Some("s3cret")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_or_missing_key_is_rejected() {
        assert_eq!(
            status_for(Some("s3cret"), Some("Bearer nope")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(Some("s3cret"), None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_key_refuses_everything() {
        assert_eq!(status_for(None, Some("Bearer ")).await, StatusCode::UNAUTHORIZED);
    }
}
