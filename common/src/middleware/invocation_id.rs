//! Invocation ID middleware.
//!
//! Tags every invocation with an ID so log lines from the secret lookup, the
//! database session and the report can be correlated.

use axum::{
    body::Body,
    http::{header::HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the invocation ID on requests and responses.
pub static INVOCATION_ID_HEADER: HeaderName = HeaderName::from_static("x-invocation-id");

/// Request ID header set by the Lambda runtime interface emulator.
pub static LAMBDA_REQUEST_ID_HEADER: HeaderName =
    HeaderName::from_static("lambda-runtime-aws-request-id");

/// Attaches an [`InvocationId`] to the request and echoes it on the response.
///
/// An ID supplied by the caller (either header) is reused; otherwise a new
/// UUID is generated. The downstream handler runs inside an `invocation` span.
pub async fn invocation_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let invocation_id = [&INVOCATION_ID_HEADER, &LAMBDA_REQUEST_ID_HEADER]
        .into_iter()
        .find_map(|name| req.headers().get(name))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(InvocationId::from)
        .unwrap_or_default();

    req.extensions_mut().insert(invocation_id.clone());

    let span = tracing::info_span!(
        "invocation",
        invocation_id = %invocation_id,
        method = %req.method(),
        uri = %req.uri(),
    );

    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(invocation_id.as_str()) {
        response
            .headers_mut()
            .insert(INVOCATION_ID_HEADER.clone(), value);
    }

    response
}

/// Invocation ID stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InvocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(id): Extension<InvocationId>| async move { id.to_string() }),
            )
            .layer(middleware::from_fn(invocation_id_middleware))
    }

    #[tokio::test]
    async fn test_generates_id_when_absent() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let header = response.headers().get(&INVOCATION_ID_HEADER).unwrap();
        assert_eq!(header.to_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn test_reuses_lambda_request_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("lambda-runtime-aws-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(&INVOCATION_ID_HEADER).unwrap(),
            "abc-123"
        );
    }
}
