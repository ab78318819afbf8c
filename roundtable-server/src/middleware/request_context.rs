use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::http::error::{ApiError, AppResult};
use shared::config::server::Config;

/// Per-request values made available to handlers and the trace span.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
}

#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id or mints one, and echoes it on the response.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let header_name = state.header.clone();
    let request_id = extract_request_id(request.headers(), &header_name)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?;

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });
    request
        .headers_mut()
        .insert(header_name.clone(), header_value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(header_name, header_value);

    Ok(response)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::ServiceExt;

    fn app(config: &Config) -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(ctx): Extension<RequestContext>| async move { ctx.request_id }),
            )
            .layer(middleware::from_fn_with_state(
                RequestIdState::from_config(config),
                assign_request_id,
            ))
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed() {
        let response = app(&Config::default())
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "  abc-123 ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"abc-123");
    }

    #[tokio::test]
    async fn missing_request_id_is_generated_under_configured_header() {
        let mut config = Config::default();
        config.server.request_id_header = "x-trace".into();

        let response = app(&config)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers().get("x-trace").unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
