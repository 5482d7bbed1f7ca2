//! Axum integration: error responses and the per-route authorization layer

use crate::error::AuthzError;
use crate::pipeline::{IncomingRequest, Pipeline};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Json, Response},
    routing::MethodRouter,
    Router,
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::error;

/// Request ID header name
pub const X_REQUEST_ID: &str = "x-request-id";

/// Forwarded client address header name
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // internal details stay in the logs
        let message = if status.is_server_error() {
            error!("Internal authorization error: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.error_code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Client address: the socket peer, else the first `X-Forwarded-For` entry
fn client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }
    forwarded_ip(request.headers())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Authorization middleware for one route
///
/// Runs the route's pipeline; on success the [`RequestContext`] is placed in
/// the request extensions for the handler.
///
/// [`RequestContext`]: crate::pipeline::RequestContext
pub async fn authorize(
    State(pipeline): State<Arc<Pipeline>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let incoming = IncomingRequest {
        method: request.method().as_str().to_string(),
        path_params: pipeline.route().extract_params(&path).unwrap_or_default(),
        path,
        authorization: header_string(request.headers(), header::AUTHORIZATION),
        client_ip: client_ip(&request),
        request_id: header_string(request.headers(), X_REQUEST_ID),
    };

    let (ctx, outcome) = pipeline.run(&incoming).await;
    let request_id = ctx.request_id;

    let mut response = match outcome {
        Ok(()) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Register a handler behind its route's pipeline
pub fn mount<S>(router: Router<S>, pipeline: Arc<Pipeline>, handler: MethodRouter<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let path = pipeline.route().axum_path();
    router.route(&path, handler.route_layer(from_fn_with_state(pipeline, authorize)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(forwarded_ip(&headers), Some("203.0.113.9".parse().unwrap()));

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("garbage"));
        assert_eq!(forwarded_ip(&headers), None);
    }

    #[test]
    fn test_error_status_mapping() {
        let response = AuthzError::Forbidden("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = AuthzError::Store("db down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
