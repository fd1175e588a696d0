//! Reverse proxy entry point

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;

use crate::api::server::AppState;
use crate::proxy::ProxyRequest;

#[derive(Debug, Default, Deserialize)]
pub struct ProxyParams {
    pub u: Option<String>,
    pub url: Option<String>,
    pub phone: Option<String>,
}

/// GET/POST {entry}?u=<tenant>&url=<target>
pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let request = ProxyRequest {
        tenant_id: params.u,
        target: params.url,
        phone: params.phone,
        method,
        body,
        content_type: header_text(header::CONTENT_TYPE),
        browser_cookies: header_text(header::COOKIE),
    };

    state.proxy.handle(request).await
}
