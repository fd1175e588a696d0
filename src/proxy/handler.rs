//! Rewriting reverse proxy request handler
//!
//! Resolves the tenant, checks access, fetches the upstream page through the tenant's
//! forward proxy and rewrites the response so the browser stays inside the proxy.

use std::sync::Arc;

use axum::body::Body;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::json;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::clock::Clock;
use crate::config::{ProxyConfig, SiteConfig};
use crate::error::{Result, RentError};
use crate::models::{FetchMode, FetchRequest, FetchResult, TenantPatch, TenantRecord};
use crate::proxy::fetcher::UpstreamFetcher;
use crate::proxy::inject::{self, OverlayContext};
use crate::proxy::rewrite::{self, RewriteContext};
use crate::proxy::{cookies, pages};
use crate::repository::{TenantCache, TenantStore};

/// Target value that reports a phone number instead of fetching a page
pub const PHONE_SENTINEL: &str = "__phone__";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const ASSET_CACHE_CONTROL: &str = "public, max-age=604800";

/// Time a whole proxy request may spend on tenant store reads on top of the upstream deadline
const STORE_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Upstream response headers never forwarded to the browser
const DROPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-encoding",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "strict-transport-security",
    "set-cookie",
];

/// One inbound proxy request, already taken apart by the HTTP layer
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub tenant_id: Option<String>,
    pub target: Option<String>,
    pub phone: Option<String>,
    pub method: Method,
    pub body: Bytes,
    pub content_type: Option<String>,
    /// The browser's own `Cookie` header
    pub browser_cookies: Option<String>,
}

impl ProxyRequest {
    pub fn get(tenant_id: &str, target: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            target: Some(target.to_string()),
            phone: None,
            method: Method::GET,
            body: Bytes::new(),
            content_type: None,
            browser_cookies: None,
        }
    }
}

/// How an upstream body is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Html,
    Css,
    /// Forwarded unchanged; `cacheable` assets get a long `Cache-Control`
    Passthrough { cacheable: bool },
}

impl BodyKind {
    fn classify(content_type: Option<&str>) -> Self {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            "text/html" => BodyKind::Html,
            "text/css" => BodyKind::Css,
            m => BodyKind::Passthrough {
                cacheable: !m.starts_with("text/")
                    && !m.contains("javascript")
                    && !m.contains("ecmascript"),
            },
        }
    }
}

/// Reverse proxy handler shared by all proxy requests
pub struct ProxyHandler {
    config: ProxyConfig,
    site: SiteConfig,
    store: Arc<dyn TenantStore>,
    cache: Arc<TenantCache>,
    fetcher: Arc<dyn UpstreamFetcher>,
    clock: Arc<dyn Clock>,
}

impl ProxyHandler {
    pub fn new(
        config: ProxyConfig,
        site: SiteConfig,
        store: Arc<dyn TenantStore>,
        cache: Arc<TenantCache>,
        fetcher: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            site,
            store,
            cache,
            fetcher,
            clock,
        }
    }

    /// Handle one proxy request; never fails, errors become responses
    #[instrument(skip(self, request), fields(tenant = ?request.tenant_id, method = %request.method))]
    pub async fn handle(&self, request: ProxyRequest) -> Response {
        let deadline = self.config.request_timeout + STORE_GRACE;
        let outcome = match tokio::time::timeout(deadline, self.serve(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RentError::Timeout),
        };

        match outcome {
            Ok(response) => response,
            Err(err) if err.is_access_denied() => {
                debug!("Access denied: {}", err);
                let page = pages::denial_page(&err, self.config.support_url.as_deref())
                    .unwrap_or_default();
                (StatusCode::FORBIDDEN, Html(page)).into_response()
            }
            Err(err) if err.is_client_error() => err.into_response(),
            Err(err) => {
                if err.is_transient() {
                    warn!("Upstream unavailable: {}", err);
                } else {
                    error!("Proxy request failed: {}", err);
                }
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }

    async fn serve(&self, request: ProxyRequest) -> Result<Response> {
        let tenant_id = required(request.tenant_id.as_deref(), "u")?.to_string();
        let target = required(request.target.as_deref(), "url")?.to_string();

        if target == PHONE_SENTINEL {
            self.report_phone(&tenant_id, request.phone.as_deref()).await;
            return Ok("ok".into_response());
        }

        let target = parse_target(&target)?;
        let record = self.authorize(&tenant_id).await?;

        // The stored jar wins: the browser may carry a stale or another tenant's session
        let stored = record.stored_cookies().unwrap_or_default().to_string();
        let cookie_header =
            cookies::merge_headers(request.browser_cookies.as_deref().unwrap_or(""), &stored);

        let with_body = request.method != Method::GET && request.method != Method::HEAD;
        let fetch = FetchRequest {
            url: target,
            method: request.method.clone(),
            body: with_body.then(|| request.body.clone()),
            content_type: with_body.then(|| {
                request
                    .content_type
                    .clone()
                    .unwrap_or_else(|| FORM_CONTENT_TYPE.to_string())
            }),
            cookie_header,
            user_agent: record.user_agent().to_string(),
            proxy: record.upstream_proxy.clone(),
            referer: None,
            mode: FetchMode::Interactive,
        };

        let result = self.fetcher.fetch(fetch).await?;
        debug!(
            status = result.status.as_u16(),
            url = %result.final_url,
            "Fetched upstream"
        );

        if !result.set_cookies.is_empty() {
            self.persist_cookies(&tenant_id, &stored, &result.set_cookies);
        }

        self.respond(&tenant_id, &record, result)
    }

    /// Read the tenant through the cache and check it may browse right now
    async fn authorize(&self, tenant_id: &str) -> Result<TenantRecord> {
        let store = self.store.clone();
        let record = self
            .cache
            .get_or_fetch(tenant_id, || async move { store.tenant(tenant_id).await })
            .await?
            .ok_or_else(|| RentError::UnknownTenant(tenant_id.to_string()))?;

        if !record.active {
            return Err(RentError::TenantInactive(tenant_id.to_string()));
        }

        if record.is_rental_expired(self.clock.now(), self.config.rental_offset) {
            return Err(RentError::RentalExpired {
                tenant: tenant_id.to_string(),
                end: record
                    .rental_end
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            });
        }

        Ok(record)
    }

    fn respond(&self, tenant_id: &str, record: &TenantRecord, result: FetchResult) -> Result<Response> {
        let kind = BodyKind::classify(result.content_type());
        let rewrite_ctx = RewriteContext::new(&self.config.entry_path, tenant_id, &result.final_url);

        let (body, content_type) = match kind {
            BodyKind::Html => {
                let html = rewrite::rewrite_html(&result.text(), &rewrite_ctx);
                let overlay = OverlayContext {
                    tenant_id,
                    record,
                    now: self.clock.now(),
                    offset: self.config.rental_offset,
                    proxy_entry: rewrite_ctx.entry(),
                    posts_url: self
                        .site
                        .listing_url()
                        .ok()
                        .map(|url| rewrite_ctx.wrap(url.as_str())),
                    support_url: self.config.support_url.as_deref(),
                };
                (
                    Bytes::from(inject::inject(&html, &overlay)),
                    Some(HeaderValue::from_static("text/html; charset=utf-8")),
                )
            }
            BodyKind::Css => (
                Bytes::from(rewrite::rewrite_css(&result.text(), &rewrite_ctx)),
                Some(HeaderValue::from_static("text/css; charset=utf-8")),
            ),
            BodyKind::Passthrough { .. } => (result.body.clone(), None),
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = result.status;

        let headers = response.headers_mut();
        copy_headers(&result.headers, headers);
        if let Some(content_type) = content_type {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        if kind == (BodyKind::Passthrough { cacheable: true }) {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(ASSET_CACHE_CONTROL),
            );
        }
        for set_cookie in &result.set_cookies {
            if let Ok(value) = HeaderValue::from_str(&cookies::client_set_cookie(set_cookie)) {
                headers.append(header::SET_COOKIE, value);
            }
        }

        Ok(response)
    }

    /// Merge new cookies into the stored jar in the background
    fn persist_cookies(&self, tenant_id: &str, stored: &str, set_cookies: &[String]) {
        let merged = cookies::merge(stored, set_cookies);
        let patch = TenantPatch::cookies(merged, self.clock.now().timestamp_millis());
        let store = self.store.clone();
        let cache = self.cache.clone();
        let tenant_id = tenant_id.to_string();

        tokio::spawn(async move {
            match store.patch_tenant(&tenant_id, &patch).await {
                Ok(()) => {
                    cache.invalidate(&tenant_id);
                    debug!(tenant = %tenant_id, "Persisted session cookies");
                }
                Err(e) => warn!(tenant = %tenant_id, "Failed to persist cookies: {}", e),
            }
        });
    }

    /// Store a phone number reported by the client; best effort
    async fn report_phone(&self, tenant_id: &str, phone: Option<&str>) {
        let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
            return;
        };

        let store = self.store.clone();
        let exists = self
            .cache
            .get_or_fetch(tenant_id, || async move { store.tenant(tenant_id).await })
            .await;
        if !matches!(exists, Ok(Some(_))) {
            debug!(tenant = %tenant_id, "Ignoring phone report for unknown tenant");
            return;
        }

        let patch = TenantPatch::phone(phone);
        let store = self.store.clone();
        let cache = self.cache.clone();
        let tenant_id = tenant_id.to_string();

        tokio::spawn(async move {
            match store.patch_tenant(&tenant_id, &patch).await {
                Ok(()) => cache.invalidate(&tenant_id),
                Err(e) => warn!(tenant = %tenant_id, "Failed to store phone number: {}", e),
            }
        });
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RentError::MissingParameter(name.to_string()))
}

fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(RentError::InvalidUrl(format!(
            "target must be an absolute http(s) URL: {}",
            raw
        ))),
    }
}

fn copy_headers(upstream: &HeaderMap, out: &mut HeaderMap) {
    for (name, value) in upstream {
        if is_dropped(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
}

fn is_dropped(name: &HeaderName) -> bool {
    let name = name.as_str();
    DROPPED_HEADERS.contains(&name) || name.starts_with("access-control-")
}
