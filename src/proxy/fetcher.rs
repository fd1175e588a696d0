//! Upstream fetcher
//!
//! Performs one logical request against the classifieds site, optionally through the
//! tenant's forward proxy. Redirects are followed by hand so that every hop goes
//! through the same proxy and each hop's cookies are carried into the next one.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::{redirect, Client};
use tracing::{debug, instrument};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{Result, RentError};
use crate::models::{FetchMode, FetchRequest, FetchResult, UpstreamProxy};
use crate::proxy::cookies;

const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "es-MX,es;q=0.9,en-US;q=0.8,en;q=0.7";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const DIRECT_CLIENT_KEY: &str = "direct";

/// Performs upstream fetches
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Fetch `request.url`, following redirects
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResult>;
}

/// Configuration for the HTTP fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Deadline for the whole fetch, redirects included
    pub request_timeout: Duration,
    /// Redirects followed before giving up
    pub max_redirects: u32,
    /// TCP connect timeout per hop
    pub connect_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(25),
            max_redirects: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ProxyConfig> for FetcherConfig {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_redirects: config.max_redirects,
            ..Self::default()
        }
    }
}

/// `reqwest`-backed fetcher with one cached client per forward proxy
pub struct HttpFetcher {
    config: FetcherConfig,
    clients: DashMap<String, Client>,
}

/// State of the hop about to be sent
struct Hop {
    url: Url,
    method: Method,
    body: Option<Bytes>,
    content_type: Option<String>,
    cookie_header: String,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// Client for a proxy identity; without a proxy the client never uses system proxies
    fn client_for(&self, proxy: Option<&UpstreamProxy>) -> Result<Client> {
        let key = proxy
            .map(UpstreamProxy::cache_key)
            .unwrap_or_else(|| DIRECT_CLIENT_KEY.to_string());

        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let builder = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(self.config.connect_timeout);

        let builder = match proxy {
            Some(proxy) => {
                let proxy_url = proxy.proxy_url().map_err(|e| {
                    RentError::InvalidConfig(format!("Invalid forward proxy {}: {}", proxy.host, e))
                })?;
                let proxy = reqwest::Proxy::all(proxy_url.as_str())
                    .map_err(|e| RentError::InvalidConfig(format!("Invalid forward proxy: {}", e)))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| RentError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        debug!(client = %key, "Created upstream HTTP client");
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    async fn fetch_with_redirects(&self, request: FetchRequest) -> Result<FetchResult> {
        let client = self.client_for(request.proxy.as_ref())?;

        let mut hop = Hop {
            url: request.url.clone(),
            method: request.method.clone(),
            body: request.body.clone(),
            content_type: request.content_type.clone(),
            cookie_header: request.cookie_header.clone(),
        };
        let mut set_cookies = Vec::new();
        let mut redirects = 0u32;

        loop {
            let mut builder = client
                .request(hop.method.clone(), hop.url.clone())
                .headers(outbound_headers(&request, &hop));
            if let Some(body) = &hop.body {
                builder = builder.body(body.clone());
            }
            let response = builder.send().await?;

            let status = response.status();
            let mut headers = response.headers().clone();
            let hop_cookies: Vec<String> = headers
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect();
            headers.remove(header::SET_COOKIE);

            debug!(
                url = %hop.url,
                status = status.as_u16(),
                cookies = hop_cookies.len(),
                "Upstream hop"
            );

            let Some(next) = redirect_target(status, &headers, &hop.url) else {
                set_cookies.extend(hop_cookies);
                let body = response.bytes().await?;
                return Ok(FetchResult {
                    status,
                    headers,
                    body,
                    set_cookies,
                    final_url: hop.url,
                });
            };

            if redirects >= self.config.max_redirects {
                return Err(RentError::TooManyRedirects {
                    limit: self.config.max_redirects,
                });
            }
            redirects += 1;

            hop.cookie_header = cookies::merge(&hop.cookie_header, &hop_cookies);
            set_cookies.extend(hop_cookies);

            if matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) {
                hop.method = Method::GET;
                hop.body = None;
                hop.content_type = None;
            }
            hop.url = next;
        }
    }
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResult> {
        tokio::time::timeout(self.config.request_timeout, self.fetch_with_redirects(request))
            .await
            .map_err(|_| RentError::Timeout)?
    }
}

fn outbound_headers(request: &FetchRequest, hop: &Hop) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE),
    );
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    if let Some(host) = host_header(&hop.url) {
        headers.insert(header::HOST, host);
    }
    if let Ok(ua) = HeaderValue::from_str(&request.user_agent) {
        headers.insert(header::USER_AGENT, ua);
    }
    if !hop.cookie_header.is_empty() {
        if let Ok(cookie) = HeaderValue::from_str(&hop.cookie_header) {
            headers.insert(header::COOKIE, cookie);
        }
    }

    let mut referer = request.referer.clone();

    if let Some(body) = &hop.body {
        let content_type = hop.content_type.as_deref().unwrap_or(FORM_CONTENT_TYPE);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(FORM_CONTENT_TYPE)),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        if request.mode == FetchMode::Interactive {
            referer = Some(hop.url.to_string());
            if let Ok(origin) = HeaderValue::from_str(&hop.url.origin().ascii_serialization()) {
                headers.insert(header::ORIGIN, origin);
            }
        }
    }

    if let Some(referer) = referer.and_then(|r| HeaderValue::from_str(&r).ok()) {
        headers.insert(header::REFERER, referer);
    }

    headers
}

fn host_header(url: &Url) -> Option<HeaderValue> {
    let host = url.host_str()?;
    let value = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).ok()
}

/// Where a redirect response points, resolved against the hop URL
fn redirect_target(status: StatusCode, headers: &HeaderMap, current: &Url) -> Option<Url> {
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }

    let location = headers.get(header::LOCATION)?.to_str().ok()?.trim();
    if location.is_empty() {
        return None;
    }

    current
        .join(location)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::extract::Request;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{any, get};
    use axum::Router;
    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    use crate::models::ProxyProtocol;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn redirect(status: StatusCode, location: &str, cookie: &str) -> Response {
        (
            status,
            [
                (header::LOCATION, location.to_string()),
                (header::SET_COOKIE, cookie.to_string()),
            ],
        )
            .into_response()
    }

    fn header_text(headers: &HeaderMap, name: header::HeaderName) -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(FetcherConfig {
            request_timeout: Duration::from_secs(5),
            max_redirects: 3,
            connect_timeout: Duration::from_secs(2),
        })
    }

    fn url(addr: SocketAddr, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", addr, path)).unwrap()
    }

    #[tokio::test]
    async fn test_redirect_chain_accumulates_cookies() {
        let app = Router::new()
            .route(
                "/start",
                get(|| async { redirect(StatusCode::FOUND, "/middle", "a=1; Path=/") }),
            )
            .route(
                "/middle",
                get(|| async { redirect(StatusCode::FOUND, "end", "b=2; HttpOnly") }),
            )
            .route(
                "/end",
                get(|headers: HeaderMap| async move {
                    (
                        [(header::SET_COOKIE, "c=3")],
                        header_text(&headers, header::COOKIE),
                    )
                }),
            );
        let addr = spawn(app).await;

        let result = fetcher()
            .fetch(FetchRequest::get(url(addr, "/start"), "z=0", "test-agent"))
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(result.text(), "a=1; b=2; z=0");
        assert_eq!(
            result.set_cookies,
            vec!["a=1; Path=/", "b=2; HttpOnly", "c=3"]
        );
        assert_eq!(result.final_url.path(), "/end");
        assert!(result.headers.get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_see_other_downgrades_and_temporary_redirect_keeps_body() {
        async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> String {
            format!(
                "{} {} {}",
                method,
                header_text(&headers, header::CONTENT_TYPE),
                String::from_utf8_lossy(&body)
            )
        }

        let app = Router::new()
            .route(
                "/submit",
                any(|| async { redirect(StatusCode::SEE_OTHER, "/echo", "s=1") }),
            )
            .route(
                "/keep",
                any(|| async { redirect(StatusCode::TEMPORARY_REDIRECT, "/echo", "k=1") }),
            )
            .route("/echo", any(echo));
        let addr = spawn(app).await;
        let fetcher = fetcher();

        let mut post = FetchRequest::get(url(addr, "/submit"), "", "ua");
        post.method = Method::POST;
        post.body = Some(Bytes::from_static(b"title=hi"));
        let downgraded = fetcher.fetch(post.clone()).await.unwrap();
        assert_eq!(downgraded.text(), "GET - ");

        post.url = url(addr, "/keep");
        let kept = fetcher.fetch(post).await.unwrap();
        assert_eq!(
            kept.text(),
            "POST application/x-www-form-urlencoded title=hi"
        );
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let app = Router::new().route(
            "/loop",
            get(|| async { redirect(StatusCode::FOUND, "/loop", "n=1") }),
        );
        let addr = spawn(app).await;

        let err = fetcher()
            .fetch(FetchRequest::get(url(addr, "/loop"), "", "ua"))
            .await
            .unwrap_err();
        assert!(matches!(err, RentError::TooManyRedirects { limit: 3 }));
    }

    #[tokio::test]
    async fn test_whole_request_deadline() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "late"
            }),
        );
        let addr = spawn(app).await;

        let fetcher = HttpFetcher::new(FetcherConfig {
            request_timeout: Duration::from_millis(200),
            ..FetcherConfig::default()
        });
        let err = fetcher
            .fetch(FetchRequest::get(url(addr, "/slow"), "", "ua"))
            .await
            .unwrap_err();
        assert!(matches!(err, RentError::Timeout));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_outbound_headers() {
        let app = Router::new().route(
            "/headers",
            any(|headers: HeaderMap| async move {
                [
                    header::USER_AGENT,
                    header::ACCEPT_ENCODING,
                    header::COOKIE,
                    header::REFERER,
                    header::ORIGIN,
                ]
                .into_iter()
                .map(|name| header_text(&headers, name))
                .collect::<Vec<_>>()
                .join("|")
            }),
        );
        let addr = spawn(app).await;
        let fetcher = fetcher();
        let target = url(addr, "/headers");

        let plain = fetcher
            .fetch(FetchRequest::get(target.clone(), "", "agent/1").with_referer("https://r.example/"))
            .await
            .unwrap();
        assert_eq!(plain.text(), "agent/1|identity|-|https://r.example/|-");

        let mut interactive = FetchRequest::get(target.clone(), "sid=1", "agent/2");
        interactive.mode = FetchMode::Interactive;
        interactive.method = Method::POST;
        interactive.body = Some(Bytes::from_static(b"a=b"));
        let posted = fetcher.fetch(interactive).await.unwrap();
        assert_eq!(
            posted.text(),
            format!(
                "agent/2|identity|sid=1|{}|http://{}",
                target, addr
            )
        );
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let app = Router::new().route(
            "/gone",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        );
        let addr = spawn(app).await;

        let result = fetcher()
            .fetch(FetchRequest::get(url(addr, "/gone"), "", "ua"))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::NOT_FOUND);
        assert!(!result.is_success());
        assert_eq!(result.text(), "nope");
    }

    #[tokio::test]
    async fn test_every_hop_goes_through_forward_proxy() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let proxy_app = Router::new().fallback(move |request: Request| {
            let recorder = recorder.clone();
            async move {
                let auth = header_text(request.headers(), header::PROXY_AUTHORIZATION);
                let uri = request.uri().to_string();
                recorder.lock().push((uri.clone(), auth));
                if uri.ends_with("/start") {
                    redirect(StatusCode::FOUND, "/next", "p=1")
                } else {
                    "proxied".into_response()
                }
            }
        });
        let proxy_addr = spawn(proxy_app).await;

        let proxy = UpstreamProxy {
            host: "127.0.0.1".to_string(),
            port: proxy_addr.port(),
            user: Some("user".to_string()),
            pass: Some("pass".to_string()),
            protocol: ProxyProtocol::Http,
        };
        let request = FetchRequest::get(
            Url::parse("http://upstream.invalid/start").unwrap(),
            "",
            "ua",
        )
        .via(Some(proxy));

        let fetcher = fetcher();
        let result = fetcher.fetch(request).await.unwrap();
        assert_eq!(result.text(), "proxied");
        assert_eq!(result.final_url.as_str(), "http://upstream.invalid/next");

        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                (
                    "http://upstream.invalid/start".to_string(),
                    "Basic dXNlcjpwYXNz".to_string()
                ),
                (
                    "http://upstream.invalid/next".to_string(),
                    "Basic dXNlcjpwYXNz".to_string()
                ),
            ]
        );
        assert_eq!(fetcher.clients.len(), 1);
    }

    #[test]
    fn test_redirect_target_resolution() {
        let current = Url::parse("https://site.example/a/b").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("c?x=1"));

        assert_eq!(
            redirect_target(StatusCode::FOUND, &headers, &current)
                .unwrap()
                .as_str(),
            "https://site.example/a/c?x=1"
        );
        assert!(redirect_target(StatusCode::OK, &headers, &current).is_none());

        headers.insert(header::LOCATION, HeaderValue::from_static("javascript:void(0)"));
        assert!(redirect_target(StatusCode::FOUND, &headers, &current).is_none());
    }
}
