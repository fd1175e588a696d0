//! Fakes shared by unit tests across modules

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{header, HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use url::Url;

use crate::clock::Clock;
use crate::error::{Result, RentError};
use crate::models::{FetchRequest, FetchResult, TenantPatch, TenantRecord};
use crate::proxy::fetcher::UpstreamFetcher;
use crate::repository::TenantStore;

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc);
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at("2025-03-10T12:00:00Z")
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// In-memory tenant store that records every patch
#[derive(Debug, Default)]
pub struct MemoryTenantStore {
    tenants: Mutex<BTreeMap<String, TenantRecord>>,
    patches: Mutex<Vec<(String, TenantPatch)>>,
    fail_patches: Mutex<bool>,
    fail_reads: Mutex<bool>,
}

impl MemoryTenantStore {
    pub fn with(tenants: impl IntoIterator<Item = (&'static str, TenantRecord)>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut map = store.tenants.lock();
            for (id, record) in tenants {
                map.insert(id.to_string(), record);
            }
        }
        Arc::new(store)
    }

    pub fn get(&self, id: &str) -> Option<TenantRecord> {
        self.tenants.lock().get(id).cloned()
    }

    pub fn patches(&self) -> Vec<(String, TenantPatch)> {
        self.patches.lock().clone()
    }

    pub fn fail_patches(&self) {
        *self.fail_patches.lock() = true;
    }

    pub fn fail_reads(&self) {
        *self.fail_reads.lock() = true;
    }

    fn check_reads(&self) -> Result<()> {
        if *self.fail_reads.lock() {
            return Err(RentError::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn tenant(&self, id: &str) -> Result<Option<TenantRecord>> {
        self.check_reads()?;
        Ok(self.get(id))
    }

    async fn patch_tenant(&self, id: &str, patch: &TenantPatch) -> Result<()> {
        if *self.fail_patches.lock() {
            return Err(RentError::Store("patch rejected".to_string()));
        }
        if let Some(record) = self.tenants.lock().get_mut(id) {
            patch.apply_to(record);
        }
        self.patches.lock().push((id.to_string(), patch.clone()));
        Ok(())
    }

    async fn all_tenants(&self) -> Result<BTreeMap<String, TenantRecord>> {
        self.check_reads()?;
        Ok(self.tenants.lock().clone())
    }
}

type Responder = dyn Fn(&FetchRequest) -> Result<FetchResult> + Send + Sync;

/// Fetcher that answers from a closure and keeps every request it saw
pub struct ScriptedFetcher {
    responder: Box<Responder>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new(
        responder: impl Fn(&FetchRequest) -> Result<FetchResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl UpstreamFetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResult> {
        self.requests.lock().push(request.clone());
        (self.responder)(&request)
    }
}

/// 200 response with the given content type and body
pub fn response(url: &Url, content_type: &str, body: &str) -> FetchResult {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    FetchResult {
        status: StatusCode::OK,
        headers,
        body: Bytes::from(body.to_string()),
        set_cookies: Vec::new(),
        final_url: url.clone(),
    }
}

pub fn html(url: &Url, body: &str) -> FetchResult {
    response(url, "text/html; charset=utf-8", body)
}

/// Wait for a condition set by a spawned task
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Configuration with known secrets and no bump delays
pub fn config() -> crate::config::Config {
    use crate::config::*;
    use std::time::Duration;

    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        proxy: ProxyConfig {
            entry_path: "/proxy".to_string(),
            request_timeout: Duration::from_secs(5),
            max_redirects: 10,
            tenant_cache_ttl: Duration::from_secs(30),
            support_url: None,
            rental_offset: chrono::FixedOffset::east_opt(0).unwrap(),
        },
        store: StoreConfig {
            base_url: Url::parse("http://127.0.0.1:9").unwrap(),
            collection: "tenants".to_string(),
            auth: None,
        },
        site: SiteConfig {
            origin: Url::parse("https://site.example").unwrap(),
            listing_path: "/users/posts".to_string(),
            bump_path: "/users/posts/bump/{id}".to_string(),
        },
        bump: BumpConfig {
            secret: "bump-secret".to_string(),
            post_delay: Duration::ZERO,
            tenant_delay: Duration::ZERO,
            cookie_max_age: chrono::Duration::days(7),
            interval: Duration::ZERO,
        },
        admin: AdminConfig {
            secret: "admin-secret".to_string(),
        },
        log: LogConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}
