//! Bump engine
//!
//! Walks every tenant in store order and re-surfaces the posts of each eligible one,
//! reusing the session cookies captured by the proxy. Tenants and posts are handled
//! strictly one after another; runs never overlap.

use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::bump::classify::{self, PageVerdict};
use crate::bump::extract;
use crate::clock::Clock;
use crate::config::{BumpConfig, SiteConfig};
use crate::error::Result;
use crate::models::{
    BumpOutcome, BumpOutcomeKind, BumpRunReport, Eligibility, FetchRequest, TenantPatch,
    TenantRecord,
};
use crate::proxy::cookies;
use crate::proxy::fetcher::UpstreamFetcher;
use crate::repository::{TenantCache, TenantStore};

pub struct BumpEngine {
    config: BumpConfig,
    site: SiteConfig,
    rental_offset: FixedOffset,
    store: Arc<dyn TenantStore>,
    cache: Arc<TenantCache>,
    fetcher: Arc<dyn UpstreamFetcher>,
    clock: Arc<dyn Clock>,
    run_lock: Mutex<()>,
}

impl BumpEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BumpConfig,
        site: SiteConfig,
        rental_offset: FixedOffset,
        store: Arc<dyn TenantStore>,
        cache: Arc<TenantCache>,
        fetcher: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            site,
            rental_offset,
            store,
            cache,
            fetcher,
            clock,
            run_lock: Mutex::new(()),
        }
    }

    /// Run one pass over all tenants
    ///
    /// A run-level failure is reported in `error` next to the outcomes gathered so far.
    pub async fn run(&self) -> BumpRunReport {
        let mut results = Vec::new();
        let error = match self.run_into(&mut results).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Bump run aborted: {}", e);
                Some(e.to_string())
            }
        };

        BumpRunReport {
            timestamp: self.clock.now(),
            results,
            error,
        }
    }

    /// Run one pass, appending each reported outcome to `results` as it is produced
    #[instrument(skip(self, results))]
    pub async fn run_into(&self, results: &mut Vec<BumpOutcome>) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        let listing_url = self.site.listing_url()?;
        let tenants = self.store.all_tenants().await?;
        info!(tenants = tenants.len(), "Starting bump run");

        for (tenant_id, record) in &tenants {
            let name = record.display_name(tenant_id).to_string();
            let eligibility = record.bump_eligibility(
                self.clock.now(),
                self.rental_offset,
                self.config.cookie_max_age,
            );

            let outcome = match eligibility {
                e if e.is_silent() => {
                    debug!(tenant = %tenant_id, eligibility = ?e, "Skipping tenant");
                    continue;
                }
                Eligibility::Paused => BumpOutcome::skipped(
                    tenant_id,
                    name,
                    BumpOutcomeKind::Paused,
                    "Robot is paused",
                ),
                Eligibility::MissingCookies => BumpOutcome::skipped(
                    tenant_id,
                    name,
                    BumpOutcomeKind::MissingCookies,
                    "No stored session; log in through the proxy first",
                ),
                Eligibility::CookiesStale => BumpOutcome::skipped(
                    tenant_id,
                    name,
                    BumpOutcomeKind::CookiesStale,
                    format!(
                        "Stored session is older than {} days",
                        self.config.cookie_max_age.num_days()
                    ),
                ),
                _ => {
                    let outcome = self.bump_tenant(tenant_id, record, &listing_url).await;
                    results.push(outcome);
                    tokio::time::sleep(self.config.tenant_delay).await;
                    continue;
                }
            };

            results.push(outcome);
        }

        let bumped = results.iter().filter(|r| r.success).count();
        info!(
            reported = results.len(),
            bumped, "Bump run finished"
        );
        Ok(())
    }

    /// Bump every post of one eligible tenant
    #[instrument(skip(self, record, listing_url), fields(tenant = %tenant_id))]
    async fn bump_tenant(
        &self,
        tenant_id: &str,
        record: &TenantRecord,
        listing_url: &Url,
    ) -> BumpOutcome {
        let name = record.display_name(tenant_id).to_string();
        let user_agent = record.user_agent();
        let mut cookie_header = record.stored_cookies().unwrap_or_default().to_string();

        let session_expired = |message: String| {
            BumpOutcome::skipped(
                tenant_id,
                name.clone(),
                BumpOutcomeKind::SessionExpired,
                message,
            )
        };

        let request = FetchRequest::get(listing_url.clone(), cookie_header.as_str(), user_agent)
            .via(record.upstream_proxy.clone());
        let page = match self.fetcher.fetch(request).await {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                return session_expired(format!("Listing page returned {}", page.status))
            }
            Err(e) => {
                warn!("Listing fetch failed: {}", e);
                return session_expired(format!("Listing page unreachable: {}", e));
            }
        };

        let body = page.text();
        if classify::classify_listing(&body) == PageVerdict::SessionExpired {
            return session_expired(
                "Session expired; log in again through the proxy".to_string(),
            );
        }

        if !page.set_cookies.is_empty() {
            cookie_header = cookies::merge(&cookie_header, &page.set_cookies);
            self.persist_cookies(tenant_id, &cookie_header).await;
        }

        if let Some(phone) = extract::phone_number(&body) {
            if record.phone_number.as_deref() != Some(phone.as_str()) {
                self.report_phone(tenant_id, phone);
            }
        }

        let post_ids = extract::post_ids(&body);
        if post_ids.is_empty() {
            return BumpOutcome::skipped(
                tenant_id,
                name,
                BumpOutcomeKind::NoPosts,
                "No posts found on the listing page",
            );
        }
        debug!(posts = post_ids.len(), "Found posts");

        let mut bumped = 0;
        for (index, post_id) in post_ids.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.post_delay).await;
            }

            let url = match self.site.bump_url(post_id) {
                Ok(url) => url,
                Err(e) => {
                    warn!(post = %post_id, "Invalid bump URL: {}", e);
                    continue;
                }
            };

            let request = FetchRequest::get(url, cookie_header.as_str(), user_agent)
                .via(record.upstream_proxy.clone())
                .with_referer(listing_url.as_str());

            match self.fetcher.fetch(request).await {
                Ok(response) => {
                    if !response.set_cookies.is_empty() {
                        cookie_header = cookies::merge(&cookie_header, &response.set_cookies);
                        self.persist_cookies(tenant_id, &cookie_header).await;
                    }

                    let verdict = classify::classify_bump(&response.text());
                    if response.is_success() && verdict == PageVerdict::Ok {
                        bumped += 1;
                        debug!(post = %post_id, "Bumped post");
                    } else {
                        warn!(
                            post = %post_id,
                            status = response.status.as_u16(),
                            blocked = verdict == PageVerdict::Blocked,
                            "Bump rejected"
                        );
                    }
                }
                Err(e) => warn!(post = %post_id, "Bump request failed: {}", e),
            }
        }

        info!(found = post_ids.len(), bumped, "Tenant bumped");
        BumpOutcome::finished(tenant_id, name, post_ids.len(), bumped)
    }

    /// Store the working cookie jar; failures are logged and ignored
    async fn persist_cookies(&self, tenant_id: &str, cookie_header: &str) {
        let patch = TenantPatch::cookies(
            cookie_header.to_string(),
            self.clock.now().timestamp_millis(),
        );
        match self.store.patch_tenant(tenant_id, &patch).await {
            Ok(()) => self.cache.invalidate(tenant_id),
            Err(e) => warn!(tenant = %tenant_id, "Failed to persist cookies: {}", e),
        }
    }

    fn report_phone(&self, tenant_id: &str, phone: String) {
        let store = self.store.clone();
        let cache = self.cache.clone();
        let tenant_id = tenant_id.to_string();

        tokio::spawn(async move {
            match store.patch_tenant(&tenant_id, &TenantPatch::phone(phone)).await {
                Ok(()) => cache.invalidate(&tenant_id),
                Err(e) => warn!(tenant = %tenant_id, "Failed to store phone number: {}", e),
            }
        });
    }
}
