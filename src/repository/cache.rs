//! Short-lived tenant record cache
//!
//! One browsing session issues dozens of resource requests per page; the cache keeps
//! those from each re-reading the tenant store. Staleness up to the TTL is accepted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::TenantRecord;

#[derive(Debug, Clone)]
struct CachedTenant {
    record: TenantRecord,
    fetched_at: DateTime<Utc>,
}

/// TTL cache of tenant records keyed by tenant id
pub struct TenantCache {
    entries: DashMap<String, CachedTenant>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl TenantCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            clock,
        }
    }

    /// Return a fresh cached record or load it with `fetch`
    ///
    /// Missing tenants are not cached so a newly created record is visible at once.
    pub async fn get_or_fetch<F, Fut>(&self, id: &str, fetch: F) -> Result<Option<TenantRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<TenantRecord>>>,
    {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(id) {
            if now - entry.fetched_at < self.ttl {
                return Ok(Some(entry.record.clone()));
            }
        }

        let fetched = fetch().await?;
        match &fetched {
            Some(record) => {
                self.entries.insert(
                    id.to_string(),
                    CachedTenant {
                        record: record.clone(),
                        fetched_at: now,
                    },
                );
            }
            None => {
                self.entries.remove(id);
            }
        }

        Ok(fetched)
    }

    /// Drop one tenant so the next read goes to the store
    pub fn invalidate(&self, id: &str) {
        if self.entries.remove(id).is_some() {
            debug!(tenant = %id, "Invalidated cached tenant");
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
