use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::StoreConfig;
use crate::error::{Result, RentError};
use crate::models::{TenantPatch, TenantRecord};

/// Read/patch access to tenant records
///
/// The store owns the records; this service never creates or deletes them.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Fetch one tenant, `None` if it does not exist
    async fn tenant(&self, id: &str) -> Result<Option<TenantRecord>>;

    /// Apply a partial update to one tenant
    async fn patch_tenant(&self, id: &str, patch: &TenantPatch) -> Result<()>;

    /// Fetch every tenant, keyed and ordered by id
    async fn all_tenants(&self) -> Result<BTreeMap<String, TenantRecord>>;
}

/// Tenant store spoken to over its JSON REST API
///
/// Records live at `{base}/{collection}/{id}.json`; a missing record reads as `null`.
#[derive(Debug, Clone)]
pub struct HttpTenantStore {
    config: StoreConfig,
    http: Client,
}

impl HttpTenantStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| RentError::Store(format!("Failed to build store client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn endpoint(&self, id: Option<&str>) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RentError::InvalidConfig("STORE_URL cannot be a base".into()))?;
            segments.pop_if_empty();
            match id {
                Some(id) => {
                    segments.push(&self.config.collection);
                    segments.push(&format!("{}.json", id));
                }
                None => {
                    segments.push(&format!("{}.json", self.config.collection));
                }
            }
        }

        if let Some(auth) = &self.config.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }

        Ok(url)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self.http.get(url).send().await.map_err(store_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RentError::Store(format!(
                "read failed with status {}: {}",
                status, text
            )));
        }

        response.json::<Option<T>>().await.map_err(store_error)
    }
}

#[async_trait]
impl TenantStore for HttpTenantStore {
    #[instrument(skip(self))]
    async fn tenant(&self, id: &str) -> Result<Option<TenantRecord>> {
        if id.is_empty() || id.contains(['/', '.', '#', '$', '[', ']']) {
            return Ok(None);
        }
        self.read_json(self.endpoint(Some(id))?).await
    }

    #[instrument(skip(self, patch))]
    async fn patch_tenant(&self, id: &str, patch: &TenantPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .patch(self.endpoint(Some(id))?)
            .json(patch)
            .send()
            .await
            .map_err(store_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RentError::Store(format!(
                "patch failed with status {}: {}",
                status, text
            )));
        }

        debug!(tenant = %id, "Patched tenant record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn all_tenants(&self) -> Result<BTreeMap<String, TenantRecord>> {
        let raw: BTreeMap<String, Value> = self
            .read_json(self.endpoint(None)?)
            .await?
            .unwrap_or_default();

        // One hand-edited record must not hide the others
        let mut tenants = BTreeMap::new();
        for (id, value) in raw {
            if value.is_null() {
                continue;
            }
            match serde_json::from_value::<TenantRecord>(value) {
                Ok(record) => {
                    tenants.insert(id, record);
                }
                Err(e) => warn!(tenant = %id, "Skipping undecodable tenant record: {}", e),
            }
        }

        Ok(tenants)
    }
}

fn store_error(err: reqwest::Error) -> RentError {
    RentError::Store(err.to_string())
}
