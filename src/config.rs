use crate::error::{Result, RentError};
use chrono::FixedOffset;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Reverse proxy configuration
    pub proxy: ProxyConfig,
    /// Tenant store configuration
    pub store: StoreConfig,
    /// Upstream classifieds site
    pub site: SiteConfig,
    /// Bump engine configuration
    pub bump: BumpConfig,
    /// Admin credentials
    pub admin: AdminConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: 8080)
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Path of the proxy entry point (default: /proxy)
    pub entry_path: String,
    /// Whole-request deadline for one upstream fetch, redirects included
    pub request_timeout: Duration,
    /// Maximum redirects followed per fetch
    pub max_redirects: u32,
    /// How long a tenant record may be served from cache
    pub tenant_cache_ttl: Duration,
    /// Link for the injected support button
    pub support_url: Option<String>,
    /// Offset of the timezone rental end dates are expressed in
    pub rental_offset: FixedOffset,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the tenant store REST API
    pub base_url: Url,
    /// Collection holding tenant records
    pub collection: String,
    /// Optional auth token appended as `?auth=`
    pub auth: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Origin of the classifieds site, e.g. https://www.example.com
    pub origin: Url,
    /// Path of the tenant's own post listing page
    pub listing_path: String,
    /// Path template of the bump endpoint; `{id}` is replaced by the post id
    pub bump_path: String,
}

#[derive(Debug, Clone)]
pub struct BumpConfig {
    /// Shared secret for the batch trigger endpoint
    pub secret: String,
    /// Delay between posts of one tenant
    pub post_delay: Duration,
    /// Delay between tenants
    pub tenant_delay: Duration,
    /// Maximum age of stored session cookies
    pub cookie_max_age: chrono::Duration,
    /// In-process run interval; zero disables the scheduler
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Shared secret for the admin/state endpoint
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: get_env_or("SERVER_HOST", "0.0.0.0"),
                port: parse_env("SERVER_PORT", "8080")?,
            },
            proxy: ProxyConfig {
                entry_path: parse_entry_path(&get_env_or("PROXY_ENTRY_PATH", "/proxy"))?,
                request_timeout: Duration::from_secs(parse_env("PROXY_REQUEST_TIMEOUT", "25")?),
                max_redirects: parse_env("PROXY_MAX_REDIRECTS", "10")?,
                tenant_cache_ttl: Duration::from_secs(parse_env("TENANT_CACHE_TTL", "30")?),
                support_url: get_env_opt("SUPPORT_URL"),
                rental_offset: parse_offset(parse_env("RENTAL_UTC_OFFSET_MINUTES", "0")?)?,
            },
            store: StoreConfig {
                base_url: parse_url("STORE_URL", &get_env_or("STORE_URL", "http://127.0.0.1:9000"))?,
                collection: get_env_or("STORE_COLLECTION", "tenants"),
                auth: get_env_opt("STORE_AUTH"),
            },
            site: SiteConfig {
                origin: parse_url("SITE_ORIGIN", &get_env_or("SITE_ORIGIN", "https://www.example.com"))?,
                listing_path: get_env_or("SITE_LISTING_PATH", "/users/posts"),
                bump_path: get_env_or("SITE_BUMP_PATH", "/users/posts/bump/{id}"),
            },
            bump: BumpConfig {
                secret: get_env_or("BUMP_SECRET", ""),
                post_delay: Duration::from_millis(parse_env("BUMP_POST_DELAY_MS", "1500")?),
                tenant_delay: Duration::from_millis(parse_env("BUMP_TENANT_DELAY_MS", "2000")?),
                cookie_max_age: chrono::Duration::days(parse_env("BUMP_COOKIE_MAX_AGE_DAYS", "7")?),
                interval: Duration::from_secs(parse_env("BUMP_INTERVAL_SECS", "0")?),
            },
            admin: AdminConfig {
                secret: get_env_or("ADMIN_SECRET", ""),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl SiteConfig {
    /// Absolute URL of the post listing page
    pub fn listing_url(&self) -> Result<Url> {
        Ok(self.origin.join(&self.listing_path)?)
    }

    /// Absolute URL of the bump endpoint for one post
    pub fn bump_url(&self, post_id: &str) -> Result<Url> {
        Ok(self.origin.join(&self.bump_path.replace("{id}", post_id))?)
    }
}

fn parse_entry_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !trimmed.starts_with('/') || trimmed.len() < 2 || trimmed.contains('?') {
        return Err(RentError::InvalidConfig(
            "PROXY_ENTRY_PATH must be an absolute path without query".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| RentError::InvalidConfig(format!("{} must be a valid URL: {}", key, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RentError::InvalidConfig(format!(
            "{} has unsupported scheme: {}",
            key, other
        ))),
    }
}

fn parse_offset(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
        RentError::InvalidConfig("RENTAL_UTC_OFFSET_MINUTES is out of range".into())
    })
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RentError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a non-empty environment variable
fn get_env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
