use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::device;

/// Forward proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Socks5 => "socks5h",
        }
    }
}

/// Forward proxy assigned to a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamProxy {
    pub host: String,
    #[serde(deserialize_with = "lenient_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(default)]
    pub protocol: ProxyProtocol,
}

impl UpstreamProxy {
    /// Proxy URL including credentials, in the form reqwest expects
    pub fn proxy_url(&self) -> std::result::Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(&format!(
            "{}://{}:{}",
            self.protocol.scheme(),
            self.host,
            self.port
        ))?;

        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            // set_username only fails for cannot-be-a-base URLs, which these never are
            let _ = url.set_username(user);
            let _ = url.set_password(Some(self.pass.as_deref().unwrap_or("")));
        }

        Ok(url)
    }

    /// Identity used to share one HTTP client per proxy
    pub fn cache_key(&self) -> String {
        format!(
            "{}://{}@{}:{}",
            self.protocol.scheme(),
            self.user.as_deref().unwrap_or(""),
            self.host,
            self.port
        )
    }
}

/// Classifieds site login, handed to the client for autofill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCredentials {
    pub email: String,
    pub password: String,
}

/// Tenant record as stored in the external tenant store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub rental_start: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub rental_end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_proxy: Option<UpstreamProxy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_profile_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_credentials: Option<SiteCredentials>,
}

/// Why a tenant is or is not part of a bump run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Eligibility {
    Inactive,
    Expired,
    OptedOut,
    Paused,
    MissingCookies,
    CookiesStale,
    Eligible,
}

impl Eligibility {
    /// Skips that leave no trace in the run report
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Eligibility::Inactive | Eligibility::Expired | Eligibility::OptedOut
        )
    }
}

impl TenantRecord {
    /// Name shown in the status bar
    pub fn display_name<'a>(&'a self, tenant_id: &'a str) -> &'a str {
        if self.name.trim().is_empty() {
            tenant_id
        } else {
            self.name.trim()
        }
    }

    /// Last instant of the rental window (23:59:59 of the end date)
    pub fn rental_end_at(&self, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        let end = self.rental_end?;
        let last_second = NaiveTime::from_hms_opt(23, 59, 59)?;
        offset
            .from_local_datetime(&end.and_time(last_second))
            .single()
    }

    /// True once the end-of-day of `rental_end` has passed
    pub fn is_rental_expired(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        match self.rental_end_at(offset) {
            Some(end) => end < now,
            None => false,
        }
    }

    /// Whole calendar days left in the rental, zero on the last day
    pub fn days_remaining(&self, now: DateTime<Utc>, offset: FixedOffset) -> Option<i64> {
        let end = self.rental_end?;
        let today = now.with_timezone(&offset).date_naive();
        Some((end - today).num_days())
    }

    /// Age of the stored cookie jar
    pub fn cookie_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        let stamp = DateTime::<Utc>::from_timestamp_millis(self.cookie_timestamp?)?;
        Some(now - stamp)
    }

    /// Stored cookie jar, if any
    pub fn stored_cookies(&self) -> Option<&str> {
        self.cookies.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// User agent for upstream requests
    pub fn user_agent(&self) -> &str {
        match self.custom_user_agent.as_deref().map(str::trim) {
            Some(custom) if !custom.is_empty() => custom,
            _ => device::user_agent_for(self.device_profile_key.as_deref()),
        }
    }

    /// Classify this tenant for a bump run
    pub fn bump_eligibility(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
        max_cookie_age: Duration,
    ) -> Eligibility {
        if !self.active {
            return Eligibility::Inactive;
        }
        if self.is_rental_expired(now, offset) {
            return Eligibility::Expired;
        }
        if self.robot_on == Some(false) {
            return Eligibility::OptedOut;
        }
        if self.robot_paused == Some(true) {
            return Eligibility::Paused;
        }
        if self.stored_cookies().is_none() {
            return Eligibility::MissingCookies;
        }
        match self.cookie_age(now) {
            Some(age) if age <= max_cookie_age => Eligibility::Eligible,
            _ => Eligibility::CookiesStale,
        }
    }
}

/// Partial update sent to the tenant store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    cookies: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cookie_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_paused: Option<bool>,
}

impl TenantPatch {
    /// Cookie jar update; the jar and its timestamp always travel together
    pub fn cookies(cookies: String, timestamp_ms: i64) -> Self {
        Self {
            cookies: Some(cookies),
            cookie_timestamp: Some(timestamp_ms),
            ..Self::default()
        }
    }

    pub fn phone(phone: impl Into<String>) -> Self {
        Self {
            phone_number: Some(phone.into()),
            ..Self::default()
        }
    }

    pub fn paused(paused: bool) -> Self {
        Self {
            robot_paused: Some(paused),
            ..Self::default()
        }
    }

    /// Robot state as reported by the tenant's own client
    pub fn robot_state(robot_on: Option<bool>, robot_paused: Option<bool>) -> Self {
        Self {
            robot_on,
            robot_paused,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply this patch to a local record copy
    pub fn apply_to(&self, record: &mut TenantRecord) {
        if let Some(cookies) = &self.cookies {
            record.cookies = Some(cookies.clone());
            record.cookie_timestamp = self.cookie_timestamp;
        }
        if let Some(phone) = &self.phone_number {
            record.phone_number = Some(phone.clone());
        }
        if let Some(on) = self.robot_on {
            record.robot_on = Some(on);
        }
        if let Some(paused) = self.robot_paused {
            record.robot_paused = Some(paused);
        }
    }
}

fn lenient_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    // Anything that is not a date string (numbers, objects) reads as no end date
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(|s| {
        let s = s.trim();
        s.get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }))
}

fn lenient_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
