use chrono::{DateTime, Utc};
use serde::Serialize;

/// Machine-readable result category of one tenant in a bump run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BumpOutcomeKind {
    Bumped,
    Paused,
    MissingCookies,
    CookiesStale,
    SessionExpired,
    NoPosts,
    BumpFailed,
}

/// Per-tenant entry of a bump run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BumpOutcome {
    pub tenant: String,
    pub name: String,
    pub success: bool,
    pub kind: BumpOutcomeKind,
    pub message: String,
    pub posts_found: usize,
    pub bumped: usize,
}

impl BumpOutcome {
    /// Outcome for a tenant that was never fetched
    pub fn skipped(
        tenant: impl Into<String>,
        name: impl Into<String>,
        kind: BumpOutcomeKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            name: name.into(),
            success: false,
            kind,
            message: message.into(),
            posts_found: 0,
            bumped: 0,
        }
    }

    /// Outcome after bumping `bumped` of `posts_found` posts
    pub fn finished(
        tenant: impl Into<String>,
        name: impl Into<String>,
        posts_found: usize,
        bumped: usize,
    ) -> Self {
        let (kind, success) = if bumped > 0 {
            (BumpOutcomeKind::Bumped, true)
        } else {
            (BumpOutcomeKind::BumpFailed, false)
        };

        Self {
            tenant: tenant.into(),
            name: name.into(),
            success,
            kind,
            message: format!("Bumped {} of {} posts", bumped, posts_found),
            posts_found,
            bumped,
        }
    }
}

/// Response body of the batch trigger
#[derive(Debug, Clone, Serialize)]
pub struct BumpRunReport {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<BumpOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
