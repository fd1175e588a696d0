//! Page classification heuristics
//!
//! Both checks are case-sensitive substring tests over the response body.

/// Substrings that mark a listing page as a logged-out page
pub const SESSION_EXPIRED_MARKERS: &[&str] = &["login", "sign_in"];

/// Substrings that mark a bump response as blocked
pub const BLOCKED_MARKERS: &[&str] = &["blocked", "Attention Required"];

/// Verdict on a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    Ok,
    SessionExpired,
    Blocked,
}

/// Judge a listing page: does it look like the session is gone?
pub fn classify_listing(body: &str) -> PageVerdict {
    if contains_any(body, SESSION_EXPIRED_MARKERS) {
        PageVerdict::SessionExpired
    } else {
        PageVerdict::Ok
    }
}

/// Judge a bump response body
pub fn classify_bump(body: &str) -> PageVerdict {
    if contains_any(body, BLOCKED_MARKERS) {
        PageVerdict::Blocked
    } else {
        PageVerdict::Ok
    }
}

fn contains_any(body: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| body.contains(marker))
}
