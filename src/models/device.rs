//! Device profiles used to pick the upstream user agent

/// Profile used when a tenant has none or an unknown one
pub const DEFAULT_PROFILE: &str = "windows";

const PROFILES: &[(&str, &str)] = &[
    (
        "android",
        "Mozilla/5.0 (Linux; Android 13; SM-A536B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
    ),
    (
        "iphone",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
    ),
    (
        "windows",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        "mac",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    ),
];

/// User agent for a device profile key (case-insensitive)
pub fn user_agent_for(key: Option<&str>) -> &'static str {
    let key = key.map(|k| k.trim().to_lowercase());
    let lookup = |wanted: &str| {
        PROFILES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, ua)| *ua)
    };

    key.as_deref()
        .and_then(lookup)
        .or_else(|| lookup(DEFAULT_PROFILE))
        .unwrap_or_default()
}
