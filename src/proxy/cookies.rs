//! Cookie jar merging and client-facing Set-Cookie rewriting

use std::collections::BTreeMap;

/// Attributes that would stop the browser from storing the cookie on the proxy host
const STRIPPED_ATTRIBUTES: &[&str] = &["domain", "secure", "samesite"];

/// Merge `Set-Cookie` values into an existing `Cookie` header
///
/// Later values overwrite earlier ones by name. The result is ordered by cookie name,
/// so merging in steps gives the same header as merging everything at once.
pub fn merge<S: AsRef<str>>(existing: &str, set_cookies: &[S]) -> String {
    let mut jar: BTreeMap<String, String> = BTreeMap::new();

    for pair in existing.split(';') {
        if let Some((name, value)) = split_pair(pair) {
            jar.insert(name, value);
        }
    }

    for set_cookie in set_cookies {
        let first = set_cookie.as_ref().split(';').next().unwrap_or_default();
        if let Some((name, value)) = split_pair(first) {
            jar.insert(name, value);
        }
    }

    serialize(&jar)
}

/// Merge two `Cookie` headers, `overrides` winning on conflicts
pub fn merge_headers(base: &str, overrides: &str) -> String {
    let overrides: Vec<&str> = overrides.split(';').collect();
    merge(base, &overrides)
}

/// Rewrite an upstream `Set-Cookie` so the browser keeps it for the proxy origin
pub fn client_set_cookie(value: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for (index, part) in value.split(';').enumerate() {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if index > 0 {
            let name = part.split('=').next().unwrap_or_default().trim();
            if STRIPPED_ATTRIBUTES
                .iter()
                .any(|attr| name.eq_ignore_ascii_case(attr))
            {
                continue;
            }
        }
        parts.push(part);
    }

    parts.push("SameSite=Lax");
    parts.join("; ")
}

fn split_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

fn serialize(jar: &BTreeMap<String, String>) -> String {
    jar.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}
