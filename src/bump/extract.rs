//! Post id and phone number extraction from the listing page

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Id patterns, applied in this order
#[allow(clippy::expect_used)]
static POST_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)href\s*=\s*["'][^"']*/(?:bump|edit|repost)(?:/|=|\?id=)(\d{5,})"#,
        r#"data-post-id\s*=\s*["'](\d+)["']"#,
        r#"data-id\s*=\s*["'](\d+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("constant regex pattern is valid"))
    .collect()
});

/// North American number written with separators
#[allow(clippy::expect_used)]
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\((\d{3})\)\s?|\b(\d{3})[-.\s])(\d{3})[-.\s](\d{4})\b")
        .expect("constant regex pattern is valid")
});

/// Post ids found on a listing page, deduplicated in first-seen order
pub fn post_ids(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for pattern in POST_ID_PATTERNS.iter() {
        for caps in pattern.captures_iter(html) {
            let id = &caps[1];
            if seen.insert(id.to_string()) {
                ids.push(id.to_string());
            }
        }
    }

    ids
}

/// First phone number on the page, normalized to `555-123-4567`
pub fn phone_number(html: &str) -> Option<String> {
    let caps = PHONE.captures(html)?;
    let area = caps.get(1).or_else(|| caps.get(2))?.as_str();
    Some(format!("{}-{}-{}", area, &caps[3], &caps[4]))
}
