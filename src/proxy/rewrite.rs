//! HTML and CSS URL rewriting
//!
//! Every navigation and resource URL in a fetched page is replaced by a proxy entry URL,
//! so the browser keeps talking to this service for the whole rental session. The
//! transformation is purely textual and idempotent: anything already pointing at the
//! proxy entry is left alone.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::{form_urlencoded, Url};

/// `id` of the injected navigation script, used to detect a previous injection
const NAV_SCRIPT_ID: &str = "__rental_nav";

/// Schemes that are never routed through the proxy
const UNTOUCHED_SCHEMES: &[&str] = &["data:", "blob:", "javascript:", "mailto:", "tel:"];

#[allow(clippy::expect_used)]
static BASE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base\b[^>]*>").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static URL_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\s)(href|src|action)(\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static FORM_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<form\b[^>]*>").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static ACTION_WITH_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\saction\s*=").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static BARE_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\saction(\s|/|>)").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(<style\b[^>]*>)(.*?)(</style>)").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static STYLE_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\s)style(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#)
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static BODY_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body\s*>").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static HAS_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").expect("constant regex pattern is valid")
});

/// Where rewritten URLs point and what relative URLs resolve against
#[derive(Debug, Clone)]
pub struct RewriteContext {
    entry: String,
    marker: String,
    page: Url,
    origin: String,
}

impl RewriteContext {
    /// Context for a document fetched from `page` on behalf of `tenant_id`
    pub fn new(entry_path: &str, tenant_id: &str, page: &Url) -> Self {
        let marker = format!("{}?u=", entry_path);
        let entry = format!("{}{}&url=", marker, encode(tenant_id));
        Self {
            entry,
            marker,
            page: page.clone(),
            origin: page.origin().ascii_serialization(),
        }
    }

    /// Prefix every proxied URL starts with
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Proxy URL for an absolute upstream URL
    pub fn wrap(&self, absolute: &str) -> String {
        format!("{}{}", self.entry, encode(absolute))
    }

    /// Proxy URL for a raw attribute value, `None` when it must be left untouched
    pub fn proxied(&self, raw: &str) -> Option<String> {
        self.absolute(raw).map(|absolute| self.wrap(&absolute))
    }

    /// Absolute upstream URL for a raw attribute value
    fn absolute(&self, raw: &str) -> Option<String> {
        let value = raw.trim().replace("&amp;", "&");
        if value.is_empty() || value.starts_with('#') || value.contains(&self.marker) {
            return None;
        }

        let lower = value.to_ascii_lowercase();
        if UNTOUCHED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return None;
        }

        if value.starts_with("//") {
            return Some(format!("https:{}", value));
        }
        if HAS_SCHEME.is_match(&value) {
            return (lower.starts_with("http:") || lower.starts_with("https:")).then_some(value);
        }
        if value.starts_with('/') {
            return Some(format!("{}{}", self.origin, value));
        }

        self.page.join(&value).ok().map(String::from)
    }
}

/// Rewrite a fetched HTML document and add the navigation script
pub fn rewrite_html(html: &str, ctx: &RewriteContext) -> String {
    let html = BASE_TAG.replace_all(html, "");

    let html = STYLE_BLOCK.replace_all(&html, |caps: &Captures| {
        format!("{}{}{}", &caps[1], rewrite_css(&caps[2], ctx), &caps[3])
    });

    let html = STYLE_ATTRIBUTE.replace_all(&html, |caps: &Captures| {
        let (quote, css) = quoted(caps, 3);
        format!(
            "{}style{}{}{}{}",
            &caps[1],
            &caps[2],
            quote,
            rewrite_css(css, ctx),
            quote
        )
    });

    let html = FORM_TAG.replace_all(&html, |caps: &Captures| {
        let tag = &caps[0];
        if ACTION_WITH_VALUE.is_match(tag) {
            return tag.to_string();
        }
        let tag = BARE_ACTION.replace(tag, "${1}");
        let (head, tail) = tag.split_at(5);
        format!(
            r#"{} action="{}"{}"#,
            head,
            ctx.wrap(ctx.page.as_str()),
            tail
        )
    });

    let html = URL_ATTRIBUTE.replace_all(&html, |caps: &Captures| {
        let name = &caps[2];
        let (quote, value) = quoted(caps, 4);

        let replacement = if name.eq_ignore_ascii_case("action") && is_self_action(value) {
            Some(ctx.wrap(ctx.page.as_str()))
        } else {
            ctx.proxied(value)
        };

        match replacement {
            Some(url) => format!("{}{}{}{}{}{}", &caps[1], name, &caps[3], quote, url, quote),
            None => caps[0].to_string(),
        }
    });

    inject_nav_script(html, ctx)
}

/// Rewrite `url(...)` references in a stylesheet
pub fn rewrite_css(css: &str, ctx: &RewriteContext) -> String {
    CSS_URL
        .replace_all(css, |caps: &Captures| {
            let (quote, value) = quoted(caps, 1);
            match ctx.proxied(value) {
                Some(url) => format!("url({}{}{})", quote, url, quote),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn inject_nav_script(html: Cow<'_, str>, ctx: &RewriteContext) -> String {
    if html.contains(NAV_SCRIPT_ID) {
        return html.into_owned();
    }

    let script = nav_script(ctx);
    match BODY_CLOSE.find(&html) {
        Some(close) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..close.start()]);
            out.push_str(&script);
            out.push_str(&html[close.start()..]);
            out
        }
        None => format!("{}{}", html, script),
    }
}

/// Client script routing clicks and form submissions through the proxy
fn nav_script(ctx: &RewriteContext) -> String {
    let entry = js_string(&ctx.entry);
    let marker = js_string(&ctx.marker);
    let page = js_string(ctx.page.as_str());

    format!(
        r##"<script id="{id}">(function(){{
var ENTRY={entry},MARK={marker},PAGE={page};
function upstream(raw){{try{{var u=new URL(raw,PAGE);if(raw.indexOf(MARK)!==-1){{var inner=new URL(raw,location.href).searchParams.get("url");if(!inner)return null;u=new URL(inner);}}return(u.protocol==="http:"||u.protocol==="https:")?u:null;}}catch(e){{return null;}}}}
document.addEventListener("click",function(e){{var a=e.target&&e.target.closest?e.target.closest("a[href]"):null;if(!a)return;var raw=a.getAttribute("href")||"";if(!raw||raw.charAt(0)==="#"||raw.indexOf(MARK)!==-1)return;var u=upstream(raw);if(!u)return;e.preventDefault();location.assign(ENTRY+encodeURIComponent(u.href));}},true);
document.addEventListener("submit",function(e){{var f=e.target;if(!f||f.tagName!=="FORM")return;var raw=f.getAttribute("action")||PAGE;var get=(f.getAttribute("method")||"get").toLowerCase()==="get";if(!get&&raw.indexOf(MARK)!==-1)return;var u=upstream(raw);if(!u)return;e.preventDefault();if(get){{u.search=new URLSearchParams(new FormData(f)).toString();location.assign(ENTRY+encodeURIComponent(u.href));}}else{{f.setAttribute("action",ENTRY+encodeURIComponent(u.href));f.submit();}}}},true);
}})();</script>"##,
        id = NAV_SCRIPT_ID,
        entry = entry,
        marker = marker,
        page = page,
    )
}

/// Value of the first matched alternative at `first`, `first + 1` or `first + 2`
/// (double-quoted, single-quoted, unquoted) and the quote it used
fn quoted<'h>(caps: &Captures<'h>, first: usize) -> (&'static str, &'h str) {
    if let Some(m) = caps.get(first) {
        ("\"", m.as_str())
    } else if let Some(m) = caps.get(first + 1) {
        ("'", m.as_str())
    } else {
        ("", caps.get(first + 2).map_or("", |m| m.as_str()))
    }
}

fn is_self_action(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == "#"
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
