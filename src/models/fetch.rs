use std::borrow::Cow;
use std::sync::LazyLock;

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use http::{header, HeaderMap, Method, StatusCode};
use regex::bytes::Regex;
use url::Url;

use super::UpstreamProxy;

/// Which caller a fetch is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Browsing through the reverse proxy; POSTs carry Referer/Origin
    Interactive,
    /// Bump engine traffic; only an explicit referer is sent
    Batch,
}

/// How far into a document an in-band charset declaration is looked for
const CHARSET_SNIFF_LEN: usize = 1024;

/// `<meta charset=...>`, `<meta http-equiv content="...; charset=...">` or `@charset "..."`
#[allow(clippy::expect_used)]
static INBAND_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)(?:<meta\b[^>]*?charset\s*=\s*["']?|^@charset\s+")([a-z0-9_.:\-]+)"#)
        .expect("constant regex pattern is valid")
});

/// One logical upstream request, redirects included
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
    pub cookie_header: String,
    pub user_agent: String,
    pub proxy: Option<UpstreamProxy>,
    pub referer: Option<String>,
    pub mode: FetchMode,
}

impl FetchRequest {
    /// Plain GET with the given session
    pub fn get(url: Url, cookie_header: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url,
            method: Method::GET,
            body: None,
            content_type: None,
            cookie_header: cookie_header.into(),
            user_agent: user_agent.into(),
            proxy: None,
            referer: None,
            mode: FetchMode::Batch,
        }
    }

    pub fn via(mut self, proxy: Option<UpstreamProxy>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// Result of a fetch after all redirects were followed
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: StatusCode,
    /// Final response headers, without `Set-Cookie`
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Every `Set-Cookie` seen along the redirect chain, earliest hop first
    pub set_cookies: Vec<String>,
    /// URL of the last hop
    pub final_url: Url,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Body decoded to text
    ///
    /// A byte order mark wins, then the `charset` of the `Content-Type`, then a charset
    /// declared inside the document. Anything else is read as UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        let encoding = Encoding::for_bom(&self.body)
            .map(|(encoding, _)| encoding)
            .or_else(|| {
                self.content_type()
                    .and_then(charset_param)
                    .and_then(|label| Encoding::for_label(label.as_bytes()))
            })
            .or_else(|| inband_charset(&self.body))
            .unwrap_or(UTF_8);

        encoding.decode_with_bom_removal(&self.body).0
    }
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c: char| c == '"' || c == '\''))
            .filter(|value| !value.is_empty())
    })
}

fn inband_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(CHARSET_SNIFF_LEN)];
    let label = INBAND_CHARSET.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn result(content_type: &str, body: &[u8]) -> FetchResult {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        FetchResult {
            status: StatusCode::OK,
            headers,
            body: Bytes::copy_from_slice(body),
            set_cookies: Vec::new(),
            final_url: Url::parse("https://site.example/").unwrap(),
        }
    }

    #[test]
    fn test_text_honors_header_charset() {
        let page = result("text/html; charset=ISO-8859-1", b"<p>Se\xf1or a\xf1o</p>");
        assert_eq!(page.text(), "<p>Señor año</p>");

        let quoted = result("text/css; charset=\"windows-1252\"", b"a::after{content:'\xe9'}");
        assert_eq!(quoted.text(), "a::after{content:'é'}");
    }

    #[test]
    fn test_text_sniffs_inband_charset() {
        let meta = result(
            "text/html",
            b"<html><head><meta charset=\"iso-8859-1\"></head><body>Espa\xf1a</body></html>",
        );
        assert!(meta.text().contains("España"));

        let css = result("text/css", b"@charset \"latin1\"; p{content:'\xf1'}");
        assert!(css.text().ends_with("p{content:'ñ'}"));
    }

    #[test]
    fn test_text_defaults_to_utf8_and_strips_bom() {
        let plain = result("text/html", "<p>año</p>".as_bytes());
        assert_eq!(plain.text(), "<p>año</p>");

        let bom = result("text/html; charset=iso-8859-1", b"\xef\xbb\xbf<p>ok</p>");
        assert_eq!(bom.text(), "<p>ok</p>");
    }
}
