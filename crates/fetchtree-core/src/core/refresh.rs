use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{FetchError, Result};

static META_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<meta\b[^>]*>").expect("meta tag pattern")
});

static HTTP_EQUIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)http-equiv\s*=\s*["']?\s*refresh\b"#).expect("http-equiv pattern")
});

static CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)content\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("content pattern")
});

static TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*\d*(?:\.\d*)?\s*[;,]\s*(?:url\s*=\s*)?["']?([^"']+?)["']?\s*$"#)
        .expect("refresh target pattern")
});

/// Finds the target of the first `<meta http-equiv="refresh">` tag in `html`.
///
/// Tags whose content carries only a delay (a plain reload) are skipped.
pub fn find_meta_refresh(html: &str) -> Option<String> {
    META_TAG
        .find_iter(html)
        .map(|tag| tag.as_str())
        .filter(|tag| HTTP_EQUIV.is_match(tag))
        .find_map(|tag| {
            let content = CONTENT.captures(tag)?;
            let value = content.get(1).or(content.get(2)).or(content.get(3))?.as_str();
            let target = TARGET.captures(value)?.get(1)?.as_str().trim();
            (!target.is_empty()).then(|| target.to_string())
        })
}

/// Resolves a refresh target against the page it came from.
pub fn resolve_refresh(base: Option<&str>, target: &str) -> Result<Url> {
    let invalid = |e: url::ParseError| FetchError::InvalidUrl(format!("{target}: {e}"));
    match base {
        Some(base) => {
            let base =
                Url::parse(base).map_err(|e| FetchError::InvalidUrl(format!("{base}: {e}")))?;
            base.join(target).map_err(invalid)
        }
        None => Url::parse(target).map_err(invalid),
    }
}
