// URL normalization and classification.
//
// Everything here is a pure function over strings: raw input in, either a
// canonical absolute http(s) URL or an empty string out. Nothing in this
// module fails loudly; unusable input simply normalizes to "".

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

pub const MANIFEST_EXTENSION: &str = ".m3u8";

/// Query keys that commonly carry a nested manifest URL on player wrappers.
pub const NESTED_URL_KEYS: [&str; 4] = ["url", "v", "source", "src"];

/// Path extensions that never make a useful page candidate.
const BLOCKED_PAGE_EXTENSIONS: [&str; 19] = [
    "ts", "m4s", "mp4", "mp3", "mkv", "jpg", "jpeg", "png", "gif", "svg", "webp", "css", "js",
    "json", "xml", "txt", "ico", "woff", "woff2",
];

static MANIFEST_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[^/?#]+\.m3u8").unwrap());
static PATH_EXTENSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([a-z0-9]{1,8})$").unwrap());

/// Canonicalize `raw` into an absolute http(s) URL without fragment.
///
/// Returns an empty string for anything that cannot be turned into one.
pub fn normalize_url(raw: &str, base: Option<&str>) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches('\\')
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_end_matches('\\');
    if trimmed.is_empty() {
        return String::new();
    }

    let mut candidate = trimmed.replace("\\/", "/");
    if let Some(decoded) = decode_escapes(&candidate) {
        candidate = decoded;
    }

    let parsed = match base.filter(|b| !b.trim().is_empty()) {
        Some(base) => Url::parse(base.trim()).and_then(|b| b.join(&candidate)),
        None => Url::parse(&candidate),
    };
    let Ok(mut url) = parsed else {
        return String::new();
    };

    if !matches!(url.scheme(), "http" | "https") {
        return String::new();
    }
    url.set_fragment(None);
    url.to_string()
}

/// Reverse one level of backslash escaping (`\uXXXX`, `\xXX`, `\n`, `\/`...).
///
/// Returns `None` when the input contains no escapes, or when an escape is
/// malformed.
pub fn decode_escapes(raw: &str) -> Option<String> {
    let source = raw.trim_end_matches('\\').replace("\\\\", "\\");
    if !source.contains('\\') {
        return (source != raw).then_some(source);
    }

    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'u' => out.push(read_hex_char(&mut chars, 4)?),
            'U' => out.push(read_hex_char(&mut chars, 8)?),
            'x' => out.push(read_hex_char(&mut chars, 2)?),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '/' => out.push('/'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    (out != raw).then_some(out)
}

fn read_hex_char(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<char> {
    let hex: String = chars.by_ref().take(digits).collect();
    if hex.len() != digits {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
}

/// Manifest URLs are recognized by the extension anywhere in the string.
pub fn is_manifest_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains(MANIFEST_EXTENSION)
}

/// A normalized, non-manifest URL whose path does not end in an asset extension.
pub fn is_page_candidate(url: &str) -> bool {
    if url.is_empty() || is_manifest_url(url) {
        return false;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path().to_ascii_lowercase();
    match PATH_EXTENSION_REGEX.captures(&path) {
        Some(caps) => !BLOCKED_PAGE_EXTENSIONS.contains(&&caps[1]),
        None => true,
    }
}

/// Replace the manifest file name(s) in `url` with `target_name`.
///
/// `None` when the URL has no manifest file name to replace.
pub fn predict_sibling(url: &str, target_name: &str) -> Option<String> {
    let updated = MANIFEST_NAME_REGEX.replace_all(url, regex::NoExpand(target_name));
    (updated != url).then(|| updated.into_owned())
}

/// Manifest URLs embedded in the query string of a wrapper URL.
pub fn nested_manifests(wrapper_url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(wrapper_url) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for key in NESTED_URL_KEYS {
        for (name, value) in parsed.query_pairs() {
            if name != key || value.is_empty() {
                continue;
            }
            let decoded = urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            let nested = normalize_url(&decoded, None);
            if !nested.is_empty() && is_manifest_url(&nested) && !found.contains(&nested) {
                found.push(nested);
            }
        }
    }
    found
}

/// True for URLs that embed another absolute URL as a `url=` parameter.
pub fn is_wrapper_url(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    lowered.contains("?url=http") || lowered.contains("&url=http")
}

pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Registrable-domain approximation: the last two host labels.
pub fn site_key(url: &str) -> String {
    let host = host_of(url);
    let host = host.trim_matches('.');
    if host.is_empty() {
        return String::new();
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return host.to_string();
    }
    labels[labels.len() - 2..].join(".")
}

pub fn same_site(a: &str, b: &str) -> bool {
    let key_a = site_key(a);
    !key_a.is_empty() && key_a == site_key(b)
}

/// Chrome's error-page scheme or the client-block marker in a URL.
pub fn looks_blocked(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    lowered.starts_with("chrome-error://") || lowered.contains("err_blocked_by_client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("  \"https://a.example/v/index.m3u8#t=3\" ", "https://a.example/v/index.m3u8")]
    #[case("https:\\/\\/a.example\\/v\\/1.m3u8", "https://a.example/v/1.m3u8")]
    #[case("https://a.example/v/\\u0069ndex.m3u8", "https://a.example/v/index.m3u8")]
    #[case("'https://a.example/page'\\", "https://a.example/page")]
    #[case("javascript:void(0)", "")]
    #[case("ftp://a.example/file", "")]
    #[case("", "")]
    fn normalizes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_url(raw, None), expected);
    }

    #[test]
    fn resolves_relative_against_base() {
        assert_eq!(
            normalize_url("../hls/index.m3u8", Some("https://a.example/play/1/page.html")),
            "https://a.example/play/hls/index.m3u8"
        );
        assert_eq!(normalize_url("/x", Some("")), "");
    }

    #[rstest]
    #[case("https://A.example/v/index.m3u8?token=1")]
    #[case("https://a.example")]
    #[case("https://a.example/a b/c.m3u8")]
    #[case("https://a.example/p?url=https%3A%2F%2Fb.example%2Fx.m3u8")]
    fn normalization_is_idempotent(#[case] raw: &str) {
        let once = normalize_url(raw, None);
        assert!(!once.is_empty());
        assert_eq!(normalize_url(&once, None), once);
    }

    #[test]
    fn decode_escapes_reports_no_change() {
        assert_eq!(decode_escapes("https://plain"), None);
        assert_eq!(decode_escapes("a\\u0041b").as_deref(), Some("aAb"));
        assert_eq!(decode_escapes("bad\\u00"), None);
    }

    #[test]
    fn classifies_page_candidates() {
        assert!(is_page_candidate("https://a.example/watch/12"));
        assert!(is_page_candidate("https://a.example/watch.html"));
        assert!(!is_page_candidate("https://a.example/static/app.js"));
        assert!(!is_page_candidate("https://a.example/seg/001.ts"));
        assert!(!is_page_candidate("https://a.example/v/index.m3u8"));
        assert!(!is_page_candidate(""));
    }

    #[test]
    fn predicts_siblings() {
        assert_eq!(
            predict_sibling("https://a.example/v/720p.m3u8?x=1", "index.m3u8").as_deref(),
            Some("https://a.example/v/index.m3u8?x=1")
        );
        assert_eq!(predict_sibling("https://a.example/v/", "index.m3u8"), None);
    }

    #[test]
    fn unwraps_nested_manifest() {
        let nested = nested_manifests(
            "https://cdn.example/video/index.m3u8?url=https%3A%2F%2Freal.cdn%2Fstream%2Findex.m3u8",
        );
        assert_eq!(nested, vec!["https://real.cdn/stream/index.m3u8".to_string()]);
        assert!(nested_manifests("https://cdn.example/p?v=notaurl").is_empty());
    }

    #[test]
    fn site_keys() {
        assert_eq!(site_key("https://www.video.example.com/x"), "example.com");
        assert_eq!(site_key("http://localhost:8080/"), "localhost");
        assert!(same_site("https://a.example.com", "https://b.example.com/p"));
        assert!(!same_site("https://a.example.com", "https://example.org"));
        assert!(!same_site("not a url", "also not"));
    }

    #[test]
    fn blocked_markers() {
        assert!(looks_blocked("chrome-error://chromewebdata/"));
        assert!(looks_blocked("https://x/?e=ERR_BLOCKED_BY_CLIENT"));
        assert!(!looks_blocked("https://x/"));
    }
}
