//! URL predicates for site rules.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::url::normalize_url;

/// Host globs, URL substrings and a URL regex. No configured check matches
/// everything; otherwise any single check is enough.
///
/// Patterns are compiled once on construction. A pattern that does not
/// compile never matches.
#[derive(Debug, Clone, Default)]
pub struct SiteMatcher {
    pub host_patterns: Vec<String>,
    pub url_contains: Vec<String>,
    pub url_regex: Option<String>,
    host_globs: Vec<Regex>,
    compiled_regex: Option<Regex>,
}

impl PartialEq for SiteMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.host_patterns == other.host_patterns
            && self.url_contains == other.url_contains
            && self.url_regex == other.url_regex
    }
}

impl Eq for SiteMatcher {}

impl SiteMatcher {
    pub fn new(host_patterns: Vec<String>, url_contains: Vec<String>, url_regex: Option<String>) -> Self {
        let host_patterns: Vec<String> =
            host_patterns.into_iter().map(|p| p.to_ascii_lowercase()).collect();
        let url_regex = url_regex.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

        let host_globs = host_patterns
            .iter()
            .filter_map(|pattern| match compile_glob(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "host pattern ignored");
                    None
                }
            })
            .collect();
        let compiled_regex = url_regex.as_deref().and_then(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| warn!(pattern = %pattern, error = %e, "url_regex ignored"))
                .ok()
        });

        Self {
            host_patterns,
            url_contains: url_contains.into_iter().map(|p| p.to_ascii_lowercase()).collect(),
            url_regex,
            host_globs,
            compiled_regex,
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.host_patterns.is_empty() && self.url_contains.is_empty() && self.url_regex.is_none()
    }

    pub fn matches(&self, url: &str) -> bool {
        if self.is_unconditional() {
            return true;
        }

        let normalized = match normalize_url(url, None) {
            n if n.is_empty() => url.to_string(),
            n => n,
        };
        let lowered = normalized.to_ascii_lowercase();
        let host = ::url::Url::parse(&normalized)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();

        if self.host_globs.iter().any(|re| re.is_match(&host)) {
            return true;
        }
        if self.url_contains.iter().any(|k| lowered.contains(k.as_str())) {
            return true;
        }
        self.compiled_regex
            .as_ref()
            .is_some_and(|re| re.is_match(&normalized))
    }
}

/// Shell-style glob (`*`, `?`, `[...]`, `[!...]`) anchored to the whole input.
pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&glob_to_regex(pattern))
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Unterminated classes are taken literally.
                let Some(end) = chars[i + 1..].iter().position(|c| *c == ']').map(|p| p + i + 1)
                else {
                    out.push_str(r"\[");
                    i += 1;
                    continue;
                };
                let mut class: String = chars[i + 1..end].iter().collect();
                if let Some(rest) = class.strip_prefix('!') {
                    class = format!("^{rest}");
                }
                out.push('[');
                out.push_str(&class.replace('\\', r"\\"));
                out.push(']');
                i = end;
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn glob_matches(pattern: &str, input: &str) -> bool {
        compile_glob(pattern).is_ok_and(|re| re.is_match(input))
    }

    #[rstest]
    #[case("*.example.com", "www.example.com", true)]
    #[case("*.example.com", "example.com", false)]
    #[case("vid?.example.com", "vid1.example.com", true)]
    #[case("vid[0-9].example.com", "vidx.example.com", false)]
    #[case("vid[!0-9].example.com", "vidx.example.com", true)]
    #[case("a.example.com", "a-example.com", false)]
    #[case("[weird", "[weird", true)]
    fn globs(#[case] pattern: &str, #[case] input: &str, #[case] expected: bool) {
        assert_eq!(glob_matches(pattern, input), expected);
    }

    #[test]
    fn empty_matcher_matches_everything() {
        assert!(SiteMatcher::default().matches("https://anything.example/"));
    }

    #[test]
    fn any_check_suffices() {
        let matcher = SiteMatcher::new(
            vec!["*.nomatch.example".into()],
            vec!["/PLAY/".into()],
            Some("(".into()),
        );
        assert!(matcher.matches("https://v.example/play/1"));
        assert!(!matcher.matches("https://v.example/watch/1"));

        let regex_only = SiteMatcher::new(vec![], vec![], Some(r"VIDEO/\d+$".into()));
        assert!(regex_only.matches("https://v.example/video/12"));
        assert!(!regex_only.matches("https://v.example/video/x"));
    }

    #[test]
    fn patterns_are_compiled_once() {
        let matcher = SiteMatcher::new(
            vec!["*.cdn.example".into(), "[".into()],
            vec![],
            Some(r"/v/\d+".into()),
        );
        assert_eq!(matcher.host_globs.len(), 2);
        assert!(matcher.compiled_regex.is_some());
        assert!(matcher.matches("https://a.cdn.example/x"));
        assert!(matcher.matches("https://other.example/V/7"));

        let broken = SiteMatcher::new(vec![], vec![], Some("(".into()));
        assert!(broken.compiled_regex.is_none());
        assert!(!broken.is_unconditional());
        assert!(!broken.matches("https://other.example/("));
        assert_eq!(broken.clone(), broken);
    }

    #[test]
    fn host_glob_is_case_insensitive() {
        let matcher = SiteMatcher::new(vec!["*.Example.COM".into()], vec![], None);
        assert!(matcher.matches("https://WWW.example.com/x"));
    }
}
