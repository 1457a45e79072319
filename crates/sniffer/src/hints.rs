use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// A browser cookie captured at the end of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieHint {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl CookieHint {
    fn identity(&self) -> (String, String, String) {
        (self.name.clone(), self.domain.clone(), self.path.clone())
    }
}

/// Identity hints a discovery run hands to the downloader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHints {
    pub source_url: String,
    pub final_url: String,
    pub user_agent: String,
    pub cookies: Vec<CookieHint>,
    /// Candidate URL → referrer, last write wins.
    pub referer_map: BTreeMap<String, String>,
}

impl SessionHints {
    pub fn new(source_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        let source_url = source_url.into();
        Self {
            final_url: source_url.clone(),
            source_url,
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    /// Append cookies not yet present by (name, domain, path).
    pub fn merge_cookies<I>(&mut self, incoming: I)
    where
        I: IntoIterator<Item = CookieHint>,
    {
        let mut seen: HashSet<_> = self.cookies.iter().map(CookieHint::identity).collect();
        for cookie in incoming {
            if seen.insert(cookie.identity()) {
                self.cookies.push(cookie);
            }
        }
    }

    pub fn merge_referers<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.referer_map.extend(entries);
    }

    /// Fold a finished child session into this one. The child's own
    /// source/final URL are not adopted.
    pub fn merge_child(&mut self, child: SessionHints) {
        self.merge_cookies(child.cookies);
        self.merge_referers(child.referer_map);
        if self.user_agent.is_empty() {
            self.user_agent = child.user_agent;
        }
    }

    pub fn referer_for(&self, url: &str) -> Option<&str> {
        self.referer_map.get(url).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str, value: &str) -> CookieHint {
        CookieHint {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".into(),
            ..Default::default()
        }
    }

    #[test]
    fn cookies_dedupe_by_identity_first_wins() {
        let mut hints = SessionHints::new("https://a.example", "ua");
        hints.merge_cookies(vec![cookie("sid", ".a.example", "1")]);
        hints.merge_cookies(vec![
            cookie("sid", ".a.example", "2"),
            cookie("sid", ".b.example", "3"),
        ]);
        assert_eq!(hints.cookies.len(), 2);
        assert_eq!(hints.cookies[0].value, "1");
    }

    #[test]
    fn child_referers_overwrite() {
        let mut parent = SessionHints::new("https://a.example", "ua");
        parent.merge_referers([("u".to_string(), "r1".to_string())]);

        let mut child = SessionHints::new("https://a.example/child", "");
        child.merge_referers([("u".to_string(), "r2".to_string())]);
        child.merge_cookies(vec![cookie("c", "a.example", "v")]);

        parent.merge_child(child);
        assert_eq!(parent.referer_for("u"), Some("r2"));
        assert_eq!(parent.cookies.len(), 1);
        assert_eq!(parent.source_url, "https://a.example");
        assert_eq!(parent.user_agent, "ua");
    }
}
