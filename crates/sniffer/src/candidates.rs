// Thread-safe store of everything discovered during one discovery run.
//
// All mutation goes through insert-style methods that return whether the
// entry was new; readers only ever get owned snapshots.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::url::{
    host_of, is_manifest_url, is_page_candidate, is_wrapper_url, nested_manifests, normalize_url,
    predict_sibling, same_site,
};

/// Score at or above which a manifest is trusted enough to stop searching.
pub const STRONG_CANDIDATE_SCORE: i32 = 6;

/// Canonical sibling names tried for every discovered manifest.
pub const PREDICTED_NAMES: [&str; 2] = ["index.m3u8", "mixed.m3u8"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CandidateKind {
    Manifest,
    PredictedSibling,
    Page,
}

/// How much a recorded referrer can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerSource {
    /// The run's origin URL, used when nothing better is known.
    Fallback,
    /// Taken from the request itself or the page the URL was found on.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub url: String,
    pub kind: CandidateKind,
    pub referrer: Option<String>,
    pub referrer_source: ReferrerSource,
    pub discovered_at: DateTime<Utc>,
}

impl Candidate {
    fn new(url: String, kind: CandidateKind, referrer: Option<String>, source: ReferrerSource) -> Self {
        Self {
            url,
            kind,
            referrer,
            referrer_source: source,
            discovered_at: Utc::now(),
        }
    }

    /// Keep the first referrer unless a more specific one arrives.
    fn offer_referrer(&mut self, referrer: Option<&str>, source: ReferrerSource) {
        let Some(referrer) = referrer.filter(|r| !r.is_empty()) else {
            return;
        };
        if self.referrer.is_none() || source > self.referrer_source {
            self.referrer = Some(referrer.to_string());
            self.referrer_source = source;
        }
    }
}

/// Priority of a manifest URL relative to the run's origin. Higher is better.
pub fn priority_score(url: &str, origin: &str) -> i32 {
    let lowered = url.to_ascii_lowercase();
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    let wrapper = is_wrapper_url(url);

    let mut score = 0;
    if is_manifest_url(url) {
        score += 5;
    }
    if path.contains(".m3u8") {
        score += 5;
    }
    if lowered.contains("index.m3u8") {
        score += 2;
    }
    if lowered.contains("mixed.m3u8") {
        score -= 1;
    }
    if wrapper {
        score -= 6;
        if host_of(url).starts_with("vip.") {
            score -= 2;
        }
    }
    if same_site(url, origin) {
        score += 1;
    }
    if ["token=", "auth=", "sign="].iter().any(|k| lowered.contains(k)) {
        score += 1;
    }
    score
}

/// Sort by descending score, ties broken lexically.
pub fn rank_by_priority(urls: &mut [String], origin: &str) {
    urls.sort_by_cached_key(|u| (-priority_score(u, origin), u.clone()));
}

#[derive(Debug, Default)]
struct StoreState {
    manifests: HashMap<String, Candidate>,
    predicted: HashMap<String, Candidate>,
    pages: HashMap<String, Candidate>,
    referer_map: BTreeMap<String, String>,
    blocked: bool,
}

#[derive(Debug)]
pub struct CandidateStore {
    origin: String,
    state: Mutex<StoreState>,
}

impl CandidateStore {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Record a manifest URL plus its predicted siblings and any manifest it
    /// wraps. `None` referrer falls back to the origin. Returns true when the
    /// URL itself was new.
    pub fn add_manifest(&self, raw: &str, referrer: Option<&str>) -> bool {
        let url = normalize_url(raw, None);
        if url.is_empty() || !is_manifest_url(&url) {
            return false;
        }

        let (referrer, source) = match referrer.filter(|r| !r.is_empty()) {
            Some(r) => (r.to_string(), ReferrerSource::Exact),
            None => (self.origin.clone(), ReferrerSource::Fallback),
        };

        let nested = nested_manifests(&url);
        let siblings: Vec<String> = PREDICTED_NAMES
            .iter()
            .filter_map(|name| predict_sibling(&url, name))
            .collect();

        let mut state = self.state.lock();
        let inserted = Self::insert_manifest(&mut state, &url, &referrer, source);
        for sibling in siblings {
            state
                .predicted
                .entry(sibling.clone())
                .and_modify(|c| c.offer_referrer(Some(&referrer), source))
                .or_insert_with(|| {
                    Candidate::new(
                        sibling.clone(),
                        CandidateKind::PredictedSibling,
                        Some(referrer.clone()),
                        source,
                    )
                });
            state.referer_map.insert(sibling, referrer.clone());
        }
        for inner in nested {
            Self::insert_manifest(&mut state, &inner, &referrer, source);
        }
        inserted
    }

    fn insert_manifest(
        state: &mut StoreState,
        url: &str,
        referrer: &str,
        source: ReferrerSource,
    ) -> bool {
        let mut inserted = false;
        let candidate = state.manifests.entry(url.to_string()).or_insert_with(|| {
            inserted = true;
            Candidate::new(url.to_string(), CandidateKind::Manifest, None, source)
        });
        candidate.offer_referrer(Some(referrer), source);
        if let Some(kept) = candidate.referrer.clone() {
            state.referer_map.insert(url.to_string(), kept);
        }
        inserted
    }

    /// Record a page URL for recursive exploration.
    pub fn add_page(&self, raw: &str, base: Option<&str>) -> bool {
        let url = normalize_url(raw, base);
        if !is_page_candidate(&url) {
            return false;
        }
        let mut state = self.state.lock();
        if state.pages.contains_key(&url) {
            return false;
        }
        let referrer = base.filter(|b| !b.is_empty()).map(str::to_string);
        state.pages.insert(
            url.clone(),
            Candidate::new(url, CandidateKind::Page, referrer, ReferrerSource::Exact),
        );
        true
    }

    /// Route URLs found by the text heuristics: manifests always, other URLs
    /// only when `collect_pages` is set. Returns how many manifests were new.
    pub fn add_found<I>(&self, urls: I, referrer: Option<&str>, collect_pages: bool) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut new_manifests = 0;
        for url in urls {
            if is_manifest_url(&url) {
                if self.add_manifest(&url, referrer) {
                    new_manifests += 1;
                }
            } else if collect_pages {
                self.add_page(&url, None);
            }
        }
        new_manifests
    }

    pub fn manifest_count(&self) -> usize {
        self.state.lock().manifests.len()
    }

    pub fn has_strong_candidate(&self) -> bool {
        self.state
            .lock()
            .manifests
            .keys()
            .any(|u| priority_score(u, &self.origin) >= STRONG_CANDIDATE_SCORE)
    }

    pub fn manifest(&self, url: &str) -> Option<Candidate> {
        self.state.lock().manifests.get(url).cloned()
    }

    pub fn ranked_manifests(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.state.lock().manifests.keys().cloned().collect();
        rank_by_priority(&mut urls, &self.origin);
        urls
    }

    /// Predicted siblings that were never seen as real manifests.
    pub fn ranked_predicted(&self) -> Vec<String> {
        let mut urls: Vec<String> = {
            let state = self.state.lock();
            state
                .predicted
                .keys()
                .filter(|u| !state.manifests.contains_key(*u))
                .cloned()
                .collect()
        };
        rank_by_priority(&mut urls, &self.origin);
        urls
    }

    /// Page candidates, same-site with the origin first.
    pub fn ranked_pages(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.state.lock().pages.keys().cloned().collect();
        urls.sort_by_cached_key(|u| (!same_site(u, &self.origin), u.clone()));
        urls
    }

    pub fn referer_map(&self) -> BTreeMap<String, String> {
        self.state.lock().referer_map.clone()
    }

    pub fn mark_blocked(&self) {
        self.state.lock().blocked = true;
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://page.example/watch/1";

    #[test]
    fn wrapper_and_nested_both_recorded_nested_scores_higher() {
        let store = CandidateStore::new(ORIGIN);
        let wrapper =
            "https://cdn.example/video/index.m3u8?url=https%3A%2F%2Freal.cdn%2Fstream%2Findex.m3u8";
        store.add_manifest(wrapper, Some(ORIGIN));

        let ranked = store.ranked_manifests();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0], "https://real.cdn/stream/index.m3u8");
        assert_eq!(ranked[1], wrapper);
        assert!(priority_score(&ranked[0], ORIGIN) > priority_score(&ranked[1], ORIGIN));

        let nested = store.manifest(&ranked[0]).unwrap();
        assert_eq!(nested.referrer.as_deref(), Some(ORIGIN));
    }

    #[test]
    fn equivalent_spellings_dedupe() {
        let store = CandidateStore::new(ORIGIN);
        assert!(store.add_manifest("https://a.example/v/x.m3u8 ", None));
        assert!(!store.add_manifest("https://a.example/v/x.m3u8#frag", None));
        assert!(!store.add_manifest("https:\\/\\/a.example\\/v\\/x.m3u8", None));
        assert!(!store.add_manifest("'https://a.example/v/x.m3u8'", None));
        assert_eq!(store.manifest_count(), 1);
    }

    #[test]
    fn exact_referrer_beats_fallback_but_not_earlier_exact() {
        let store = CandidateStore::new(ORIGIN);
        let url = "https://a.example/v/x.m3u8";
        store.add_manifest(url, None);
        assert_eq!(store.manifest(url).unwrap().referrer.as_deref(), Some(ORIGIN));

        store.add_manifest(url, Some("https://player.example/embed"));
        store.add_manifest(url, Some("https://other.example/"));
        store.add_manifest(url, None);
        let candidate = store.manifest(url).unwrap();
        assert_eq!(candidate.referrer.as_deref(), Some("https://player.example/embed"));
        assert_eq!(candidate.referrer_source, ReferrerSource::Exact);
        assert_eq!(
            store.referer_map().get(url).map(String::as_str),
            Some("https://player.example/embed")
        );
    }

    #[test]
    fn predicted_siblings_exclude_seen_manifests() {
        let store = CandidateStore::new(ORIGIN);
        store.add_manifest("https://a.example/v/720.m3u8", None);
        store.add_manifest("https://a.example/v/index.m3u8", None);
        let predicted = store.ranked_predicted();
        assert_eq!(predicted, vec!["https://a.example/v/mixed.m3u8".to_string()]);
    }

    #[test]
    fn index_same_site_beats_foreign_wrapper() {
        let own = "https://cdn.page.example/v/index.m3u8";
        let wrapper = "https://vip.other.example/v/index.m3u8?url=https://x.example/a.m3u8";
        assert!(priority_score(own, ORIGIN) >= priority_score(wrapper, ORIGIN));
        assert_eq!(priority_score(own, ORIGIN), 13);
        assert_eq!(priority_score(wrapper, ORIGIN), 4);
    }

    #[test]
    fn strong_candidate_threshold() {
        let store = CandidateStore::new(ORIGIN);
        store.add_manifest(
            "https://vip.x.example/p/index.m3u8?url=https://y.example/a.m3u8",
            None,
        );
        // the wrapper scores 4 but its nested manifest scores 10
        assert!(store.has_strong_candidate());

        let weak = CandidateStore::new(ORIGIN);
        weak.add_manifest("https://vip.x.example/p?url=https://y.example/a.m3u8&f=1", None);
        assert_eq!(
            priority_score(
                "https://vip.x.example/p?url=https://y.example/a.m3u8&f=1",
                ORIGIN
            ),
            -3
        );
    }

    #[test]
    fn pages_rank_same_site_first() {
        let store = CandidateStore::new(ORIGIN);
        assert!(store.add_page("https://zzz.page.example/b", None));
        assert!(store.add_page("https://aaa.other.example/a", None));
        assert!(store.add_page("/a", Some(ORIGIN)));
        assert!(!store.add_page("https://page.example/app.js", None));
        assert!(!store.add_page("https://page.example/v.m3u8", None));
        assert_eq!(
            store.ranked_pages(),
            vec![
                "https://page.example/a".to_string(),
                "https://zzz.page.example/b".to_string(),
                "https://aaa.other.example/a".to_string(),
            ]
        );
    }

    #[test]
    fn add_found_routes_by_kind() {
        let store = CandidateStore::new(ORIGIN);
        let urls = vec![
            "https://a.example/v/1.m3u8".to_string(),
            "https://a.example/next".to_string(),
        ];
        assert_eq!(store.add_found(urls.clone(), None, false), 1);
        assert!(store.ranked_pages().is_empty());
        assert_eq!(store.add_found(urls, None, true), 0);
        assert_eq!(store.ranked_pages().len(), 1);
    }
}
