//! One browser-context lifetime: navigate, extract, interact, recover.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use stream_common::{ProxySettings, StopSignal};
use strum::{AsRefStr, Display};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidates::CandidateStore;
use crate::error::ProbeError;
use crate::extract::candidate_urls;
use crate::hints::SessionHints;
use crate::page::{
    BrowserDriver, HIDE_WEBDRIVER_SCRIPT, LaunchOptions, LoadState, NetworkEvent, OpenedPage,
    PageHandle, Scope, Viewport,
};
use crate::rules::{ActiveRules, Interpreter, Recovery};
use crate::url::{is_manifest_url, looks_blocked, normalize_url, same_site};

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_millis(18_000);
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_millis(8_000);
pub const RECOVERY_TIMEOUT: Duration = Duration::from_millis(12_000);
pub const BACK_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const PAGE_DEFAULT_TIMEOUT: Duration = Duration::from_millis(12_000);

pub const BLOCKED_BY_CLIENT: &str = "ERR_BLOCKED_BY_CLIENT";
pub const BROWSER_LOCALE: &str = "zh-CN";

const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Only these request headers are ever sent by the browser context.
const SAFE_HEADER_NAMES: [&str; 4] = ["user-agent", "accept-language", "accept", "referer"];

const BASE_BROWSER_ARGS: [&str; 4] = [
    "--disable-blink-features=AutomationControlled",
    "--autoplay-policy=no-user-gesture-required",
    "--disable-extensions",
    "--disable-component-extensions-with-background-pages",
];

const ANCHOR_LIMIT: usize = 120;
const ANCHOR_SCRIPT: &str =
    "(els) => els.slice(0, 120).map((el) => el.href).filter(Boolean)";

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];
const TEXT_LIKE_MARKERS: [&str; 5] = ["text", "json", "javascript", "xml", "mpegurl"];

/// The deterministic header set for a target, in a fixed order.
pub fn monitor_headers(target_url: &str, user_agent: &str) -> Vec<(String, String)> {
    [
        ("user-agent", user_agent),
        ("accept-language", ACCEPT_LANGUAGE),
        ("accept", ACCEPT_HTML),
        ("referer", target_url),
    ]
    .into_iter()
    .filter(|(name, value)| !value.trim().is_empty() && SAFE_HEADER_NAMES.contains(name))
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

/// Browser launch options for one attempt against `target_url`.
pub fn launch_options(
    target_url: &str,
    user_agent: &str,
    headless: bool,
    proxy: &ProxySettings,
) -> LaunchOptions {
    let mut args: Vec<String> = BASE_BROWSER_ARGS.iter().map(|a| a.to_string()).collect();
    args.extend(proxy.browser_args());

    LaunchOptions {
        headless,
        args,
        user_agent: user_agent.to_string(),
        locale: BROWSER_LOCALE.to_string(),
        viewport: Viewport::DEFAULT,
        headers: monitor_headers(target_url, user_agent)
            .into_iter()
            .filter(|(name, _)| name != "user-agent")
            .collect(),
        init_script: Some(HIDE_WEBDRIVER_SCRIPT.to_string()),
        default_timeout: PAGE_DEFAULT_TIMEOUT,
    }
}

/// Interaction stage of an attempt. Rule authors escalate on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InteractionStage {
    Disabled,
    First,
    Retry,
}

impl InteractionStage {
    pub fn for_attempt(attempt: u32, interaction_enabled: bool) -> Self {
        match (interaction_enabled, attempt) {
            (false, _) => InteractionStage::Disabled,
            (true, 0 | 1) => InteractionStage::First,
            (true, _) => InteractionStage::Retry,
        }
    }
}

/// Progress markers inside one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStep {
    Launch,
    Navigate,
    NetworkIdle,
    Extract,
    Interact,
    CollectPages,
    BlockedCheck,
    Hints,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub blocked: bool,
    pub final_url: String,
}

/// Feeds observed traffic into the store. Manifest URLs are always kept;
/// page candidates only when the run may recurse.
pub fn handle_network_event(
    store: &CandidateStore,
    target_url: &str,
    recursion_depth: u32,
    event: NetworkEvent,
) {
    let collect_pages = recursion_depth > 1;
    match event {
        NetworkEvent::Request { url, referer } => {
            let url = normalize_url(&url, None);
            if is_manifest_url(&url) {
                store.add_manifest(&url, non_empty(referer.as_deref()));
            }
        }
        NetworkEvent::Response {
            url,
            status,
            location,
            content_type,
            referer,
            body,
        } => {
            let url = normalize_url(&url, None);
            let referer = non_empty(referer.as_deref());
            if is_manifest_url(&url) {
                store.add_manifest(&url, referer);
            }
            if collect_pages && REDIRECT_STATUSES.contains(&status) {
                if let Some(location) = non_empty(location.as_deref()) {
                    store.add_page(location, non_empty(Some(url.as_str())));
                }
            }
            if status != 200 || !is_text_like(&content_type) {
                return;
            }
            let Some(body) = body else {
                return;
            };
            let base = if url.is_empty() { target_url } else { url.as_str() };
            let referrer = referer.or(non_empty(Some(base)));
            store.add_found(candidate_urls(&body, base), referrer, collect_pages);
        }
        NetworkEvent::RequestFailed { url, error_text } => {
            if url.to_ascii_uppercase().contains(BLOCKED_BY_CLIENT)
                || error_text.to_ascii_uppercase().contains("BLOCKED_BY_CLIENT")
            {
                debug!(url = %url, "request blocked by client");
                store.mark_blocked();
            }
        }
        NetworkEvent::Popup { url, content } => {
            let url = normalize_url(&url, None);
            if url.is_empty() {
                return;
            }
            store.add_page(&url, None);
            if let Some(content) = content {
                store.add_found(candidate_urls(&content, &url), Some(&url), collect_pages);
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// An empty content type counts as text.
pub(crate) fn is_text_like(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.is_empty() || TEXT_LIKE_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Drains the page's event stream in the background until stopped.
struct EventPump {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventPump {
    fn spawn(
        mut events: mpsc::UnboundedReceiver<NetworkEvent>,
        store: Arc<CandidateStore>,
        target_url: String,
        recursion_depth: u32,
    ) -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => handle_network_event(&store, &target_url, recursion_depth, event),
                        None => return,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
            while let Ok(event) = events.try_recv() {
                handle_network_event(&store, &target_url, recursion_depth, event);
            }
        });
        Self { token, handle }
    }

    async fn finish(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "network event pump panicked");
        }
    }
}

/// Brings the page back to the stable URL after interactions wander off.
struct PageRecovery {
    store: Arc<CandidateStore>,
    target_url: String,
}

#[async_trait]
impl Recovery for PageRecovery {
    async fn recover(&self, page: &dyn PageHandle, stable_url: &str) {
        let raw = page.url().await.unwrap_or_default();
        let stable = match normalize_url(stable_url, None) {
            s if s.is_empty() => self.target_url.clone(),
            s => s,
        };
        let current = normalize_url(&raw, None);

        if looks_blocked(&raw) {
            self.store.mark_blocked();
            if let Err(e) = page.goto(&stable, LoadState::DomContentLoaded, RECOVERY_TIMEOUT).await {
                debug!(error = %e, "reload after block failed");
            }
            return;
        }
        if current.is_empty() {
            return;
        }
        if is_manifest_url(&current) {
            self.store.add_manifest(&current, Some(&stable));
            return;
        }
        if same_site(&current, &stable) {
            return;
        }

        debug!(from = %current, back_to = %stable, "page drifted cross-site");
        self.store.add_page(&current, None);
        if page.go_back(BACK_TIMEOUT).await.is_err() {
            if let Err(e) = page.goto(&stable, LoadState::DomContentLoaded, RECOVERY_TIMEOUT).await {
                debug!(error = %e, "return to stable page failed");
            }
        }
    }
}

/// What an attempt needs to know about its place in the run.
#[derive(Debug, Clone, Copy)]
pub struct AttemptPlan {
    pub attempt: u32,
    pub tries: u32,
    pub stage: InteractionStage,
}

pub struct DiscoverySession<'a> {
    target_url: &'a str,
    store: Arc<CandidateStore>,
    recursion_depth: u32,
    rules: &'a ActiveRules,
    stop: &'a StopSignal,
}

impl<'a> DiscoverySession<'a> {
    pub fn new(
        target_url: &'a str,
        store: Arc<CandidateStore>,
        recursion_depth: u32,
        rules: &'a ActiveRules,
        stop: &'a StopSignal,
    ) -> Self {
        Self {
            target_url,
            store,
            recursion_depth,
            rules,
            stop,
        }
    }

    /// Open a browser context, run the attempt and fold the resulting hints
    /// into `hints`. The context is always closed.
    pub async fn run<F>(
        &self,
        driver: &dyn BrowserDriver,
        options: &LaunchOptions,
        plan: AttemptPlan,
        hints: &mut SessionHints,
        mut on_step: F,
    ) -> Result<SessionReport, ProbeError>
    where
        F: FnMut(SessionStep) + Send,
    {
        if self.stop.is_stopped() {
            return Err(ProbeError::Cancelled);
        }
        on_step(SessionStep::Launch);
        let OpenedPage { page, events } = driver.open(options).await?;
        let pump = EventPump::spawn(
            events,
            self.store.clone(),
            self.target_url.to_string(),
            self.recursion_depth,
        );

        let result = self.drive(page.as_ref(), plan, hints, &mut on_step).await;

        if let Err(e) = page.close().await {
            debug!(error = %e, "page close failed");
        }
        pump.finish().await;

        // network events that arrived late still belong to this session
        hints.merge_referers(self.store.referer_map());
        result
    }

    async fn drive<F>(
        &self,
        page: &dyn PageHandle,
        plan: AttemptPlan,
        hints: &mut SessionHints,
        on_step: &mut F,
    ) -> Result<SessionReport, ProbeError>
    where
        F: FnMut(SessionStep) + Send,
    {
        let recovery = PageRecovery {
            store: self.store.clone(),
            target_url: self.target_url.to_string(),
        };

        on_step(SessionStep::Navigate);
        page.goto(self.target_url, LoadState::DomContentLoaded, NAVIGATION_TIMEOUT)
            .await?;

        on_step(SessionStep::NetworkIdle);
        if let Err(e) = page
            .wait_for_load_state(LoadState::NetworkIdle, NETWORK_IDLE_TIMEOUT)
            .await
        {
            debug!(error = %e, "network idle not reached");
        }

        on_step(SessionStep::Extract);
        self.extract_from_page(page).await;

        if plan.stage != InteractionStage::Disabled && !self.rules.is_empty() {
            if self.stop.is_stopped() {
                return Err(ProbeError::Cancelled);
            }
            on_step(SessionStep::Interact);
            let stable = match normalize_url(&page.url().await.unwrap_or_default(), None) {
                s if s.is_empty() => self.target_url.to_string(),
                s => s,
            };
            let executed = Interpreter::new(page, &stable, &recovery)
                .run_all(self.rules, plan.attempt, plan.tries, self.stop)
                .await;
            debug!(executed, rule = %self.rules.name, "interaction finished");
            self.extract_from_page(page).await;
            recovery.recover(page, &stable).await;
        }

        if self.recursion_depth > 1 {
            on_step(SessionStep::CollectPages);
            self.collect_page_candidates(page).await;
        }

        on_step(SessionStep::BlockedCheck);
        let blocked = self.page_is_blocked(page).await;
        if blocked {
            info!(url = %self.target_url, "page blocked by client");
            self.store.mark_blocked();
            recovery.recover(page, self.target_url).await;
            self.extract_from_page(page).await;
        }

        on_step(SessionStep::Hints);
        let final_url = self.update_hints(page, hints).await;
        Ok(SessionReport { blocked, final_url })
    }

    async fn extract_from_page(&self, page: &dyn PageHandle) {
        let page_url = match normalize_url(&page.url().await.unwrap_or_default(), None) {
            u if u.is_empty() => self.target_url.to_string(),
            u => u,
        };
        let body = match page.content().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "page content unavailable");
                return;
            }
        };
        let added = self.store.add_found(
            candidate_urls(&body, &page_url),
            Some(&page_url),
            self.recursion_depth > 1,
        );
        if added > 0 {
            debug!(added, page = %page_url, "candidates extracted from page");
        }
    }

    async fn collect_page_candidates(&self, page: &dyn PageHandle) {
        if let Ok(url) = page.url().await {
            self.store.add_page(&url, None);
        }

        let hrefs = page
            .eval_on_selector_all(Scope::Main, "a[href]", ANCHOR_SCRIPT, None)
            .await
            .ok()
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default();
        for href in hrefs.iter().take(ANCHOR_LIMIT) {
            self.store.add_page(href, None);
        }

        for frame in page.frames().await.unwrap_or_default() {
            self.store.add_page(&frame.url, None);
        }
    }

    async fn page_is_blocked(&self, page: &dyn PageHandle) -> bool {
        if page.url().await.is_ok_and(|u| looks_blocked(&u)) {
            return true;
        }
        if let Ok(frames) = page.frames().await {
            if frames.iter().any(|f| looks_blocked(&f.url)) {
                return true;
            }
        }
        page.content()
            .await
            .is_ok_and(|body| body.contains(BLOCKED_BY_CLIENT))
    }

    async fn update_hints(&self, page: &dyn PageHandle, hints: &mut SessionHints) -> String {
        let final_url = match normalize_url(&page.url().await.unwrap_or_default(), None) {
            u if u.is_empty() => self.target_url.to_string(),
            u => u,
        };
        hints.final_url = final_url.clone();
        hints.merge_referers(self.store.referer_map());
        match page.cookies().await {
            Ok(cookies) => hints.merge_cookies(cookies),
            Err(e) => debug!(error = %e, "cookies unavailable"),
        }
        final_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hints::CookieHint;
    use crate::rules::RuleSet;
    use crate::testing::{MockDriver, MockPage};

    const TARGET: &str = "https://v.example/watch/1";

    fn plan(attempt: u32, stage: InteractionStage) -> AttemptPlan {
        AttemptPlan {
            attempt,
            tries: 3,
            stage,
        }
    }

    #[test]
    fn headers_are_filtered_and_ordered() {
        let headers = monitor_headers(TARGET, "ua/1");
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["user-agent", "accept-language", "accept", "referer"]);
        assert_eq!(monitor_headers(TARGET, " ").len(), 3);
    }

    #[test]
    fn launch_options_carry_proxy_switches() {
        let proxy = ProxySettings {
            enabled: true,
            address: "10.0.0.1".into(),
            port: "3128".into(),
            ..Default::default()
        };
        let options = launch_options(TARGET, "ua", true, &proxy);
        assert!(options.args.contains(&"--proxy-server=http://10.0.0.1:3128".to_string()));
        assert!(!options.headers.iter().any(|(n, _)| n == "user-agent"));
        assert_eq!(options.viewport, Viewport::DEFAULT);

        let direct = launch_options(TARGET, "ua", false, &ProxySettings::default());
        assert!(direct.args.contains(&"--no-proxy-server".to_string()));
        assert!(!direct.headless);
    }

    #[test]
    fn stage_for_attempt() {
        assert_eq!(InteractionStage::for_attempt(1, true), InteractionStage::First);
        assert_eq!(InteractionStage::for_attempt(2, true), InteractionStage::Retry);
        assert_eq!(InteractionStage::for_attempt(1, false), InteractionStage::Disabled);
    }

    #[test]
    fn network_events_feed_the_store() {
        let store = CandidateStore::new(TARGET);
        handle_network_event(
            &store,
            TARGET,
            2,
            NetworkEvent::Request {
                url: "https://cdn.example/a/index.m3u8".into(),
                referer: Some("https://v.example/player".into()),
            },
        );
        handle_network_event(
            &store,
            TARGET,
            2,
            NetworkEvent::Response {
                url: "https://v.example/go".into(),
                status: 302,
                location: Some("/landing".into()),
                content_type: String::new(),
                referer: None,
                body: None,
            },
        );
        handle_network_event(
            &store,
            TARGET,
            2,
            NetworkEvent::Response {
                url: "https://v.example/api/play".into(),
                status: 200,
                location: None,
                content_type: "application/json; charset=utf-8".into(),
                referer: None,
                body: Some(r#"{"src":"https:\/\/cdn.example\/b\/index.m3u8"}"#.into()),
            },
        );
        handle_network_event(
            &store,
            TARGET,
            2,
            NetworkEvent::Response {
                url: "https://v.example/img.png".into(),
                status: 200,
                location: None,
                content_type: "image/png".into(),
                referer: None,
                body: Some("https://cdn.example/c/index.m3u8".into()),
            },
        );

        let manifests = store.ranked_manifests();
        assert!(manifests.contains(&"https://cdn.example/a/index.m3u8".to_string()));
        assert!(manifests.contains(&"https://cdn.example/b/index.m3u8".to_string()));
        assert!(!manifests.contains(&"https://cdn.example/c/index.m3u8".to_string()));
        assert_eq!(
            store.manifest("https://cdn.example/a/index.m3u8").unwrap().referrer.as_deref(),
            Some("https://v.example/player")
        );
        assert_eq!(
            store.manifest("https://cdn.example/b/index.m3u8").unwrap().referrer.as_deref(),
            Some("https://v.example/api/play")
        );
        assert!(store.ranked_pages().contains(&"https://v.example/landing".to_string()));
    }

    #[test]
    fn redirects_are_ignored_without_recursion() {
        let store = CandidateStore::new(TARGET);
        handle_network_event(
            &store,
            TARGET,
            1,
            NetworkEvent::Response {
                url: "https://v.example/go".into(),
                status: 301,
                location: Some("https://v.example/landing".into()),
                content_type: String::new(),
                referer: None,
                body: None,
            },
        );
        assert!(store.ranked_pages().is_empty());
    }

    #[test]
    fn blocked_failures_mark_the_store() {
        let store = CandidateStore::new(TARGET);
        handle_network_event(
            &store,
            TARGET,
            1,
            NetworkEvent::RequestFailed {
                url: "https://ads.example/x.js".into(),
                error_text: "net::ERR_FAILED".into(),
            },
        );
        assert!(!store.is_blocked());
        handle_network_event(
            &store,
            TARGET,
            1,
            NetworkEvent::RequestFailed {
                url: "https://ads.example/x.js".into(),
                error_text: "net::err_blocked_by_client".into(),
            },
        );
        assert!(store.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn session_collects_from_dom_traffic_and_interaction() {
        let page = MockPage::new("about:blank");
        page.serve(
            TARGET,
            r#"<script>var player_abc = {"encrypt":1,"url":"https%3A%2F%2Fcdn.example%2Fv%2F1.m3u8"};</script>"#,
        );
        page.traffic(
            TARGET,
            vec![NetworkEvent::Request {
                url: "https://v.example/live/index.m3u8".into(),
                referer: Some(TARGET.into()),
            }],
        );
        page.add_elements(Scope::Main, "video", &[true]);
        page.set_cookies(vec![CookieHint {
            name: "sid".into(),
            value: "1".into(),
            domain: "v.example".into(),
            path: "/".into(),
            ..Default::default()
        }]);
        let driver = MockDriver::new(vec![page.clone()]);

        let store = Arc::new(CandidateStore::new(TARGET));
        let rules = RuleSet::default().resolve(TARGET);
        let stop = StopSignal::new();
        let session = DiscoverySession::new(TARGET, store.clone(), 1, &rules, &stop);
        let mut hints = SessionHints::new(TARGET, "ua");
        let mut steps = Vec::new();
        let options = launch_options(TARGET, "ua", true, &ProxySettings::default());

        let report = session
            .run(&driver, &options, plan(1, InteractionStage::First), &mut hints, |s| {
                steps.push(s)
            })
            .await
            .unwrap();

        assert!(!report.blocked);
        assert_eq!(report.final_url, TARGET);
        let manifests = store.ranked_manifests();
        assert!(manifests.contains(&"https://cdn.example/v/1.m3u8".to_string()));
        assert!(manifests.contains(&"https://v.example/live/index.m3u8".to_string()));
        assert_eq!(hints.cookies.len(), 1);
        assert_eq!(hints.final_url, TARGET);
        assert!(hints.referer_map.contains_key("https://cdn.example/v/1.m3u8"));
        assert!(steps.contains(&SessionStep::Interact));
        assert!(!steps.contains(&SessionStep::CollectPages));
        // the first-pass chain plays media and clicks the visible player
        assert_eq!(page.calls_matching("click"), vec!["click main video #0"]);
        assert_eq!(page.calls_matching("close").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drift_after_click_is_recovered_and_recorded() {
        let page = MockPage::new("about:blank");
        page.add_elements(Scope::Main, "video", &[true]);
        page.navigate_on_click("https://ads.example/landing");
        page.set_anchors(&["https://v.example/watch/2", "https://v.example/logo.png"]);
        page.add_frame("https://player.example/embed/9");
        let driver = MockDriver::new(vec![page.clone()]);

        let store = Arc::new(CandidateStore::new(TARGET));
        let rules = RuleSet::default().resolve(TARGET);
        let stop = StopSignal::new();
        let session = DiscoverySession::new(TARGET, store.clone(), 2, &rules, &stop);
        let mut hints = SessionHints::new(TARGET, "ua");
        let options = launch_options(TARGET, "ua", true, &ProxySettings::default());

        session
            .run(&driver, &options, plan(1, InteractionStage::First), &mut hints, |_| {})
            .await
            .unwrap();

        assert_eq!(page.current_url(), TARGET);
        assert!(!page.calls_matching("go_back").is_empty());
        let pages = store.ranked_pages();
        assert_eq!(
            pages,
            vec![
                TARGET.to_string(),
                "https://v.example/watch/2".to_string(),
                "https://ads.example/landing".to_string(),
                "https://player.example/embed/9".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_page_is_flagged() {
        let page = MockPage::new("about:blank");
        page.serve(TARGET, "<html><body>ERR_BLOCKED_BY_CLIENT</body></html>");
        let driver = MockDriver::new(vec![page.clone()]);

        let store = Arc::new(CandidateStore::new(TARGET));
        let rules = RuleSet::default().resolve(TARGET);
        let stop = StopSignal::new();
        let session = DiscoverySession::new(TARGET, store.clone(), 1, &rules, &stop);
        let mut hints = SessionHints::new(TARGET, "ua");
        let options = launch_options(TARGET, "ua", true, &ProxySettings::default());

        let report = session
            .run(&driver, &options, plan(1, InteractionStage::Disabled), &mut hints, |_| {})
            .await
            .unwrap();
        assert!(report.blocked);
        assert!(store.is_blocked());
        assert!(page.calls_matching("click").is_empty());
    }

    #[tokio::test]
    async fn navigation_failure_fails_the_attempt_and_closes() {
        let page = MockPage::new("about:blank");
        page.fail_calls("goto");
        let driver = MockDriver::new(vec![page.clone()]);
        let store = Arc::new(CandidateStore::new(TARGET));
        let rules = RuleSet::default().resolve(TARGET);
        let stop = StopSignal::new();
        let session = DiscoverySession::new(TARGET, store, 1, &rules, &stop);
        let mut hints = SessionHints::new(TARGET, "ua");
        let options = launch_options(TARGET, "ua", true, &ProxySettings::default());

        let err = session
            .run(&driver, &options, plan(1, InteractionStage::First), &mut hints, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Page { .. }));
        assert_eq!(page.calls_matching("close").len(), 1);
    }
}
