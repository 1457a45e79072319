//! Executes compiled actions against a page.
//!
//! Every action is isolated: an error aborts that action only and is
//! logged, the remaining list still runs.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use stream_common::StopSignal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::action::{
    Action, ClickArgs, EvaluateArgs, FillArgs, GroupItem, HoverArgs, MatchMode, MouseClickArgs,
    ScrollArgs, SelectorCondition, SelectorState, Target, WaitGroup,
};
use super::set::ActiveRules;
use crate::error::ProbeError;
use crate::page::{PageHandle, Scope, Viewport};
use crate::url::normalize_url;

const PLAY_MEDIA_SCRIPT: &str = r#"(elements) => {
    let played = 0;
    elements.forEach((el) => {
        try {
            el.muted = true;
            el.preload = 'auto';
            if (typeof el.play === 'function') {
                el.play().catch(() => {});
                played += 1;
            }
        } catch (e) {}
    });
    return played;
}"#;

/// Quick visibility probe used by selector-state polling.
const STATE_PROBE_TIMEOUT: Duration = Duration::from_millis(120);
/// Only the first few matches are inspected for visibility states.
const STATE_PROBE_ELEMENTS: usize = 3;

/// Brings the page back after an interaction navigated it somewhere else.
#[async_trait]
pub trait Recovery: Send + Sync {
    async fn recover(&self, page: &dyn PageHandle, stable_url: &str);
}

pub struct Interpreter<'a> {
    page: &'a dyn PageHandle,
    stable_url: &'a str,
    recovery: &'a dyn Recovery,
}

impl<'a> Interpreter<'a> {
    pub fn new(page: &'a dyn PageHandle, stable_url: &'a str, recovery: &'a dyn Recovery) -> Self {
        Self {
            page,
            stable_url,
            recovery,
        }
    }

    /// Run every action enabled for `attempt`. Returns how many ran.
    pub async fn run_all(&self, rules: &ActiveRules, attempt: u32, tries: u32, stop: &StopSignal) -> usize {
        let mut executed = 0;
        for action in rules.for_attempt(attempt, tries) {
            if stop.is_stopped() {
                debug!("interaction interrupted by stop request");
                break;
            }
            executed += 1;
            if let Err(err) = self.run(action).await {
                warn!(action = action.name(), error = %err, "rule action failed");
            }
        }
        executed
    }

    pub async fn run(&self, action: &Action) -> Result<(), ProbeError> {
        match action {
            Action::Wait(args) => {
                self.page.pause(args.duration()).await;
                Ok(())
            }
            Action::PlayMedia(args) => {
                for scope in self.scopes(args.target()).await {
                    let _ = self
                        .page
                        .eval_on_selector_all(scope, "video, audio", PLAY_MEDIA_SCRIPT, None)
                        .await;
                }
                Ok(())
            }
            Action::Click(args) => self.click(args).await,
            Action::Hover(args) => self.hover(args).await,
            Action::Fill(args) => self.fill(args).await,
            Action::WaitForSelector(args) => {
                let met = self
                    .wait_for_condition(&args.condition(), args.timeout(), args.poll())
                    .await;
                debug!(met, "wait_for_selector finished");
                Ok(())
            }
            Action::WaitGroup(group) => {
                let met = self.wait_group(group).await;
                debug!(met, "wait_group finished");
                Ok(())
            }
            Action::WaitForLoadState(args) => {
                self.page
                    .wait_for_load_state(args.state(), args.timeout())
                    .await
            }
            Action::Goto(args) => {
                let target = normalize_url(args.url.trim(), Some(self.stable_url));
                if target.is_empty() {
                    return Ok(());
                }
                self.page
                    .goto(&target, args.wait_until(), args.timeout())
                    .await
            }
            Action::Evaluate(args) => self.evaluate(args).await,
            Action::Scroll(args) => self.scroll(args).await,
            Action::MouseClick(args) => self.mouse_click(args).await,
            Action::Press(args) => self.page.press_key(args.key.trim()).await,
            Action::Log(args) => {
                let message = args.message.trim();
                if !message.is_empty() {
                    info!(message, "rule action log");
                }
                Ok(())
            }
            Action::Unsupported(kind) => {
                warn!(kind = %kind, "rule action skipped: unknown type");
                Ok(())
            }
        }
    }

    async fn scopes(&self, target: Target) -> Vec<Scope> {
        let mut scopes = Vec::new();
        if target.includes_page() {
            scopes.push(Scope::Main);
        }
        if target.includes_frames() {
            match self.page.frames().await {
                Ok(frames) => scopes.extend(frames.into_iter().map(|f| f.scope)),
                Err(err) => debug!(error = %err, "frame listing failed"),
            }
        }
        scopes
    }

    async fn click(&self, args: &ClickArgs) -> Result<(), ProbeError> {
        let selectors = args.selectors();
        if selectors.is_empty() {
            return Ok(());
        }
        for _ in 0..args.repeat() {
            for scope in self.scopes(args.target()).await {
                self.click_first_visible(scope, &selectors, args).await;
            }
            self.page.pause(args.wait()).await;
        }
        Ok(())
    }

    /// Click the first visible match across `selectors`, then let the page
    /// settle and recover it if the click navigated away.
    async fn click_first_visible(&self, scope: Scope, selectors: &[String], args: &ClickArgs) -> bool {
        for selector in selectors {
            let Ok(count) = self.page.count(scope, selector).await else {
                continue;
            };
            for index in 0..count.min(args.max_per_selector()) {
                match self
                    .page
                    .is_visible(scope, selector, index, args.visible_timeout())
                    .await
                {
                    Ok(true) => {}
                    _ => continue,
                }
                if self
                    .page
                    .click(scope, selector, index, args.click_timeout())
                    .await
                    .is_err()
                {
                    continue;
                }
                debug!(selector = %selector, index, "clicked");
                self.page.pause(args.wait_after_click()).await;
                self.recovery.recover(self.page, self.stable_url).await;
                return true;
            }
        }
        false
    }

    async fn hover(&self, args: &HoverArgs) -> Result<(), ProbeError> {
        let selectors = args.selectors();
        if selectors.is_empty() {
            return Ok(());
        }
        for _ in 0..args.repeat() {
            for scope in self.scopes(args.target()).await {
                for selector in &selectors {
                    let Ok(count) = self.page.count(scope, selector).await else {
                        continue;
                    };
                    for index in 0..count.min(args.max_per_selector()) {
                        if !matches!(
                            self.page
                                .is_visible(scope, selector, index, args.visible_timeout())
                                .await,
                            Ok(true)
                        ) {
                            continue;
                        }
                        if self
                            .page
                            .hover(scope, selector, index, args.hover_timeout())
                            .await
                            .is_ok()
                        {
                            break;
                        }
                    }
                }
            }
            self.page.pause(args.wait()).await;
        }
        Ok(())
    }

    async fn fill(&self, args: &FillArgs) -> Result<(), ProbeError> {
        let selectors = args.selectors();
        for scope in self.scopes(args.target()).await {
            for selector in &selectors {
                let count = match self.page.count(scope, selector).await {
                    Ok(count) if count > 0 => count,
                    _ => continue,
                };
                let index = args.index().min(count - 1);
                if args.require_visible()
                    && !matches!(
                        self.page
                            .is_visible(scope, selector, index, args.visible_timeout())
                            .await,
                        Ok(true)
                    )
                {
                    continue;
                }
                if self
                    .page
                    .fill(scope, selector, index, &args.value, args.fill_timeout())
                    .await
                    .is_err()
                {
                    continue;
                }
                if let Some(key) = args.submit_key() {
                    if self
                        .page
                        .press_on(scope, selector, index, key, args.fill_timeout())
                        .await
                        .is_err()
                    {
                        continue;
                    }
                }
                return Ok(());
            }
        }
        Ok(())
    }

    async fn evaluate(&self, args: &EvaluateArgs) -> Result<(), ProbeError> {
        let script = args.script.trim();
        let Some(selector) = args.selector() else {
            self.page.evaluate(script, args.arg.as_ref()).await?;
            return Ok(());
        };
        for scope in self.scopes(args.target()).await {
            if self
                .page
                .eval_on_selector_all(scope, selector, script, args.arg.as_ref())
                .await
                .is_ok()
            {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn scroll(&self, args: &ScrollArgs) -> Result<(), ProbeError> {
        let x = args.x();
        for delta in args.deltas() {
            if let Err(err) = self.page.mouse_wheel(x, delta).await {
                debug!(error = %err, "wheel failed");
            }
            self.page.pause(args.wait_after_scroll()).await;
        }
        Ok(())
    }

    async fn mouse_click(&self, args: &MouseClickArgs) -> Result<(), ProbeError> {
        let viewport = self.page.viewport().await.unwrap_or(Viewport::FALLBACK);
        let (x, y) = args.point(viewport.center());
        self.page
            .mouse_click(x, y, args.button(), args.click_count(), args.delay())
            .await
    }

    async fn state_satisfied(&self, scope: Scope, selector: &str, state: SelectorState) -> bool {
        let Ok(count) = self.page.count(scope, selector).await else {
            return false;
        };
        match state {
            SelectorState::Attached => count > 0,
            SelectorState::Detached => count == 0,
            SelectorState::Visible | SelectorState::Hidden => {
                let mut any_visible = false;
                for index in 0..count.min(STATE_PROBE_ELEMENTS) {
                    if matches!(
                        self.page
                            .is_visible(scope, selector, index, STATE_PROBE_TIMEOUT)
                            .await,
                        Ok(true)
                    ) {
                        any_visible = true;
                        break;
                    }
                }
                if state == SelectorState::Visible {
                    any_visible
                } else {
                    !any_visible
                }
            }
        }
    }

    async fn condition_satisfied(&self, condition: &SelectorCondition) -> bool {
        if condition.selectors.is_empty() {
            return false;
        }
        let scopes = self.scopes(condition.target).await;
        let mut hits = 0;
        for selector in &condition.selectors {
            let mut hit = false;
            for scope in &scopes {
                if self.state_satisfied(*scope, selector, condition.state).await {
                    hit = true;
                    break;
                }
            }
            match (condition.match_mode, hit) {
                (MatchMode::Any, true) => return true,
                (MatchMode::All, false) => return false,
                _ => {}
            }
            hits += usize::from(hit);
        }
        condition.match_mode == MatchMode::All && hits == condition.selectors.len()
    }

    async fn wait_for_condition(
        &self,
        condition: &SelectorCondition,
        timeout: Duration,
        poll: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.condition_satisfied(condition).await {
                return true;
            }
            self.page.pause(poll).await;
        }
        self.condition_satisfied(condition).await
    }

    /// Poll the group until its mode is met or the timeout passes. Items
    /// latch once satisfied; timers count from the start of the wait.
    async fn wait_group(&self, group: &WaitGroup) -> bool {
        if group.items.is_empty() {
            return false;
        }
        let start = Instant::now();
        let deadline = start + group.timeout;
        let mut progress = Progress::for_items(&group.items);
        while Instant::now() < deadline {
            let elapsed = start.elapsed();
            if self
                .poll_items(&group.items, group.mode, &mut progress, elapsed)
                .await
            {
                return true;
            }
            self.page.pause(group.poll).await;
        }
        false
    }

    fn poll_items<'b>(
        &'b self,
        items: &'b [GroupItem],
        mode: MatchMode,
        progress: &'b mut Progress,
        elapsed: Duration,
    ) -> BoxFuture<'b, bool> {
        Box::pin(async move {
            for (index, item) in items.iter().enumerate() {
                if progress.done[index] {
                    continue;
                }
                let satisfied = match item {
                    GroupItem::Selector(condition) => self.condition_satisfied(condition).await,
                    GroupItem::Timer(delay) => elapsed >= *delay,
                    GroupItem::Group { mode, items } => {
                        self.poll_items(items, *mode, &mut progress.nested[index], elapsed)
                            .await
                    }
                };
                progress.done[index] = satisfied;
            }
            match mode {
                MatchMode::Any => progress.done.iter().any(|d| *d),
                MatchMode::All => progress.done.iter().all(|d| *d),
            }
        })
    }
}

#[derive(Debug, Default)]
struct Progress {
    done: Vec<bool>,
    nested: Vec<Progress>,
}

impl Progress {
    fn for_items(items: &[GroupItem]) -> Self {
        Self {
            done: vec![false; items.len()],
            nested: items
                .iter()
                .map(|item| match item {
                    GroupItem::Group { items, .. } => Progress::for_items(items),
                    _ => Progress::default(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::rules::action::compile;
    use crate::rules::model::RawAction;
    use crate::rules::{RuleDocument, RuleSet};
    use crate::testing::MockPage;

    #[derive(Default)]
    struct CountingRecovery(AtomicUsize);

    #[async_trait]
    impl Recovery for CountingRecovery {
        async fn recover(&self, _page: &dyn PageHandle, _stable_url: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn action(kind: &str, args: serde_json::Value) -> Action {
        compile(&RawAction::new(kind, args), "t", true).unwrap().action
    }

    const STABLE: &str = "https://v.example/watch/1";

    #[tokio::test(start_paused = true)]
    async fn click_hits_first_visible_and_recovers() {
        let page = MockPage::new(STABLE);
        page.add_elements(Scope::Main, ".play", &[false, true]);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);

        interp
            .run(&action("click", json!({ "selector": ".play", "repeat": 2 })))
            .await
            .unwrap();

        assert_eq!(page.calls_matching("click"), vec!["click main .play #1"; 2]);
        assert_eq!(recovery.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn click_respects_max_per_selector_and_frames() {
        let page = MockPage::new(STABLE);
        page.add_frame("https://player.example/embed");
        page.add_elements(Scope::Main, "video", &[false, false, true]);
        page.add_elements(Scope::Frame(0), "video", &[true]);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);

        interp
            .run(&action("click", json!({ "selectors": ["video"], "target": "all" })))
            .await
            .unwrap();
        assert_eq!(page.calls_matching("click"), vec!["click frame0 video #0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fill_then_submit() {
        let page = MockPage::new(STABLE);
        page.add_elements(Scope::Main, "input", &[true, true]);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        interp
            .run(&action(
                "fill",
                json!({ "selector": "input", "value": "abc", "index": 5, "submit_key": "Enter" }),
            ))
            .await
            .unwrap();
        assert_eq!(page.calls_matching("fill"), vec!["fill main input #1 abc"]);
        assert_eq!(page.calls_matching("press_on"), vec!["press_on main input #1 Enter"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_selector_times_out_without_error() {
        let page = MockPage::new(STABLE);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        let started = Instant::now();
        interp
            .run(&action("wait_for_selector", json!({ "selector": "video", "timeout_ms": 1000 })))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_group_any_is_met_by_timer() {
        let page = MockPage::new(STABLE);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        let group = WaitGroup {
            mode: MatchMode::Any,
            timeout: Duration::from_secs(5),
            poll: Duration::from_millis(100),
            items: vec![
                GroupItem::Timer(Duration::from_millis(300)),
                GroupItem::Selector(SelectorCondition {
                    selectors: vec!["video".into()],
                    state: SelectorState::Visible,
                    match_mode: MatchMode::Any,
                    target: Target::Page,
                }),
            ],
        };
        let started = Instant::now();
        assert!(interp.wait_group(&group).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_group_all_latches_items() {
        let page = MockPage::new(STABLE);
        page.add_elements(Scope::Main, "video", &[true]);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        let group = WaitGroup {
            mode: MatchMode::All,
            timeout: Duration::from_secs(2),
            poll: Duration::from_millis(150),
            items: vec![
                GroupItem::Selector(SelectorCondition {
                    selectors: vec!["video".into()],
                    state: SelectorState::Attached,
                    match_mode: MatchMode::All,
                    target: Target::Page,
                }),
                GroupItem::Group {
                    mode: MatchMode::Any,
                    items: vec![GroupItem::Timer(Duration::from_millis(400))],
                },
            ],
        };
        assert!(interp.wait_group(&group).await);

        let never = WaitGroup {
            items: vec![GroupItem::Selector(SelectorCondition {
                selectors: vec!["video".into()],
                state: SelectorState::Detached,
                match_mode: MatchMode::Any,
                target: Target::Page,
            })],
            ..group
        };
        assert!(!interp.wait_group(&never).await);
    }

    #[tokio::test(start_paused = true)]
    async fn mouse_click_uses_viewport_center() {
        let page = MockPage::new(STABLE);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        interp
            .run(&action("mouse_click", json!({ "position": { "x": "center", "y": "center" } })))
            .await
            .unwrap();
        assert_eq!(page.calls_matching("mouse_click"), vec!["mouse_click 683 384 left 1"]);

        page.set_viewport(None);
        interp
            .run(&action("mouse_click", json!({ "button": "middle" })))
            .await
            .unwrap();
        assert_eq!(page.calls_matching("mouse_click")[1], "mouse_click 640 360 middle 1");
    }

    #[tokio::test(start_paused = true)]
    async fn goto_resolves_against_stable_url() {
        let page = MockPage::new(STABLE);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        interp
            .run(&action("goto", json!({ "url": "../play/2" })))
            .await
            .unwrap();
        assert_eq!(page.calls_matching("goto"), vec!["goto https://v.example/play/2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_action_does_not_stop_the_list() {
        let page = MockPage::new(STABLE);
        page.fail_calls("press_key");
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);

        let rules = RuleSet::compile(&RuleDocument::default(), true)
            .unwrap()
            .resolve(STABLE);
        let executed = interp.run_all(&rules, 2, 3, &StopSignal::new()).await;
        assert_eq!(executed, 6);
        assert_eq!(page.calls_matching("press_key").len(), 1);
        assert_eq!(page.calls_matching("mouse_wheel").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_interrupts_the_list() {
        let page = MockPage::new(STABLE);
        let recovery = CountingRecovery::default();
        let interp = Interpreter::new(&page, STABLE, &recovery);
        let rules = RuleSet::default().resolve(STABLE);
        let stop = StopSignal::new();
        stop.request_stop();
        assert_eq!(interp.run_all(&rules, 1, 3, &stop).await, 0);
    }
}
