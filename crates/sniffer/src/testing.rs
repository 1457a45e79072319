//! In-memory page and driver used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::ProbeError;
use crate::hints::CookieHint;
use crate::page::{
    BrowserDriver, FrameInfo, LaunchOptions, LoadState, MouseButton, NetworkEvent, OpenedPage,
    PageHandle, Scope, Viewport,
};

#[derive(Default)]
struct MockState {
    url: String,
    history: Vec<String>,
    content: String,
    documents: HashMap<String, String>,
    traffic: HashMap<String, Vec<NetworkEvent>>,
    frames: Vec<String>,
    elements: HashMap<(Scope, String), Vec<bool>>,
    anchors: Vec<String>,
    click_target: Option<String>,
    viewport: Option<Viewport>,
    cookies: Vec<CookieHint>,
    failing: HashSet<String>,
    calls: Vec<String>,
    events: Option<mpsc::UnboundedSender<NetworkEvent>>,
}

fn scope_label(scope: Scope) -> String {
    match scope {
        Scope::Main => "main".to_string(),
        Scope::Frame(i) => format!("frame{i}"),
    }
}

/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                url: url.to_string(),
                viewport: Some(Viewport::DEFAULT),
                ..MockState::default()
            })),
        }
    }

    pub fn add_elements(&self, scope: Scope, selector: &str, visibility: &[bool]) {
        self.state
            .lock()
            .elements
            .insert((scope, selector.to_string()), visibility.to_vec());
    }

    pub fn add_frame(&self, url: &str) {
        self.state.lock().frames.push(url.to_string());
    }

    pub fn set_viewport(&self, viewport: Option<Viewport>) {
        self.state.lock().viewport = viewport;
    }

    /// Document served when `url` is navigated to.
    pub fn serve(&self, url: &str, html: &str) {
        self.state
            .lock()
            .documents
            .insert(url.to_string(), html.to_string());
    }

    /// Network events emitted when `url` is navigated to.
    pub fn traffic(&self, url: &str, events: Vec<NetworkEvent>) {
        self.state.lock().traffic.insert(url.to_string(), events);
    }

    pub fn set_anchors(&self, anchors: &[&str]) {
        self.state.lock().anchors = anchors.iter().map(|a| a.to_string()).collect();
    }

    /// The next successful click navigates to `url`.
    pub fn navigate_on_click(&self, url: &str) {
        self.state.lock().click_target = Some(url.to_string());
    }

    pub fn set_cookies(&self, cookies: Vec<CookieHint>) {
        self.state.lock().cookies = cookies;
    }

    pub fn fail_calls(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    pub fn current_url(&self) -> String {
        self.state.lock().url.clone()
    }

    /// Recorded calls whose operation name is `name`.
    pub fn calls_matching(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(name))
            .cloned()
            .collect()
    }

    fn attach(&self, sender: mpsc::UnboundedSender<NetworkEvent>) {
        self.state.lock().events = Some(sender);
    }

    fn record(&self, name: &str, detail: String) -> Result<(), ProbeError> {
        let mut state = self.state.lock();
        let call = if detail.is_empty() {
            name.to_string()
        } else {
            format!("{name} {detail}")
        };
        state.calls.push(call);
        if state.failing.contains(name) {
            return Err(ProbeError::page(format!("{name} failed")));
        }
        Ok(())
    }

    fn navigate(&self, url: &str) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.url, url.to_string());
        state.history.push(previous);
        if let Some(html) = state.documents.get(url).cloned() {
            state.content = html;
        }
        let traffic = state.traffic.get(url).cloned().unwrap_or_default();
        if let Some(sender) = &state.events {
            for event in traffic {
                let _ = sender.send(event);
            }
        }
    }

    fn element_visible(&self, scope: Scope, selector: &str, index: usize) -> bool {
        self.state
            .lock()
            .elements
            .get(&(scope, selector.to_string()))
            .and_then(|v| v.get(index).copied())
            .unwrap_or(false)
    }
}

#[async_trait]
impl PageHandle for MockPage {
    async fn url(&self) -> Result<String, ProbeError> {
        self.record("url", String::new())?;
        Ok(self.current_url())
    }

    async fn content(&self) -> Result<String, ProbeError> {
        self.record("content", String::new())?;
        Ok(self.state.lock().content.clone())
    }

    async fn goto(
        &self,
        url: &str,
        _wait_until: LoadState,
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.record("goto", url.to_string())?;
        self.navigate(url);
        Ok(())
    }

    async fn go_back(&self, _timeout: Duration) -> Result<(), ProbeError> {
        self.record("go_back", String::new())?;
        let mut state = self.state.lock();
        match state.history.pop() {
            Some(previous) => {
                state.url = previous;
                Ok(())
            }
            None => Err(ProbeError::page("no history")),
        }
    }

    async fn wait_for_load_state(
        &self,
        state: LoadState,
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.record("wait_for_load_state", state.to_string())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, ProbeError> {
        self.record("frames", String::new())?;
        Ok(self
            .state
            .lock()
            .frames
            .iter()
            .enumerate()
            .map(|(i, url)| FrameInfo {
                scope: Scope::Frame(i),
                url: url.clone(),
            })
            .collect())
    }

    async fn count(&self, scope: Scope, selector: &str) -> Result<usize, ProbeError> {
        Ok(self
            .state
            .lock()
            .elements
            .get(&(scope, selector.to_string()))
            .map_or(0, Vec::len))
    }

    async fn is_visible(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        _timeout: Duration,
    ) -> Result<bool, ProbeError> {
        Ok(self.element_visible(scope, selector, index))
    }

    async fn click(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.record("click", format!("{} {selector} #{index}", scope_label(scope)))?;
        let target = self.state.lock().click_target.take();
        if let Some(target) = target {
            self.navigate(&target);
        }
        Ok(())
    }

    async fn hover(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.record("hover", format!("{} {selector} #{index}", scope_label(scope)))
    }

    async fn fill(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        value: &str,
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.record(
            "fill",
            format!("{} {selector} #{index} {value}", scope_label(scope)),
        )
    }

    async fn press_on(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        key: &str,
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.record(
            "press_on",
            format!("{} {selector} #{index} {key}", scope_label(scope)),
        )
    }

    async fn eval_on_selector_all(
        &self,
        scope: Scope,
        selector: &str,
        _script: &str,
        _arg: Option<&Value>,
    ) -> Result<Value, ProbeError> {
        self.record(
            "eval_on_selector_all",
            format!("{} {selector}", scope_label(scope)),
        )?;
        if selector == "a[href]" {
            return Ok(json!(self.state.lock().anchors));
        }
        Ok(json!(self.count(scope, selector).await?))
    }

    async fn evaluate(&self, script: &str, arg: Option<&Value>) -> Result<Value, ProbeError> {
        let detail = match arg {
            Some(arg) => format!("{script} {arg}"),
            None => script.to_string(),
        };
        self.record("evaluate", detail)?;
        Ok(Value::Null)
    }

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> Result<(), ProbeError> {
        self.record("mouse_wheel", format!("{delta_x} {delta_y}"))
    }

    async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
        _delay: Duration,
    ) -> Result<(), ProbeError> {
        self.record("mouse_click", format!("{x} {y} {button} {click_count}"))
    }

    async fn press_key(&self, key: &str) -> Result<(), ProbeError> {
        self.record("press_key", key.to_string())
    }

    async fn viewport(&self) -> Option<Viewport> {
        self.state.lock().viewport
    }

    async fn cookies(&self) -> Result<Vec<CookieHint>, ProbeError> {
        self.record("cookies", String::new())?;
        Ok(self.state.lock().cookies.clone())
    }

    async fn close(&self) -> Result<(), ProbeError> {
        let mut state = self.state.lock();
        state.calls.push("close".to_string());
        state.events = None;
        Ok(())
    }
}

/// Hands out prepared pages in order; opening past the end fails like a
/// browser that cannot start.
#[derive(Default)]
pub struct MockDriver {
    pages: Mutex<VecDeque<MockPage>>,
    launches: Mutex<Vec<LaunchOptions>>,
}

impl MockDriver {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            launches: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> Vec<LaunchOptions> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn open(&self, options: &LaunchOptions) -> Result<OpenedPage, ProbeError> {
        self.launches.lock().push(options.clone());
        let page = self
            .pages
            .lock()
            .pop_front()
            .ok_or_else(|| ProbeError::browser_launch("no browser available"))?;
        let (sender, events) = mpsc::unbounded_channel();
        page.attach(sender);
        Ok(OpenedPage {
            page: Box::new(page),
            events,
        })
    }
}
