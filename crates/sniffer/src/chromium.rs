//! Chrome DevTools backend for [`BrowserDriver`].
//!
//! Every `open` launches a fresh browser process with one page. DOM work is
//! done with injected scripts; frames are reached through
//! `iframe.contentDocument`, so only same-origin frames are scriptable.
//! Input is dispatched as real CDP mouse and key events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetLocaleOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton as CdpMouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, Headers, RequestId, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::hints::CookieHint;
use crate::page::{
    BrowserDriver, FrameInfo, LaunchOptions, LoadState, MouseButton, NetworkEvent, OpenedPage,
    PageHandle, Scope, Viewport,
};
use crate::session::is_text_like;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const POPUP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const FRAME_SELECTOR: &str = "iframe,frame";

/// Launches Chrome or Chromium through chromiumoxide.
#[derive(Debug, Clone, Default)]
pub struct ChromiumDriver {
    executable: Option<std::path::PathBuf>,
}

impl ChromiumDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self, options: &LaunchOptions) -> Result<OpenedPage, ProbeError> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport.width, options.viewport.height)
            .request_timeout(options.default_timeout);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &options.args {
            builder = builder.arg(arg.as_str());
        }
        builder = builder.arg(format!("--lang={}", options.locale));
        let config = builder.build().map_err(ProbeError::browser_launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ProbeError::browser_launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(ProbeError::browser_launch(e.to_string()));
            }
        };
        if let Err(e) = prepare_page(&page, options).await {
            handler_task.abort();
            return Err(e);
        }

        let (sender, events) = mpsc::unbounded_channel();
        let browser = Arc::new(tokio::sync::Mutex::new(browser));
        let inflight = Arc::new(AtomicUsize::new(0));
        let mut tasks = vec![handler_task];
        tasks.extend(spawn_network_watchers(&page, sender.clone(), inflight.clone()).await?);
        tasks.push(spawn_popup_watcher(browser.clone(), page.clone(), sender));

        Ok(OpenedPage {
            page: Box::new(ChromiumPage {
                browser,
                page,
                viewport: options.viewport,
                default_timeout: options.default_timeout,
                inflight,
                tasks: Mutex::new(tasks),
            }),
            events,
        })
    }
}

async fn prepare_page(page: &Page, options: &LaunchOptions) -> Result<(), ProbeError> {
    page.set_user_agent(options.user_agent.as_str())
        .await
        .map_err(cdp_error)?;

    if !options.headers.is_empty() {
        let headers: serde_json::Map<String, Value> = options
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(Value::Object(
            headers,
        ))))
        .await
        .map_err(cdp_error)?;
    }

    let locale = SetLocaleOverrideParams::builder()
        .locale(options.locale.clone())
        .build();
    if let Err(e) = page.execute(locale).await {
        debug!(error = %e, "locale override not applied");
    }

    if let Some(script) = &options.init_script {
        page.evaluate_on_new_document(script.as_str())
            .await
            .map_err(cdp_error)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct PendingResponse {
    url: String,
    status: u16,
    content_type: String,
    referer: Option<String>,
}

fn header_value(headers: &Headers, name: &str) -> Option<String> {
    headers.inner().as_object().and_then(|map| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_str().map(str::to_string))
    })
}

async fn spawn_network_watchers(
    page: &Page,
    sender: mpsc::UnboundedSender<NetworkEvent>,
    inflight: Arc<AtomicUsize>,
) -> Result<Vec<JoinHandle<()>>, ProbeError> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(cdp_error)?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(cdp_error)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(cdp_error)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(cdp_error)?;

    let referers: Arc<Mutex<HashMap<RequestId, Option<String>>>> = Arc::default();
    let pending: Arc<Mutex<HashMap<RequestId, PendingResponse>>> = Arc::default();
    let mut tasks = Vec::new();

    {
        let sender = sender.clone();
        let referers = referers.clone();
        let inflight = inflight.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let referer = header_value(&event.request.headers, "referer");
                if let Some(redirect) = &event.redirect_response {
                    let _ = sender.send(NetworkEvent::Response {
                        url: redirect.url.clone(),
                        status: u16::try_from(redirect.status).unwrap_or_default(),
                        location: header_value(&redirect.headers, "location"),
                        content_type: redirect.mime_type.clone(),
                        referer: referer.clone(),
                        body: None,
                    });
                } else {
                    inflight.fetch_add(1, Ordering::SeqCst);
                }
                referers
                    .lock()
                    .insert(event.request_id.clone(), referer.clone());
                let _ = sender.send(NetworkEvent::Request {
                    url: event.request.url.clone(),
                    referer,
                });
            }
        }));
    }

    {
        let sender = sender.clone();
        let referers = referers.clone();
        let pending = pending.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let response = &event.response;
                let referer = referers.lock().get(&event.request_id).cloned().flatten();
                let entry = PendingResponse {
                    url: response.url.clone(),
                    status: u16::try_from(response.status).unwrap_or_default(),
                    content_type: response.mime_type.clone(),
                    referer,
                };
                if is_text_like(&entry.content_type) {
                    pending.lock().insert(event.request_id.clone(), entry);
                } else {
                    let _ = sender.send(NetworkEvent::Response {
                        url: entry.url,
                        status: entry.status,
                        location: header_value(&response.headers, "location"),
                        content_type: entry.content_type,
                        referer: entry.referer,
                        body: None,
                    });
                }
            }
        }));
    }

    {
        let sender = sender.clone();
        let pending = pending.clone();
        let referers = referers.clone();
        let inflight = inflight.clone();
        let page = page.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                release(&inflight);
                referers.lock().remove(&event.request_id);
                let entry = pending.lock().remove(&event.request_id);
                let Some(entry) = entry else { continue };
                let body = page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                    .ok()
                    .filter(|r| !r.result.base64_encoded)
                    .map(|r| r.result.body.clone());
                let _ = sender.send(NetworkEvent::Response {
                    url: entry.url,
                    status: entry.status,
                    location: None,
                    content_type: entry.content_type,
                    referer: entry.referer,
                    body,
                });
            }
        }));
    }

    tasks.push(tokio::spawn(async move {
        while let Some(event) = failed.next().await {
            release(&inflight);
            referers.lock().remove(&event.request_id);
            let entry = pending.lock().remove(&event.request_id);
            let url = entry.map(|e| e.url).unwrap_or_default();
            let _ = sender.send(NetworkEvent::RequestFailed {
                url,
                error_text: event.error_text.clone(),
            });
        }
    }));

    Ok(tasks)
}

fn release(inflight: &AtomicUsize) {
    let _ = inflight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

/// Popups are read and closed as soon as they appear.
fn spawn_popup_watcher(
    browser: Arc<tokio::sync::Mutex<Browser>>,
    main: Page,
    sender: mpsc::UnboundedSender<NetworkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let main_target = main.target_id().clone();
        loop {
            tokio::time::sleep(POPUP_POLL_INTERVAL).await;
            let pages = {
                let browser = browser.lock().await;
                match browser.pages().await {
                    Ok(pages) => pages,
                    Err(_) => break,
                }
            };
            for popup in pages.into_iter().filter(|p| *p.target_id() != main_target) {
                let url = popup.url().await.ok().flatten().unwrap_or_default();
                let content = popup.content().await.ok();
                debug!(url = %url, "closing popup");
                if let Err(e) = popup.close().await {
                    debug!(error = %e, "popup close failed");
                }
                if sender.send(NetworkEvent::Popup { url, content }).is_err() {
                    return;
                }
            }
        }
    })
}

fn cdp_error(error: impl std::fmt::Display) -> ProbeError {
    ProbeError::page(error.to_string())
}

fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Expression resolving to the document of `scope`.
fn document_expr(scope: Scope) -> String {
    match scope {
        Scope::Main => "document".to_string(),
        Scope::Frame(index) => format!(
            "((document.querySelectorAll({}))[{index}] || {{}}).contentDocument",
            js_string(FRAME_SELECTOR)
        ),
    }
}

/// Offset of `scope` relative to the top-level viewport.
fn offset_expr(scope: Scope) -> String {
    match scope {
        Scope::Main => "{ left: 0, top: 0 }".to_string(),
        Scope::Frame(index) => format!(
            "(document.querySelectorAll({})[{index}]).getBoundingClientRect()",
            js_string(FRAME_SELECTOR)
        ),
    }
}

/// Wraps `body` so it runs with `doc` bound to the scope's document and
/// `el` to the `index`-th match of `selector` (possibly undefined).
fn element_script(scope: Scope, selector: &str, index: usize, body: &str) -> String {
    format!(
        "(() => {{ const doc = {doc}; if (!doc) throw new Error('frame is not accessible'); \
         const el = doc.querySelectorAll({sel})[{index}]; {body} }})()",
        doc = document_expr(scope),
        sel = js_string(selector),
    )
}

const VISIBLE_BODY: &str = "if (!el) return false; \
    const style = (el.ownerDocument.defaultView || window).getComputedStyle(el); \
    const rect = el.getBoundingClientRect(); \
    return style.visibility !== 'hidden' && style.display !== 'none' \
        && rect.width > 0 && rect.height > 0;";

pub struct ChromiumPage {
    browser: Arc<tokio::sync::Mutex<Browser>>,
    page: Page,
    viewport: Viewport,
    default_timeout: Duration,
    inflight: Arc<AtomicUsize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumPage {
    async fn eval(&self, expression: String) -> Result<Value, ProbeError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ProbeError::page)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(cdp_error)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Viewport coordinates of the element center after scrolling it into
    /// view, waiting up to `timeout` for it to become visible.
    async fn locate(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(f64, f64), ProbeError> {
        let body = format!(
            "{{ const visible = (() => {{ {VISIBLE_BODY} }})(); if (!visible) return null; \
             el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
             const r = el.getBoundingClientRect(); const o = {offset}; \
             return {{ x: o.left + r.left + r.width / 2, y: o.top + r.top + r.height / 2 }}; }}",
            offset = offset_expr(scope),
        );
        let script = element_script(scope, selector, index, &body);
        let timeout = if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let point = self.eval(script.clone()).await?;
            if let (Some(x), Some(y)) = (
                point.get("x").and_then(Value::as_f64),
                point.get("y").and_then(Value::as_f64),
            ) {
                return Ok((x, y));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProbeError::timeout(format!(
                    "element `{selector}` #{index} not visible"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn dispatch_mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        button: CdpMouseButton,
        click_count: i64,
    ) -> Result<(), ProbeError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(button)
            .click_count(click_count)
            .build()
            .map_err(ProbeError::page)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    /// Poll `document.readyState` until `accept` holds.
    async fn wait_ready_state(
        &self,
        timeout: Duration,
        what: &str,
        accept: fn(&str) -> bool,
    ) -> Result<(), ProbeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if accept(&self.ready_state().await?) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProbeError::timeout(what.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_network_idle(&self, timeout: Duration) -> Result<(), ProbeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut quiet_since = None;
        loop {
            if self.inflight.load(Ordering::SeqCst) > 0 {
                quiet_since = None;
            } else if quiet_since
                .get_or_insert_with(tokio::time::Instant::now)
                .elapsed()
                >= NETWORK_QUIET
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProbeError::timeout("network idle"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ready_state(&self) -> Result<String, ProbeError> {
        Ok(self
            .eval("document.readyState".to_string())
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

fn cdp_button(button: MouseButton) -> CdpMouseButton {
    match button {
        MouseButton::Left => CdpMouseButton::Left,
        MouseButton::Right => CdpMouseButton::Right,
        MouseButton::Middle => CdpMouseButton::Middle,
    }
}

/// (key, code, text, virtual key code) for the keys rules press.
fn key_definition(key: &str) -> (String, String, Option<String>, i64) {
    match key {
        "Space" | " " => (" ".into(), "Space".into(), Some(" ".into()), 32),
        "Enter" => ("Enter".into(), "Enter".into(), Some("\r".into()), 13),
        "Escape" => ("Escape".into(), "Escape".into(), None, 27),
        "Tab" => ("Tab".into(), "Tab".into(), None, 9),
        "ArrowLeft" => ("ArrowLeft".into(), "ArrowLeft".into(), None, 37),
        "ArrowUp" => ("ArrowUp".into(), "ArrowUp".into(), None, 38),
        "ArrowRight" => ("ArrowRight".into(), "ArrowRight".into(), None, 39),
        "ArrowDown" => ("ArrowDown".into(), "ArrowDown".into(), None, 40),
        other => {
            let code = other
                .chars()
                .next()
                .filter(|_| other.chars().count() == 1)
                .map(|c| c.to_ascii_uppercase() as i64)
                .unwrap_or_default();
            let text = (other.chars().count() == 1).then(|| other.to_string());
            (other.to_string(), other.to_string(), text, code)
        }
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn url(&self) -> Result<String, ProbeError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(cdp_error)?
            .unwrap_or_default())
    }

    async fn content(&self) -> Result<String, ProbeError> {
        self.page.content().await.map_err(cdp_error)
    }

    async fn goto(
        &self,
        url: &str,
        wait_until: LoadState,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| ProbeError::navigation(url, e))?;
        let started = tokio::time::Instant::now();
        let response = tokio::time::timeout(timeout, self.page.execute(params))
            .await
            .map_err(|_| ProbeError::navigation(url, "timed out"))?
            .map_err(|e| ProbeError::navigation(url, e.to_string()))?;
        if let Some(error) = response.result.error_text.clone() {
            return Err(ProbeError::navigation(url, error));
        }
        let remaining = timeout.saturating_sub(started.elapsed());
        self.wait_for_load_state(wait_until, remaining)
            .await
            .map_err(|e| ProbeError::navigation(url, e.to_string()))
    }

    async fn go_back(&self, timeout: Duration) -> Result<(), ProbeError> {
        let before = self.url().await?;
        self.eval("history.back()".to_string()).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        while self.url().await? == before {
            if tokio::time::Instant::now() >= deadline {
                return Err(ProbeError::timeout("history navigation"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.wait_for_load_state(LoadState::DomContentLoaded, remaining)
            .await
    }

    async fn wait_for_load_state(
        &self,
        state: LoadState,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        match state {
            LoadState::Commit => Ok(()),
            LoadState::DomContentLoaded => {
                self.wait_ready_state(timeout, "DOMContentLoaded", |s| s != "loading")
                    .await
            }
            LoadState::Load => {
                self.wait_ready_state(timeout, "load", |s| s == "complete")
                    .await
            }
            LoadState::NetworkIdle => self.wait_network_idle(timeout).await,
        }
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, ProbeError> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map((f) => {{ \
             try {{ return f.contentWindow.location.href; }} catch (e) {{ return f.src || ''; }} }})",
            js_string(FRAME_SELECTOR)
        );
        let urls = self.eval(script).await?;
        Ok(urls
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(index, url)| FrameInfo {
                        scope: Scope::Frame(index),
                        url: url.as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, scope: Scope, selector: &str) -> Result<usize, ProbeError> {
        let script = format!(
            "(() => {{ const doc = {}; return doc ? doc.querySelectorAll({}).length : 0; }})()",
            document_expr(scope),
            js_string(selector)
        );
        let count = self.eval(script).await?;
        Ok(count.as_u64().unwrap_or_default() as usize)
    }

    async fn is_visible(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        _timeout: Duration,
    ) -> Result<bool, ProbeError> {
        let script = element_script(scope, selector, index, VISIBLE_BODY);
        Ok(self.eval(script).await?.as_bool().unwrap_or(false))
    }

    async fn click(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let (x, y) = self.locate(scope, selector, index, timeout).await?;
        self.mouse_click(x, y, MouseButton::Left, 1, Duration::ZERO)
            .await
    }

    async fn hover(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let (x, y) = self.locate(scope, selector, index, timeout).await?;
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y, CdpMouseButton::None, 0)
            .await
    }

    async fn fill(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        value: &str,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.locate(scope, selector, index, timeout).await?;
        let body = format!(
            "if (!el) return false; el.focus(); el.value = {}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
            js_string(value)
        );
        self.eval(element_script(scope, selector, index, &body))
            .await?;
        Ok(())
    }

    async fn press_on(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        key: &str,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        self.locate(scope, selector, index, timeout).await?;
        self.eval(element_script(
            scope,
            selector,
            index,
            "if (el) el.focus(); return !!el;",
        ))
        .await?;
        self.press_key(key).await
    }

    async fn eval_on_selector_all(
        &self,
        scope: Scope,
        selector: &str,
        script: &str,
        arg: Option<&Value>,
    ) -> Result<Value, ProbeError> {
        let expression = format!(
            "(() => {{ const doc = {doc}; if (!doc) throw new Error('frame is not accessible'); \
             const els = Array.from(doc.querySelectorAll({sel})); return ({script})(els, {arg}); }})()",
            doc = document_expr(scope),
            sel = js_string(selector),
            arg = arg.cloned().unwrap_or(Value::Null),
        );
        self.eval(expression).await
    }

    async fn evaluate(&self, script: &str, arg: Option<&Value>) -> Result<Value, ProbeError> {
        let expression = format!(
            "(() => {{ const f = ({script}); return typeof f === 'function' ? f({arg}) : f; }})()",
            arg = arg.cloned().unwrap_or(Value::Null),
        );
        self.eval(expression).await
    }

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> Result<(), ProbeError> {
        let (x, y) = self.viewport.center();
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .build()
            .map_err(ProbeError::page)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
        delay: Duration,
    ) -> Result<(), ProbeError> {
        let button = cdp_button(button);
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y, CdpMouseButton::None, 0)
            .await?;
        for count in 1..=click_count.max(1) {
            let count = i64::from(count);
            self.dispatch_mouse(DispatchMouseEventType::MousePressed, x, y, button.clone(), count)
                .await?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.dispatch_mouse(DispatchMouseEventType::MouseReleased, x, y, button.clone(), count)
                .await?;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), ProbeError> {
        let (key, code, text, virtual_code) = key_definition(key);
        let mut down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key.clone())
            .code(code.clone())
            .windows_virtual_key_code(virtual_code);
        if let Some(text) = text {
            down = down.text(text);
        }
        self.page
            .execute(down.build().map_err(ProbeError::page)?)
            .await
            .map_err(cdp_error)?;
        let up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key)
            .code(code)
            .windows_virtual_key_code(virtual_code)
            .build()
            .map_err(ProbeError::page)?;
        self.page.execute(up).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn viewport(&self) -> Option<Viewport> {
        Some(self.viewport)
    }

    async fn cookies(&self) -> Result<Vec<CookieHint>, ProbeError> {
        let cookies = self.page.get_cookies().await.map_err(cdp_error)?;
        Ok(cookies
            .into_iter()
            .map(|c| CookieHint {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn close(&self) -> Result<(), ProbeError> {
        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "page close failed");
        }
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close failed");
            }
            let _ = browser.wait().await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }
}
