//! Browser seam.
//!
//! Discovery logic never talks to a browser directly. It drives a
//! [`PageHandle`] obtained from a [`BrowserDriver`] and consumes the
//! [`NetworkEvent`] stream that comes with it. The Chrome DevTools backend
//! lives in [`crate::chromium`] behind the `browser` feature; tests use an
//! in-memory page.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::mpsc;

use crate::error::ProbeError;
use crate::hints::CookieHint;

/// Where a DOM operation runs: the top-level document or one child frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Main,
    /// Index into the list returned by [`PageHandle::frames`].
    Frame(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub scope: Scope,
    pub url: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LoadState {
    Commit,
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const DEFAULT: Viewport = Viewport {
        width: 1366,
        height: 768,
    };

    /// Used when the page cannot report its viewport.
    pub const FALLBACK: Viewport = Viewport {
        width: 1280,
        height: 720,
    };

    pub fn center(&self) -> (f64, f64) {
        (f64::from(self.width / 2), f64::from(self.height / 2))
    }
}

/// What the browser saw on the wire, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Request {
        url: String,
        referer: Option<String>,
    },
    Response {
        url: String,
        status: u16,
        location: Option<String>,
        content_type: String,
        referer: Option<String>,
        /// Present only for text-like bodies the backend could read.
        body: Option<String>,
    },
    RequestFailed {
        url: String,
        error_text: String,
    },
    /// A popup window was opened, inspected and closed by the backend.
    Popup { url: String, content: Option<String> },
}

/// Everything needed to open one browser context.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub args: Vec<String>,
    pub user_agent: String,
    pub locale: String,
    pub viewport: Viewport,
    /// Extra request headers, user-agent excluded.
    pub headers: Vec<(String, String)>,
    pub init_script: Option<String>,
    pub default_timeout: Duration,
}

pub const HIDE_WEBDRIVER_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// One live page plus the stream of its network traffic.
pub struct OpenedPage {
    pub page: Box<dyn PageHandle>,
    pub events: mpsc::UnboundedReceiver<NetworkEvent>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, options: &LaunchOptions) -> Result<OpenedPage, ProbeError>;
}

/// Operations the interaction engine and the discovery session need from a
/// page. Element-level calls address the `index`-th match of `selector`
/// inside `scope`.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn url(&self) -> Result<String, ProbeError>;
    async fn content(&self) -> Result<String, ProbeError>;

    async fn goto(&self, url: &str, wait_until: LoadState, timeout: Duration)
    -> Result<(), ProbeError>;
    async fn go_back(&self, timeout: Duration) -> Result<(), ProbeError>;
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration)
    -> Result<(), ProbeError>;

    /// Child frames, main frame excluded.
    async fn frames(&self) -> Result<Vec<FrameInfo>, ProbeError>;

    async fn count(&self, scope: Scope, selector: &str) -> Result<usize, ProbeError>;
    async fn is_visible(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<bool, ProbeError>;
    async fn click(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(), ProbeError>;
    async fn hover(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(), ProbeError>;
    async fn fill(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        value: &str,
        timeout: Duration,
    ) -> Result<(), ProbeError>;
    async fn press_on(
        &self,
        scope: Scope,
        selector: &str,
        index: usize,
        key: &str,
        timeout: Duration,
    ) -> Result<(), ProbeError>;

    /// Run `script` as a function of the matching element array (and `arg`).
    async fn eval_on_selector_all(
        &self,
        scope: Scope,
        selector: &str,
        script: &str,
        arg: Option<&Value>,
    ) -> Result<Value, ProbeError>;
    /// Run `script` in the main frame; function expressions receive `arg`.
    async fn evaluate(&self, script: &str, arg: Option<&Value>) -> Result<Value, ProbeError>;

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> Result<(), ProbeError>;
    async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
        delay: Duration,
    ) -> Result<(), ProbeError>;
    async fn press_key(&self, key: &str) -> Result<(), ProbeError>;

    async fn viewport(&self) -> Option<Viewport>;
    async fn cookies(&self) -> Result<Vec<CookieHint>, ProbeError>;

    /// Poll granularity for interaction waits. Backends may override to use
    /// their own clock.
    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    async fn close(&self) -> Result<(), ProbeError>;
}

/// Driver used when no browser backend is compiled in. Every attempt fails
/// with [`ProbeError::BrowserUnavailable`], which leaves only the HTTP
/// fallback probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDriver;

#[async_trait]
impl BrowserDriver for UnavailableDriver {
    async fn open(&self, _options: &LaunchOptions) -> Result<OpenedPage, ProbeError> {
        Err(ProbeError::BrowserUnavailable)
    }
}
