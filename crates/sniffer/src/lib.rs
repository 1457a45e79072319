//! # Sniffer Engine
//!
//! Discovers HLS manifest URLs hidden behind web video players.
//!
//! A [`Monitor`] drives a browser through a [`BrowserDriver`], watches the
//! page's network traffic, plays configurable interaction rules to coax
//! players into loading, and ranks every manifest URL it sees. When the
//! browser finds nothing, a plain HTTP probe scans the page and its scripts.
//! Pages discovered along the way can be explored recursively within fixed
//! node and cross-site budgets.
//!
//! ## Features
//!
//! - `browser`: Chrome DevTools backend ([`ChromiumDriver`]). Without it,
//!   [`default_driver`] returns a driver that always reports the browser as
//!   unavailable.

use std::sync::Arc;

pub mod candidates;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod hints;
pub mod monitor;
pub mod page;
pub mod recursion;
pub mod rules;
pub mod session;
#[cfg(test)]
mod testing;
pub mod url;

pub use candidates::{Candidate, CandidateKind, CandidateStore, priority_score};
#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;
pub use error::ProbeError;
pub use hints::{CookieHint, SessionHints};
pub use monitor::{
    EventSink, Monitor, MonitorConfig, MonitorEvent, MonitorOutcome, RecursionConfig,
};
pub use page::{BrowserDriver, UnavailableDriver};
pub use rules::{DEFAULT_RULES_FILE, RuleSet, load_rules, repair_rules_file};
pub use session::{InteractionStage, SessionStep, monitor_headers};
pub use url::normalize_url;

/// The browser backend this build was compiled with.
pub fn default_driver() -> Arc<dyn BrowserDriver> {
    #[cfg(feature = "browser")]
    {
        Arc::new(ChromiumDriver::new())
    }
    #[cfg(not(feature = "browser"))]
    {
        Arc::new(UnavailableDriver)
    }
}
