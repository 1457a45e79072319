//! Multi-attempt discovery for one target URL.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use stream_common::{DEFAULT_USER_AGENT, ProxySettings, StopSignal};
use tracing::{debug, info, warn};

use crate::candidates::CandidateStore;
use crate::error::ProbeError;
use crate::fallback::probe_quietly;
use crate::hints::SessionHints;
use crate::page::BrowserDriver;
use crate::recursion::explore;
use crate::rules::{ActiveRules, RuleSet};
use crate::session::{
    AttemptPlan, BLOCKED_BY_CLIENT, DiscoverySession, InteractionStage, SessionStep,
    launch_options, monitor_headers,
};

pub const HEADLESS_ENV: &str = "M3U8_MONITOR_HEADLESS";
pub const DEFAULT_TRIES: u32 = 3;
pub const MAX_TRIES: u32 = 5;

/// Discovery settings shared by a run and all of its recursive children.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Run the browser without a window
    pub headless: bool,

    /// Play the interaction rules on each attempt
    pub interaction_enabled: bool,

    /// Browser attempts per target (1-5)
    pub tries: u32,

    /// Rule document location; `None` uses the built-in rules
    pub rules_path: Option<PathBuf>,

    /// User agent for the browser and the HTTP fallback
    pub user_agent: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            headless: true,
            interaction_enabled: true,
            tries: DEFAULT_TRIES,
            rules_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Clamp the attempt count and apply the `M3U8_MONITOR_HEADLESS`
    /// environment override.
    pub fn normalized(&self) -> Self {
        let env = std::env::var(HEADLESS_ENV).ok();
        self.normalized_with(env.as_deref())
    }

    fn normalized_with(&self, headless_env: Option<&str>) -> Self {
        let mut config = self.clone();
        config.tries = config.tries.clamp(1, MAX_TRIES);
        if let Some(headless) = headless_env.and_then(parse_headless_override) {
            config.headless = headless;
        }
        if config.user_agent.trim().is_empty() {
            config.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        config
    }
}

/// Any non-empty value other than an explicit "off" word means headless.
fn parse_headless_override(value: &str) -> Option<bool> {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    Some(!matches!(value.as_str(), "0" | "false" | "off" | "no"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionConfig {
    pub enabled: bool,
    pub depth: u32,
}

impl Default for RecursionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: 1,
        }
    }
}

impl RecursionConfig {
    /// Effective depth; 1 means no recursion.
    pub fn depth(&self) -> u32 {
        if self.enabled { self.depth.max(1) } else { 1 }
    }
}

/// Observational progress events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Start {
        url: String,
        tries: u32,
    },
    AttemptStart {
        attempt: u32,
        tries: u32,
        stage: InteractionStage,
    },
    AttemptStep {
        attempt: u32,
        tries: u32,
        step: SessionStep,
    },
    Candidate {
        count: usize,
    },
    AttemptDone {
        attempt: u32,
        tries: u32,
        found: usize,
    },
    Done {
        found: usize,
    },
}

pub type EventSink = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorOutcome {
    /// Discovered manifest URLs, best first
    pub manifests: Vec<String>,
    /// Predicted sibling manifests not seen directly, best first
    pub predicted: Vec<String>,
    /// Page candidates, same-site first
    pub pages: Vec<String>,
    pub hints: SessionHints,
    pub last_error: Option<String>,
    pub blocked: bool,
}

impl MonitorOutcome {
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty() && self.predicted.is_empty()
    }
}

/// Runs browser attempts against one target and, when configured, the
/// bounded recursive crawl of the pages it found.
#[derive(Clone)]
pub struct Monitor {
    target_url: String,
    config: MonitorConfig,
    recursion: RecursionConfig,
    proxy: ProxySettings,
    rules: Arc<RuleSet>,
    driver: Arc<dyn BrowserDriver>,
    stop: StopSignal,
    events: Option<EventSink>,
}

impl Monitor {
    pub fn new(target_url: impl Into<String>, driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            target_url: target_url.into().trim().to_string(),
            config: MonitorConfig::default().normalized(),
            recursion: RecursionConfig::default(),
            proxy: ProxySettings::default(),
            rules: Arc::new(RuleSet::default()),
            driver,
            stop: StopSignal::new(),
            events: None,
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config.normalized();
        self
    }

    pub fn with_recursion(mut self, recursion: RecursionConfig) -> Self {
        self.recursion = recursion;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = proxy.normalized();
        self
    }

    pub fn with_rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn recursion_depth(&self) -> u32 {
        self.recursion.depth()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// A child monitor for a recursively explored page. Children share
    /// everything but the target and depth, and never recurse themselves.
    pub(crate) fn child(&self, target_url: &str, depth: u32) -> Self {
        Self {
            target_url: target_url.to_string(),
            recursion: RecursionConfig {
                enabled: true,
                depth,
            },
            events: None,
            ..self.clone()
        }
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(sink) = &self.events {
            sink(&event);
        }
    }

    /// Discovery plus recursion. Only cancellation is an error.
    pub async fn discover(&self) -> Result<MonitorOutcome, ProbeError> {
        let mut outcome = self.run_attempts().await?;
        if self.recursion.depth() > 1 {
            explore(self, &mut outcome).await?;
        }
        Ok(outcome)
    }

    /// The attempt loop for this target alone.
    pub async fn run_attempts(&self) -> Result<MonitorOutcome, ProbeError> {
        let tries = self.config.tries;
        let depth = self.recursion.depth();
        let rules = self.rules.resolve(&self.target_url);
        self.log_start(&rules, depth);
        self.emit(MonitorEvent::Start {
            url: self.target_url.clone(),
            tries,
        });

        let store = Arc::new(CandidateStore::new(self.target_url.clone()));
        let mut hints = SessionHints::new(self.target_url.clone(), self.config.user_agent.clone());
        let mut last_error = None;
        let options = launch_options(
            &self.target_url,
            &self.config.user_agent,
            self.config.headless,
            &self.proxy,
        );

        for attempt in 1..=tries {
            if self.stop.is_stopped() {
                return Err(ProbeError::Cancelled);
            }
            let stage = InteractionStage::for_attempt(attempt, self.config.interaction_enabled);
            info!(attempt, tries, stage = %stage, "monitor attempt");
            self.emit(MonitorEvent::AttemptStart {
                attempt,
                tries,
                stage,
            });

            let before = store.manifest_count();
            let session = DiscoverySession::new(&self.target_url, store.clone(), depth, &rules, &self.stop);
            let plan = AttemptPlan {
                attempt,
                tries,
                stage,
            };
            let result = session
                .run(self.driver.as_ref(), &options, plan, &mut hints, |step| {
                    self.emit(MonitorEvent::AttemptStep {
                        attempt,
                        tries,
                        step,
                    })
                })
                .await;

            let mut abort = false;
            match result {
                Ok(report) if report.blocked => {
                    info!(attempt, "blocked by client, next attempt will escalate");
                    last_error = Some(BLOCKED_BY_CLIENT.to_string());
                }
                Ok(_) => {}
                Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
                Err(e) => {
                    warn!(attempt, tries, error = %e, "monitor attempt failed");
                    abort = e.is_fatal();
                    last_error = Some(e.to_string());
                }
            }

            let found = store.manifest_count().saturating_sub(before);
            if found > 0 {
                self.emit(MonitorEvent::Candidate {
                    count: store.manifest_count(),
                });
            }
            self.emit(MonitorEvent::AttemptDone {
                attempt,
                tries,
                found,
            });

            if abort {
                break;
            }
            if store.has_strong_candidate() {
                debug!(attempt, "strong candidate found, skipping remaining attempts");
                break;
            }
        }

        if store.manifest_count() == 0 {
            if let Some(error) = &last_error {
                info!(error = %error, "monitor ended with last error");
            }
            let headers = monitor_headers(&self.target_url, &self.config.user_agent);
            probe_quietly(&store, &self.target_url, &headers, &self.proxy, &self.stop).await;
            hints.merge_referers(store.referer_map());
        }

        let outcome = MonitorOutcome {
            manifests: store.ranked_manifests(),
            predicted: store.ranked_predicted(),
            pages: store.ranked_pages(),
            hints,
            last_error,
            blocked: store.is_blocked(),
        };
        info!(
            url = %self.target_url,
            manifests = outcome.manifests.len(),
            predicted = outcome.predicted.len(),
            "monitor done"
        );
        self.emit(MonitorEvent::Done {
            found: outcome.manifests.len(),
        });
        Ok(outcome)
    }

    fn log_start(&self, rules: &ActiveRules, depth: u32) {
        info!(
            url = %self.target_url,
            headless = self.config.headless,
            recursion_depth = depth,
            interaction = self.config.interaction_enabled,
            tries = self.config.tries,
            "monitor started"
        );
        let source = rules
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string());
        if !self.config.interaction_enabled {
            info!("interaction disabled by config");
        } else if rules.is_empty() {
            info!(source = %source, "no interaction rules apply to this URL");
        } else {
            info!(
                source = %source,
                rule = %rules.name,
                matched_sites = rules.matched_sites.len(),
                actions = rules.actions.len(),
                "interaction rules active"
            );
        }
        if let Some(server) = self.proxy.server() {
            let user = if self.proxy.username.is_empty() {
                "(none)"
            } else {
                self.proxy.username.as_str()
            };
            info!(server = %server, user = %user, "using proxy");
            if !self.proxy.username.is_empty() || !self.proxy.password.is_empty() {
                warn!("browser proxy authentication is not supported, only HTTP probes send credentials");
            }
        }
    }
}
