//! One target from page URL to muxed file: discovery, candidate downloads
//! under the download mode, completion classification and the task log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use segfetch_engine::{
    CandidateEntry, CandidateStatus, CompletionPolicy, DownloadConfig, DownloadHints,
    DownloadMode, FetchError, MuxConfig, SegmentDownloadEngine, TaskLog, mux,
};
use serde::Serialize;
use sniffer_engine::{
    BrowserDriver, Monitor, MonitorConfig, MonitorOutcome, ProbeError, RecursionConfig, RuleSet,
    SessionHints,
};
use stream_common::{ProxySettings, StopSignal};
use tracing::{info, warn};
use url::Url;

use crate::error::Result;
use crate::progress::Progress;
use crate::target::Target;

/// Everything a job needs besides its target.
#[derive(Clone)]
pub struct JobSettings {
    pub output_dir: PathBuf,
    pub mode: DownloadMode,
    pub monitor: MonitorConfig,
    pub recursion: RecursionConfig,
    pub proxy: ProxySettings,
    pub rules: Arc<RuleSet>,
    pub driver: Arc<dyn BrowserDriver>,
    pub download: DownloadConfig,
    pub mux: MuxConfig,
    pub policy: CompletionPolicy,
}

impl JobSettings {
    /// Settings snapshot recorded in each task log.
    fn log_config(&self, name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "mode": self.mode,
            "headless": self.monitor.headless,
            "interaction": self.monitor.interaction_enabled,
            "tries": self.monitor.tries,
            "recursionDepth": self.recursion.depth(),
            "workers": self.download.effective_workers(),
            "baseRetries": self.download.base_retries,
            "extension": self.mux.extension,
            "proxy": self.proxy.server(),
            "maxMissingSegments": self.policy.max_missing_segments,
            "minSuccessRatio": self.policy.min_success_ratio,
        })
    }

    pub fn monitor_for(&self, url: &str) -> Monitor {
        Monitor::new(url, Arc::clone(&self.driver))
            .with_config(self.monitor.clone())
            .with_recursion(self.recursion)
            .with_proxy(self.proxy.clone())
            .with_rules(Arc::clone(&self.rules))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub url: String,
    pub name: String,
    pub folder: PathBuf,
    pub candidates: Vec<CandidateEntry>,
    pub monitor_error: Option<String>,
    pub interrupted: bool,
}

impl TargetSummary {
    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.candidates.iter().filter_map(|c| c.output.as_deref())
    }

    pub fn successes(&self) -> usize {
        self.candidates.iter().filter(|c| c.completed).count()
    }
}

pub struct Job {
    settings: Arc<JobSettings>,
    stop: StopSignal,
    progress: Progress,
}

impl Job {
    pub fn new(settings: Arc<JobSettings>, stop: StopSignal, progress: Progress) -> Self {
        Self {
            settings,
            stop,
            progress,
        }
    }

    async fn discover(&self, target: &Target) -> std::result::Result<MonitorOutcome, ProbeError> {
        if target.is_direct_manifest() {
            info!(url = %target.url, "target is a manifest, discovery skipped");
            let mut hints = SessionHints::new(target.url.clone(), String::new());
            hints
                .referer_map
                .insert(target.url.clone(), target.url.clone());
            return Ok(MonitorOutcome {
                manifests: vec![target.url.clone()],
                hints,
                ..MonitorOutcome::default()
            });
        }
        self.settings
            .monitor_for(&target.url)
            .with_stop(self.stop.clone())
            .with_events(self.progress.monitor_sink(&target.name))
            .discover()
            .await
    }

    pub async fn run(&self, target: &Target) -> Result<TargetSummary> {
        let settings = &self.settings;
        let folder = settings.output_dir.join(&target.name);
        std::fs::create_dir_all(&folder)?;

        let mut log = TaskLog::new(target.url.clone(), settings.log_config(&target.name));
        let mut summary = TargetSummary {
            url: target.url.clone(),
            name: target.name.clone(),
            folder: folder.clone(),
            candidates: Vec::new(),
            monitor_error: None,
            interrupted: false,
        };

        let outcome = match self.discover(target).await {
            Ok(outcome) => outcome,
            Err(ProbeError::Cancelled) => {
                log.monitor_error = Some(ProbeError::Cancelled.to_string());
                log.write(&folder)?;
                summary.monitor_error = log.monitor_error.clone();
                summary.interrupted = true;
                return Ok(summary);
            }
            Err(e) => {
                warn!(url = %target.url, error = %e, "discovery failed");
                MonitorOutcome {
                    last_error: Some(e.to_string()),
                    ..MonitorOutcome::default()
                }
            }
        };

        let candidates = candidate_list(&outcome);
        log.monitor_error = outcome.last_error.clone();
        log.candidates = candidates.iter().map(CandidateEntry::pending).collect();
        log.write(&folder)?;
        info!(
            url = %target.url,
            candidates = candidates.len(),
            mode = %settings.mode,
            "candidates collected"
        );

        let interrupted = self
            .download_candidates(target, &folder, &candidates, &outcome.hints, &mut log)
            .await?;

        summary.monitor_error = log.monitor_error.clone();
        summary.candidates = log.candidates;
        summary.interrupted = interrupted;
        Ok(summary)
    }

    /// Walk the candidates in rank order until the mode's success target is
    /// met. Returns whether a stop cut the walk short.
    async fn download_candidates(
        &self,
        target: &Target,
        folder: &Path,
        candidates: &[String],
        hints: &SessionHints,
        log: &mut TaskLog,
    ) -> Result<bool> {
        let settings = &self.settings;
        if settings.mode == DownloadMode::None {
            for entry in &mut log.candidates {
                entry.finish(CandidateStatus::SkippedNoDownload);
            }
            log.write(folder)?;
            return Ok(false);
        }

        let planned = settings
            .mode
            .target()
            .map_or(candidates.len(), |n| n.min(candidates.len()))
            .max(1);
        let mut successes = 0;
        let mut produced_output = false;
        let mut interrupted = false;
        let mut target_reached = false;

        for (index, url) in candidates.iter().enumerate() {
            if self.stop.is_stopped() {
                interrupted = true;
                break;
            }
            if successes >= planned {
                target_reached = true;
                break;
            }

            let name = if produced_output {
                format!("{}-{}", target.name, index + 1)
            } else {
                target.name.clone()
            };
            info!(candidate = index + 1, of = candidates.len(), url = %url, "downloading candidate");

            let entry = &mut log.candidates[index];
            let status = self.download_one(url, folder, &name, &target.url, hints, entry).await;
            entry.finish(status);
            if entry.output.is_some() {
                produced_output = true;
            }
            if status.is_success() {
                successes += 1;
            }
            if status == CandidateStatus::InterruptedDuringSegmentDownload {
                interrupted = true;
            }
            log.write(folder)?;
            if interrupted {
                break;
            }
        }

        if interrupted || self.stop.is_stopped() {
            interrupted = true;
        } else if successes >= planned {
            target_reached = true;
        }
        let leftover = if interrupted {
            Some(CandidateStatus::SkippedInterrupted)
        } else if target_reached {
            Some(CandidateStatus::SkippedTargetReached)
        } else {
            None
        };
        if let Some(status) = leftover {
            for entry in log
                .candidates
                .iter_mut()
                .filter(|e| e.status == CandidateStatus::Pending)
            {
                entry.finish(status);
            }
        }
        log.write(folder)?;
        Ok(interrupted)
    }

    async fn download_one(
        &self,
        url: &str,
        folder: &Path,
        name: &str,
        target_url: &str,
        hints: &SessionHints,
        entry: &mut CandidateEntry,
    ) -> CandidateStatus {
        let settings = &self.settings;
        let config = DownloadConfig {
            proxy: settings.proxy.clone(),
            hints: download_hints(hints, url, target_url),
            ..settings.download.clone()
        };
        let engine = SegmentDownloadEngine::new(config)
            .with_stop(self.stop.clone())
            .with_events(self.progress.download_sink(name));

        let report = match engine.download(url, folder).await {
            Ok(report) => report,
            Err(FetchError::Cancelled) => return CandidateStatus::InterruptedDuringSegmentDownload,
            Err(e) => {
                warn!(url = %url, error = %e, "candidate is not a usable manifest");
                entry.error = Some(e.to_string());
                return CandidateStatus::InvalidM3u8;
            }
        };

        if report.interrupted {
            return CandidateStatus::InterruptedDuringSegmentDownload;
        }
        entry.record_download(&report);
        if report.downloaded == 0 {
            return CandidateStatus::NoDownloadableSegments;
        }
        let Some(playlist) = report.playlist_path.as_deref() else {
            return CandidateStatus::NoDownloadableSegments;
        };

        match mux(&settings.mux, playlist, folder, name, &self.stop).await {
            Ok(output) => {
                entry.output = Some(output);
                let status = settings.policy.classify(report.total, report.failed.len());
                info!(url = %url, status = %status, "candidate finished");
                status
            }
            Err(FetchError::Cancelled) => {
                entry.error = Some(FetchError::Cancelled.to_string());
                CandidateStatus::InterruptedDuringSegmentDownload
            }
            Err(e) => {
                warn!(url = %url, error = %e, "mux failed");
                entry.error = Some(e.to_string());
                CandidateStatus::MuxFailed
            }
        }
    }
}

/// Discovered manifests then predicted siblings, each URL once.
pub fn candidate_list(outcome: &MonitorOutcome) -> Vec<String> {
    let mut list: Vec<String> = Vec::new();
    for url in outcome.manifests.iter().chain(&outcome.predicted) {
        if !list.contains(url) {
            list.push(url.clone());
        }
    }
    list
}

/// Identity hints for one manifest: the discovery user agent, the
/// referrer recorded for it (else the target page) and the cookies whose
/// domain covers the manifest host.
pub fn download_hints(hints: &SessionHints, manifest: &str, target_url: &str) -> DownloadHints {
    let user_agent = Some(hints.user_agent.trim())
        .filter(|ua| !ua.is_empty())
        .map(str::to_string);
    let referer = hints
        .referer_for(manifest)
        .unwrap_or(target_url)
        .to_string();

    let cookie_header = Url::parse(manifest).ok().and_then(|url| {
        let host = url.host_str()?.to_ascii_lowercase();
        let secure = url.scheme() == "https";
        let pairs: Vec<String> = hints
            .cookies
            .iter()
            .filter(|c| !c.secure || secure)
            .filter(|c| domain_matches(&host, &c.domain))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    });

    DownloadHints {
        user_agent,
        referer: Some(referer),
        cookie_header,
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
}
