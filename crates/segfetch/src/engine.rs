//! Concurrent download of every file a manifest references.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;
use reqwest::Client;
use serde::Serialize;
use stream_common::{ClientOptions, ProxySettings, StopSignal, create_client};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::budget::{RoundVerdict, StagnationTracker, reduced_workers, retry_budget};
use crate::error::FetchError;
use crate::events::{DownloadEvent, DownloadEventSink};
use crate::fetcher::fetch_segment;
use crate::identity::{DEFAULT_POOL_SIZE, DownloadHints, Identity, IdentityPool};
use crate::playlist::{PreparedPlaylist, SegmentJob, load_playlist};
use crate::timeout::{AdaptiveTimeout, TimeoutSettings};
use crate::workdir::prepare_work_dir;

pub const DEFAULT_WORKERS: usize = 100;
pub const MAX_WORKERS: usize = 256;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Concurrent fetches in the first round; later rounds never exceed it
    pub workers: usize,

    /// Minimum number of retry rounds before bonuses
    pub base_retries: usize,

    /// Adaptive timeout bounds and thresholds
    pub timeout: TimeoutSettings,

    /// How often the adaptive timeout is re-evaluated during a round
    pub evaluation_interval: Duration,

    /// Distinct identities rotated across retry rounds
    pub identity_pool_size: usize,

    /// Timeout for fetching the manifest itself
    pub playlist_timeout: Duration,

    /// Base pause between retry rounds; up to half of it is added as jitter
    pub round_pause: Duration,

    pub proxy: ProxySettings,

    /// User agent, referrer and cookies learned during discovery
    pub hints: DownloadHints,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            base_retries: 10,
            timeout: TimeoutSettings::default(),
            evaluation_interval: Duration::from_secs(10),
            identity_pool_size: DEFAULT_POOL_SIZE,
            playlist_timeout: Duration::from_secs(15),
            round_pause: Duration::from_millis(300),
            proxy: ProxySettings::default(),
            hints: DownloadHints::default(),
        }
    }
}

impl DownloadConfig {
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSegment {
    pub file: String,
    pub url: String,
    pub status: Option<u16>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    /// Media playlist actually downloaded
    pub playlist_url: String,
    pub total: usize,
    pub downloaded: usize,
    pub failed: Vec<FailedSegment>,
    pub interrupted: bool,
    pub work_dir: PathBuf,
    /// Rewritten local playlist; absent when interrupted
    pub playlist_path: Option<PathBuf>,
    /// Retry rounds granted after the first pass; zero when none failed
    pub retry_budget: usize,
    /// Retry rounds run after the first pass
    pub retry_rounds: usize,
    #[serde(with = "duration_secs")]
    pub final_timeout: Duration,
}

impl DownloadReport {
    pub fn failed_files(&self) -> HashSet<String> {
        self.failed.iter().map(|f| f.file.clone()).collect()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Files still failing once the retry rounds are over.
#[derive(Debug, Default)]
struct Retries {
    failed: Vec<(SegmentJob, FailedSegment)>,
    budget: usize,
    rounds: usize,
}

#[derive(Debug, Default)]
struct RoundOutcome {
    failed: Vec<(SegmentJob, FailedSegment)>,
    blocking: usize,
}

/// Shared state for one download.
struct Shared {
    dir: PathBuf,
    stop: StopSignal,
    timeout: Arc<AdaptiveTimeout>,
    done: AtomicUsize,
    total: usize,
    events: Option<DownloadEventSink>,
}

impl Shared {
    fn emit(&self, event: DownloadEvent) {
        if let Some(sink) = &self.events {
            sink(&event);
        }
    }
}

pub struct SegmentDownloadEngine {
    config: DownloadConfig,
    stop: StopSignal,
    events: Option<DownloadEventSink>,
}

impl SegmentDownloadEngine {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            stop: StopSignal::new(),
            events: None,
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_events(mut self, sink: DownloadEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Fetch `manifest_url` and every file it references into
    /// `<folder>/.TEMP`, then write the local `index.m3u8` without the
    /// files that could not be fetched.
    pub async fn download(
        &self,
        manifest_url: &str,
        folder: &Path,
    ) -> Result<DownloadReport, FetchError> {
        let work_dir = prepare_work_dir(folder).await?;
        let mut pool = IdentityPool::build(self.config.identity_pool_size, &self.config.hints);

        let playlist_client = self.client_for(pool.active(), self.config.timeout.min)?;
        let prepared = load_playlist(
            &playlist_client,
            manifest_url,
            self.config.playlist_timeout,
        )
        .await?;
        drop(playlist_client);

        let total = prepared.jobs.len();
        let timeout = Arc::new(AdaptiveTimeout::new(self.config.timeout.clone()));
        let shared = Arc::new(Shared {
            dir: work_dir.clone(),
            stop: self.stop.clone(),
            timeout: Arc::clone(&timeout),
            done: AtomicUsize::new(0),
            total,
            events: self.events.clone(),
        });

        info!(
            playlist = %prepared.url,
            total,
            workers = self.config.effective_workers(),
            "segment download started"
        );
        shared.emit(DownloadEvent::Start { total });

        let evaluation = self.stop.token().child_token();
        let evaluator = timeout.spawn_periodic(self.config.evaluation_interval, evaluation.clone());
        let result = self.run_rounds(&prepared, &shared, &mut pool).await;
        evaluation.cancel();
        let _ = evaluator.await;
        let Retries {
            failed,
            budget: retry_budget,
            rounds: retry_rounds,
        } = result?;

        let interrupted = self.stop.is_stopped();
        let mut failed: Vec<FailedSegment> = failed.into_iter().map(|(_, f)| f).collect();
        let playlist_path = if interrupted {
            None
        } else {
            let mut failed_files: HashSet<String> = failed.iter().map(|f| f.file.clone()).collect();
            let orphaned = prepared.orphaned_segments(&failed_files);
            if !orphaned.is_empty() {
                warn!(
                    segments = orphaned.len(),
                    "dropping segments whose key or init section failed"
                );
            }
            for (job, missing) in orphaned {
                failed_files.insert(job.file.clone());
                failed.push(FailedSegment {
                    file: job.file.clone(),
                    url: job.url.clone(),
                    status: None,
                    error: format!("depends on missing {missing}"),
                });
            }
            Some(prepared.write_rewritten(&work_dir, &failed_files)?)
        };

        let downloaded = shared.done.load(Ordering::SeqCst);
        shared.emit(DownloadEvent::Done {
            done: downloaded,
            total,
        });
        if interrupted {
            warn!(downloaded, total, "segment download interrupted");
        } else {
            info!(
                downloaded,
                failed = failed.len(),
                total,
                retry_rounds,
                "segment download finished"
            );
        }

        Ok(DownloadReport {
            playlist_url: prepared.url.clone(),
            total,
            downloaded,
            failed,
            interrupted,
            work_dir,
            playlist_path,
            retry_budget,
            retry_rounds,
            final_timeout: timeout.current(),
        })
    }

    /// First pass plus retry rounds.
    async fn run_rounds(
        &self,
        prepared: &PreparedPlaylist,
        shared: &Arc<Shared>,
        pool: &mut IdentityPool,
    ) -> Result<Retries, FetchError> {
        let mut workers = self.config.effective_workers();
        let first = self
            .run_round(prepared.jobs.clone(), shared, pool.active(), workers, 0)
            .await?;
        let mut failed = first.failed;
        let mut blocking = first.blocking;
        if failed.is_empty() || self.stop.is_stopped() {
            return Ok(Retries {
                failed,
                ..Retries::default()
            });
        }

        let budget = retry_budget(self.config.base_retries, shared.total, failed.len());
        let mut tracker = StagnationTracker::new(budget);
        info!(
            failed = failed.len(),
            budget,
            stagnation_limit = tracker.limit(),
            "retrying failed files"
        );

        let mut rounds = 0;
        for attempt in 1..=budget {
            if failed.is_empty() {
                break;
            }
            if !self.pause_between_rounds().await {
                break;
            }
            if blocking > 0 {
                let reduced = reduced_workers(workers);
                if reduced < workers {
                    info!(from = workers, to = reduced, blocking, "origin pushing back, fewer workers");
                }
                workers = reduced;
            }
            let identity = pool.advance(attempt).clone();
            debug!(attempt, identity = pool.active_index(), "rotating identity");

            let pending: Vec<SegmentJob> = failed.iter().map(|(job, _)| job.clone()).collect();
            let attempted = pending.len();
            let outcome = self
                .run_round(pending, shared, &identity, workers, attempt)
                .await?;
            rounds = attempt;
            failed = outcome.failed;
            blocking = outcome.blocking;
            if self.stop.is_stopped() {
                break;
            }

            let recovered = attempted.saturating_sub(failed.len());
            match tracker.observe(attempted, recovered) {
                RoundVerdict::Continue => {}
                RoundVerdict::RaiseTimeout => {
                    let raised = shared.timeout.raise();
                    debug!(timeout = ?raised, "stagnant rounds, raising timeout");
                }
                RoundVerdict::LowerTimeout => {
                    let lowered = shared.timeout.lower();
                    debug!(timeout = ?lowered, "strong recovery, lowering timeout");
                }
                RoundVerdict::Stop => {
                    warn!(
                        attempt,
                        remaining = failed.len(),
                        "no progress across rounds, giving up"
                    );
                    break;
                }
            }
        }
        Ok(Retries {
            failed,
            budget,
            rounds,
        })
    }

    async fn pause_between_rounds(&self) -> bool {
        let base = self.config.round_pause;
        if base.is_zero() {
            return !self.stop.is_stopped();
        }
        let jitter_ms = u64::try_from(base.as_millis() / 2).unwrap_or(0);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        self.stop.sleep(base + jitter).await
    }

    /// Run `jobs` through `workers` concurrent workers and wait for all of
    /// them. Nothing of the next round starts before this returns.
    async fn run_round(
        &self,
        jobs: Vec<SegmentJob>,
        shared: &Arc<Shared>,
        identity: &Identity,
        workers: usize,
        round: usize,
    ) -> Result<RoundOutcome, FetchError> {
        shared.emit(DownloadEvent::RoundStart {
            round,
            pending: jobs.len(),
            workers,
        });
        let workers = workers.min(jobs.len()).max(1);
        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let outcome = Arc::new(Mutex::new(RoundOutcome::default()));

        let mut set = JoinSet::new();
        for _ in 0..workers {
            if self.stop.is_stopped() {
                break;
            }
            let client = self.client_for(identity, shared.timeout.current())?;
            let queue = Arc::clone(&queue);
            let outcome = Arc::clone(&outcome);
            let shared = Arc::clone(shared);
            set.spawn(async move { worker(client, queue, outcome, shared).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "download worker panicked");
            }
        }

        let mut outcome = std::mem::take(&mut *outcome.lock());
        // Keep playlist order so retries and reports are stable.
        outcome
            .failed
            .sort_by_key(|(job, _)| job_order(&job.file));
        Ok(outcome)
    }

    /// One client per worker so header and connection state stay private.
    fn client_for(&self, identity: &Identity, connect_timeout: Duration) -> Result<Client, FetchError> {
        let options = ClientOptions {
            user_agent: identity.user_agent.clone(),
            headers: identity.header_map(),
            connect_timeout,
            timeout: None,
            follow_redirects: true,
            proxy: self.config.proxy.clone(),
        };
        Ok(create_client(&options)?)
    }
}

async fn worker(
    client: Client,
    queue: Arc<Mutex<VecDeque<SegmentJob>>>,
    outcome: Arc<Mutex<RoundOutcome>>,
    shared: Arc<Shared>,
) {
    loop {
        if shared.stop.is_stopped() {
            return;
        }
        let Some(job) = queue.lock().pop_front() else {
            return;
        };
        let timeout = shared.timeout.current();
        match fetch_segment(&client, &job, &shared.dir, timeout, &shared.stop).await {
            Ok(_) => {
                shared.timeout.record(true);
                let done = shared.done.fetch_add(1, Ordering::SeqCst) + 1;
                shared.emit(DownloadEvent::SegmentDone {
                    done,
                    total: shared.total,
                    file: job.file.clone(),
                });
            }
            Err(FetchError::Cancelled) => return,
            Err(e) => {
                shared.timeout.record(false);
                debug!(file = %job.file, error = %e, "segment failed");
                let failure = FailedSegment {
                    file: job.file.clone(),
                    url: job.url.clone(),
                    status: e.status(),
                    error: e.to_string(),
                };
                let mut outcome = outcome.lock();
                if e.is_blocking() {
                    outcome.blocking += 1;
                }
                outcome.failed.push((job, failure));
            }
        }
    }
}

/// Sort key: keys and init sections first, then segments by index.
fn job_order(file: &str) -> (u8, usize, String) {
    if let Some(index) = file.strip_suffix(".ts").and_then(|n| n.parse().ok()) {
        (1, index, String::new())
    } else {
        (0, 0, file.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_order_is_numeric() {
        let mut files = vec!["10.ts", "key0.enc", "2.ts", "init0.mp4"];
        files.sort_by_key(|f| job_order(f));
        assert_eq!(files, ["init0.mp4", "key0.enc", "2.ts", "10.ts"]);
    }

    #[test]
    fn worker_count_is_capped() {
        let config = DownloadConfig {
            workers: 1000,
            ..DownloadConfig::default()
        };
        assert_eq!(config.effective_workers(), MAX_WORKERS);
        let config = DownloadConfig {
            workers: 0,
            ..DownloadConfig::default()
        };
        assert_eq!(config.effective_workers(), 1);
    }
}
