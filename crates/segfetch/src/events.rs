use std::sync::Arc;

use serde::Serialize;

/// Download progress, reported as segments land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    Start { total: usize },
    SegmentDone { done: usize, total: usize, file: String },
    RoundStart { round: usize, pending: usize, workers: usize },
    Done { done: usize, total: usize },
}

pub type DownloadEventSink = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;
