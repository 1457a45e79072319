//! Whether a stream with gaps still counts as complete, and the per-target
//! task log that records each candidate's result.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::engine::{DownloadReport, FailedSegment};
use crate::error::FetchError;

pub const TASK_LOG_FILE: &str = "download_log.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionPolicy {
    /// Missing files tolerated regardless of ratio
    pub max_missing_segments: usize,
    /// Success ratio at or above which gaps are tolerated
    pub min_success_ratio: f64,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            max_missing_segments: 3,
            min_success_ratio: 0.995,
        }
    }
}

impl CompletionPolicy {
    pub fn tolerates(&self, total: usize, failed: usize) -> bool {
        if failed == 0 {
            return true;
        }
        failed <= self.max_missing_segments || success_ratio(total, failed) >= self.min_success_ratio
    }

    /// Status of a candidate whose download ran to the end and whose mux
    /// step succeeded.
    pub fn classify(&self, total: usize, failed: usize) -> CandidateStatus {
        if failed == 0 {
            CandidateStatus::Completed
        } else if self.tolerates(total, failed) {
            CandidateStatus::CompletedWithToleratedMissingSegments
        } else {
            CandidateStatus::MergedWithMissingSegments
        }
    }
}

fn success_ratio(total: usize, failed: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(failed) as f64 / total as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Completed,
    CompletedWithToleratedMissingSegments,
    MergedWithMissingSegments,
    MuxFailed,
    InvalidM3u8,
    NoDownloadableSegments,
    InterruptedDuringSegmentDownload,
    SkippedNoDownload,
    SkippedInterrupted,
    SkippedTargetReached,
}

impl CandidateStatus {
    /// Statuses that count toward the download mode's success target.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithToleratedMissingSegments
        )
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DownloadMode {
    /// Discover only
    None,
    #[default]
    First,
    First5,
    All,
}

impl DownloadMode {
    /// Successful candidates after which the remaining ones are skipped.
    pub fn target(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::First => Some(1),
            Self::First5 => Some(5),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStats {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMetrics {
    pub success_ratio: f64,
    pub missing_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    pub file: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&FailedSegment> for FailedEntry {
    fn from(failed: &FailedSegment) -> Self {
        Self {
            file: failed.file.clone(),
            url: failed.url.clone(),
            status: failed.status,
        }
    }
}

/// One manifest candidate's line in the task log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntry {
    pub url: String,
    pub status: CandidateStatus,
    pub completed: bool,
    pub completed_by_tolerance: bool,
    pub merge_completed: bool,
    pub has_missing_segments: bool,
    pub segment_stats: SegmentStats,
    pub completion_metrics: CompletionMetrics,
    pub failed_segments: Vec<FailedEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl CandidateEntry {
    pub fn pending(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: CandidateStatus::Pending,
            completed: false,
            completed_by_tolerance: false,
            merge_completed: false,
            has_missing_segments: false,
            segment_stats: SegmentStats::default(),
            completion_metrics: CompletionMetrics::default(),
            failed_segments: Vec::new(),
            error: None,
            output: None,
        }
    }

    /// Fill the segment statistics from a finished download.
    pub fn record_download(&mut self, report: &DownloadReport) {
        let failed = report.failed.len();
        self.segment_stats = SegmentStats {
            total: report.total,
            downloaded: report.downloaded,
            failed,
        };
        self.completion_metrics = if report.total == 0 {
            CompletionMetrics::default()
        } else {
            CompletionMetrics {
                success_ratio: success_ratio(report.total, failed),
                missing_ratio: failed as f64 / report.total as f64,
            }
        };
        self.has_missing_segments = failed > 0;
        self.failed_segments = report.failed.iter().map(FailedEntry::from).collect();
    }

    /// Apply the final status and derive the boolean summary fields.
    pub fn finish(&mut self, status: CandidateStatus) {
        self.status = status;
        self.completed = status.is_success();
        self.completed_by_tolerance =
            status == CandidateStatus::CompletedWithToleratedMissingSegments;
        self.merge_completed = matches!(
            status,
            CandidateStatus::Completed
                | CandidateStatus::CompletedWithToleratedMissingSegments
                | CandidateStatus::MergedWithMissingSegments
        );
    }
}

/// Per-target record written to `<folder>/download_log.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    pub target: String,
    pub started_at: chrono::DateTime<chrono::Local>,
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_error: Option<String>,
    pub candidates: Vec<CandidateEntry>,
}

impl TaskLog {
    pub fn new(target: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            target: target.into(),
            started_at: chrono::Local::now(),
            config,
            monitor_error: None,
            candidates: Vec::new(),
        }
    }

    pub fn path_in(folder: &Path) -> PathBuf {
        folder.join(TASK_LOG_FILE)
    }

    /// Write through a temporary file so readers never see half a log.
    pub fn write(&self, folder: &Path) -> Result<PathBuf, FetchError> {
        std::fs::create_dir_all(folder).map_err(|e| FetchError::path_io(folder, e))?;
        let path = Self::path_in(folder);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, body).map_err(|e| FetchError::path_io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| FetchError::path_io(&path, e))?;
        Ok(path)
    }

    pub fn read(folder: &Path) -> Result<Self, FetchError> {
        let path = Self::path_in(folder);
        let body = std::fs::read(&path).map_err(|e| FetchError::path_io(&path, e))?;
        Ok(serde_json::from_slice(&body)?)
    }
}
