//! # Segfetch Engine
//!
//! Downloads every segment of one HLS manifest concurrently and prepares a
//! local playlist for muxing.
//!
//! A [`SegmentDownloadEngine`] follows master playlists to their best
//! variant, renames keys and segments to local files, and fetches them with
//! a bounded worker pool. Failed files are retried in rounds under a budget
//! that grows with the stream size; every round rotates the request
//! [`Identity`], and the shared request timeout follows the recent failure
//! ratio. Cancellation never leaves truncated files behind.
//!
//! [`CompletionPolicy`] then decides whether the gaps that remain are small
//! enough for the stream to count as complete, and [`mux()`] hands the
//! rewritten playlist to ffmpeg.

pub mod budget;
pub mod completion;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod identity;
pub mod mux;
pub mod playlist;
pub mod timeout;
pub mod workdir;

pub use budget::{StagnationTracker, reduced_workers, retry_budget};
pub use completion::{
    CandidateEntry, CandidateStatus, CompletionPolicy, DownloadMode, TASK_LOG_FILE, TaskLog,
};
pub use engine::{DownloadConfig, DownloadReport, FailedSegment, SegmentDownloadEngine};
pub use error::FetchError;
pub use events::{DownloadEvent, DownloadEventSink};
pub use identity::{DownloadHints, Identity, IdentityPool};
pub use mux::{MuxConfig, mux};
pub use playlist::{PLAYLIST_FILE, PreparedPlaylist, load_playlist};
pub use timeout::{AdaptiveTimeout, TimeoutSettings};
