use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use segfetch_engine::{DownloadEvent, DownloadEventSink};
use sniffer_engine::{EventSink, MonitorEvent};

const TICK: Duration = Duration::from_millis(120);

/// Terminal progress for discovery and downloads; draws nothing when quiet.
#[derive(Clone)]
pub struct Progress {
    bars: MultiProgress,
}

impl Progress {
    pub fn new(quiet: bool) -> Self {
        let bars = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self { bars }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.blue} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪"])
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.yellow} {prefix:.bold} [{bar:30.yellow/white}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
    }

    /// Spinner following one discovery run.
    pub fn monitor_sink(&self, label: &str) -> EventSink {
        let pb = self.bars.add(ProgressBar::new_spinner());
        pb.set_style(Self::spinner_style());
        pb.set_prefix(label.to_string());
        pb.enable_steady_tick(TICK);
        pb.set_message("discovering");

        Arc::new(move |event: &MonitorEvent| match event {
            MonitorEvent::Start { tries, .. } => {
                pb.set_message(format!("starting ({tries} attempts)"));
            }
            MonitorEvent::AttemptStart {
                attempt,
                tries,
                stage,
            } => pb.set_message(format!("attempt {attempt}/{tries}: {stage}")),
            MonitorEvent::AttemptStep {
                attempt,
                tries,
                step,
            } => pb.set_message(format!("attempt {attempt}/{tries}: {step}")),
            MonitorEvent::Candidate { count } => pb.set_message(format!("{count} manifest(s) seen")),
            MonitorEvent::AttemptDone {
                attempt,
                tries,
                found,
            } => pb.set_message(format!("attempt {attempt}/{tries} found {found}")),
            MonitorEvent::Done { found } => {
                pb.finish_with_message(format!("{found} manifest(s) found"));
            }
        })
    }

    /// Bar following one manifest download.
    pub fn download_sink(&self, label: &str) -> DownloadEventSink {
        let pb = self.bars.add(ProgressBar::new(0));
        pb.set_style(Self::bar_style());
        pb.set_prefix(label.to_string());
        pb.enable_steady_tick(TICK);

        Arc::new(move |event: &DownloadEvent| match event {
            DownloadEvent::Start { total } => {
                pb.set_length(*total as u64);
                pb.set_message("downloading");
            }
            DownloadEvent::SegmentDone { done, total, .. } => {
                pb.set_length(*total as u64);
                pb.set_position(*done as u64);
            }
            DownloadEvent::RoundStart {
                round,
                pending,
                workers,
            } if *round > 0 => {
                pb.set_message(format!("retry {round}: {pending} left, {workers} workers"));
            }
            DownloadEvent::RoundStart { .. } => {}
            DownloadEvent::Done { done, total } => {
                pb.set_position(*done as u64);
                pb.finish_with_message(format!("{done}/{total} segments"));
            }
        })
    }

    /// Print a line above the bars.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.bars.is_hidden() {
            return;
        }
        let _ = self.bars.println(line);
    }
}
