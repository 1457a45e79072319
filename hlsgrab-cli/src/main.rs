mod cli;
mod config;
mod error;
mod job;
mod logging;
mod progress;
mod target;

use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use segfetch_engine::{DownloadConfig, MuxConfig};
use sniffer_engine::{BrowserDriver, Monitor, MonitorConfig, RecursionConfig, load_rules};
use stream_common::{DEFAULT_USER_AGENT, StopSignal};
use tracing::{error, info, warn};

use crate::{
    cli::{Args, Commands, DiscoverArgs, RunArgs},
    config::AppConfig,
    error::Result,
    job::{Job, JobSettings, TargetSummary},
    logging::init_logging,
    progress::Progress,
    target::collect_targets,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _guard = init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    if let Commands::Config { show, reset } = &args.command {
        if *reset {
            let path = AppConfig::reset(args.config.as_deref())?;
            println!("✓ Configuration reset to defaults ({})", path.display());
        } else if *show {
            let config = AppConfig::load(args.config.as_deref())?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_global(&args)?;

    let stop = StopSignal::new();
    spawn_interrupt_handler(stop.clone());
    let progress = Progress::new(args.quiet);

    match &args.command {
        Commands::Discover(discover) => {
            config.apply_monitor(&discover.monitor);
            run_discover(&config, args.config.as_deref(), discover, stop, progress).await
        }
        Commands::Run(run_args) => {
            config.apply_run(run_args)?;
            run_targets(&config, args.config.as_deref(), run_args, stop, progress).await
        }
        Commands::Config { .. } => Ok(()),
    }
}

/// First Ctrl-C stops cooperatively; the task log of the current target is
/// still written.
fn spawn_interrupt_handler(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            stop.request_stop();
        }
    });
}

fn browser_driver(browser: Option<&Path>) -> Arc<dyn BrowserDriver> {
    #[cfg(feature = "browser")]
    if let Some(path) = browser {
        return Arc::new(sniffer_engine::ChromiumDriver::new().with_executable(path));
    }
    #[cfg(not(feature = "browser"))]
    if browser.is_some() {
        warn!("--browser ignored: built without the `browser` feature");
    }
    sniffer_engine::default_driver()
}

fn monitor_parts(config: &AppConfig) -> (MonitorConfig, RecursionConfig) {
    let monitor = &config.monitor;
    let monitor_config = MonitorConfig {
        headless: monitor.headless,
        interaction_enabled: monitor.interaction,
        tries: monitor.tries,
        rules_path: monitor.rules_path.clone(),
        user_agent: monitor
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
    };
    let recursion = RecursionConfig {
        enabled: monitor.recursion,
        depth: monitor.depth,
    };
    (monitor_config, recursion)
}

async fn build_monitor_settings(
    config: &AppConfig,
    config_path: Option<&Path>,
) -> (MonitorConfig, RecursionConfig, Arc<sniffer_engine::RuleSet>) {
    let (mut monitor, recursion) = monitor_parts(config);
    let rules_path = monitor
        .rules_path
        .clone()
        .unwrap_or_else(|| AppConfig::default_rules_path(config_path));
    let rules = Arc::new(load_rules(&rules_path).await);
    monitor.rules_path = Some(rules_path);
    (monitor, recursion, rules)
}

async fn run_discover(
    config: &AppConfig,
    config_path: Option<&Path>,
    args: &DiscoverArgs,
    stop: StopSignal,
    progress: Progress,
) -> Result<()> {
    let (monitor_config, recursion, rules) = build_monitor_settings(config, config_path).await;
    let outcome = Monitor::new(args.url.clone(), browser_driver(config.monitor.browser.as_deref()))
        .with_config(monitor_config)
        .with_recursion(recursion)
        .with_proxy(config.proxy.clone())
        .with_rules(rules)
        .with_stop(stop)
        .with_events(progress.monitor_sink("discover"))
        .discover()
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    if outcome.is_empty() {
        println!("No manifest found.");
        if let Some(error) = &outcome.last_error {
            println!("Last error: {error}");
        }
    }
    for url in &outcome.manifests {
        println!("manifest   {url}");
    }
    for url in &outcome.predicted {
        println!("predicted  {url}");
    }
    for url in &outcome.pages {
        println!("page       {url}");
    }
    Ok(())
}

async fn run_targets(
    config: &AppConfig,
    config_path: Option<&Path>,
    args: &RunArgs,
    stop: StopSignal,
    progress: Progress,
) -> Result<()> {
    let targets = collect_targets(&args.targets, args.input.as_deref(), args.name.as_deref())?;
    let (monitor, recursion, rules) = build_monitor_settings(config, config_path).await;
    let download = &config.download;
    let settings = Arc::new(JobSettings {
        output_dir: download.output_dir.clone(),
        mode: download.mode,
        monitor,
        recursion,
        proxy: config.proxy.clone(),
        rules,
        driver: browser_driver(config.monitor.browser.as_deref()),
        download: DownloadConfig {
            workers: download.workers,
            base_retries: download.base_retries,
            identity_pool_size: download.identity_pool_size,
            ..DownloadConfig::default()
        },
        mux: MuxConfig {
            ffmpeg: download.ffmpeg.clone(),
            extension: download.extension.clone(),
            write_script: download.write_script,
        },
        policy: config.completion,
    });
    info!(
        targets = targets.len(),
        output_dir = %settings.output_dir.display(),
        mode = %settings.mode,
        "run started"
    );

    let job = Job::new(settings, stop.clone(), progress.clone());
    for target in &targets {
        if stop.is_stopped() {
            warn!(url = %target.url, "skipped after interrupt");
            continue;
        }
        let summary = job.run(target).await?;
        report(&progress, &summary);
    }
    Ok(())
}

fn report(progress: &Progress, summary: &TargetSummary) {
    progress.println(format!(
        "{} ({}): {}/{} candidate(s) completed{}",
        summary.name,
        summary.url,
        summary.successes(),
        summary.candidates.len(),
        if summary.interrupted { ", interrupted" } else { "" }
    ));
    if summary.candidates.is_empty()
        && let Some(error) = &summary.monitor_error
    {
        progress.println(format!("  no candidates, last error: {error}"));
    }
    for entry in &summary.candidates {
        progress.println(format!("  [{}] {}", entry.status, entry.url));
    }
    for output in summary.outputs() {
        progress.println(format!("  → {}", output.display()));
    }
}
