use std::path::{Path, PathBuf};

use segfetch_engine::{CompletionPolicy, DownloadMode};
use serde::{Deserialize, Serialize};
use stream_common::ProxySettings;

use crate::cli::{Args, MonitorArgs, RunArgs};
use crate::error::{AppError, Result};

const CONFIG_DIR: &str = "hlsgrab";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub headless: bool,
    pub interaction: bool,
    pub tries: u32,
    /// Rule document; empty means `monitor_rules.json` next to the config
    pub rules_path: Option<PathBuf>,
    pub recursion: bool,
    pub depth: u32,
    pub user_agent: Option<String>,
    pub browser: Option<PathBuf>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            headless: true,
            interaction: true,
            tries: 3,
            rules_path: None,
            recursion: true,
            depth: 1,
            user_agent: None,
            browser: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub output_dir: PathBuf,
    pub mode: DownloadMode,
    pub workers: usize,
    pub base_retries: usize,
    pub identity_pool_size: usize,
    pub extension: String,
    pub ffmpeg: PathBuf,
    pub write_script: bool,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hlsgrab"),
            mode: DownloadMode::First,
            workers: 100,
            base_retries: 10,
            identity_pool_size: 4,
            extension: "mp4".to_string(),
            ffmpeg: PathBuf::from("ffmpeg"),
            write_script: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorSection,
    pub download: DownloadSection,
    pub proxy: ProxySettings,
    pub completion: CompletionPolicy,
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .ok_or(AppError::NoConfigDir)
    }

    fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path(),
        }
    }

    /// Load the configuration; a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| AppError::config(&path, e))
    }

    /// Write the defaults to the configuration file.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::config("<memory>", e))
    }

    /// Rule document used when neither the flags nor the file name one.
    pub fn default_rules_path(config_path: Option<&Path>) -> PathBuf {
        let dir = match config_path {
            Some(path) => path.parent().map(Path::to_path_buf),
            None => Self::default_path().ok().and_then(|p| p.parent().map(Path::to_path_buf)),
        };
        dir.unwrap_or_else(|| PathBuf::from("."))
            .join(sniffer_engine::DEFAULT_RULES_FILE)
    }

    /// Global flags that apply to every command.
    pub fn apply_global(&mut self, args: &Args) -> Result<()> {
        if let Some(proxy) = &args.proxy {
            let (address, port) = split_proxy(proxy)?;
            self.proxy.enabled = true;
            self.proxy.address = address;
            self.proxy.port = port;
        }
        if let Some(username) = &args.proxy_username {
            self.proxy.username = username.clone();
        }
        if let Some(password) = &args.proxy_password {
            self.proxy.password = password.clone();
        }
        Ok(())
    }

    pub fn apply_monitor(&mut self, args: &MonitorArgs) {
        let monitor = &mut self.monitor;
        if let Some(tries) = args.tries {
            monitor.tries = tries;
        }
        if args.headed {
            monitor.headless = false;
        }
        if args.no_interaction {
            monitor.interaction = false;
        }
        if let Some(rules) = &args.rules {
            monitor.rules_path = Some(rules.clone());
        }
        if let Some(depth) = args.depth {
            monitor.recursion = depth > 1;
            monitor.depth = depth.max(1);
        }
        if let Some(browser) = &args.browser {
            monitor.browser = Some(browser.clone());
        }
    }

    pub fn apply_run(&mut self, args: &RunArgs) -> Result<()> {
        self.apply_monitor(&args.monitor);
        let download = &mut self.download;
        if let Some(dir) = &args.output_dir {
            download.output_dir = dir.clone();
        }
        if let Some(mode) = args.mode {
            download.mode = mode;
        }
        if let Some(workers) = args.workers {
            download.workers = workers;
        }
        if let Some(extension) = &args.extension {
            download.extension = extension.trim_start_matches('.').to_string();
        }
        if let Some(ffmpeg) = &args.ffmpeg {
            download.ffmpeg = ffmpeg.clone();
        }
        if let Some(max_missing) = args.max_missing {
            self.completion.max_missing_segments = max_missing;
        }
        if let Some(ratio) = args.min_success_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(AppError::InvalidInput(format!(
                    "--min-success-ratio must be within 0..=1, got {ratio}"
                )));
            }
            self.completion.min_success_ratio = ratio;
        }
        Ok(())
    }
}

/// Split `host:port` or `http://host:port` into address and port. Only
/// HTTP proxies are supported.
fn split_proxy(value: &str) -> Result<(String, String)> {
    let value = value.trim();
    let rest = match value.split_once("://") {
        Some((scheme, rest)) if matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https") => {
            rest
        }
        Some((scheme, _)) => {
            return Err(AppError::InvalidInput(format!(
                "proxy scheme `{scheme}` is not supported, use an HTTP proxy"
            )));
        }
        None => value,
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest
        .rsplit_once(':')
        .filter(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .ok_or_else(|| AppError::InvalidInput(format!("proxy `{value}` is not host:port")))?;
    Ok((host.to_string(), port.to_string()))
}
