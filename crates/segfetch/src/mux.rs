//! Hand the rewritten playlist to ffmpeg for a stream copy.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use stream_common::StopSignal;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::FetchError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
pub const SCRIPT_FILE: &str = "combine.bat";
#[cfg(not(windows))]
pub const SCRIPT_FILE: &str = "combine.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// ffmpeg executable, looked up on `PATH` when not absolute
    pub ffmpeg: PathBuf,
    /// Container extension of the output, without the dot
    pub extension: String,
    /// Write a script next to the output that repeats the command
    pub write_script: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            extension: "mp4".to_string(),
            write_script: true,
        }
    }
}

impl MuxConfig {
    pub fn output_path(&self, folder: &Path, name: &str) -> PathBuf {
        folder.join(format!("{name}.{}", self.extension.trim_start_matches('.')))
    }

    pub fn args(&self, playlist: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-allowed_extensions", "ALL", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(playlist.as_os_str().to_owned());
        args.extend(["-c", "copy"].map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }

    /// The same command as a single shell line.
    pub fn script(&self, playlist: &Path, output: &Path) -> String {
        let line = format!(
            "\"{}\" -allowed_extensions ALL -i \"{}\" -c copy \"{}\"",
            self.ffmpeg.display(),
            playlist.display(),
            output.display()
        );
        if cfg!(windows) {
            format!("{line}\r\n")
        } else {
            format!("#!/bin/sh\n{line}\n")
        }
    }
}

/// Move an existing output aside as `origin-<name>` so it is never lost.
pub fn preserve_existing(output: &Path) -> Result<Option<PathBuf>, FetchError> {
    if !output.exists() {
        return Ok(None);
    }
    let Some(file_name) = output.file_name() else {
        return Ok(None);
    };
    let mut preserved_name = OsString::from("origin-");
    preserved_name.push(file_name);
    let preserved = output.with_file_name(preserved_name);
    if preserved.exists() {
        std::fs::remove_file(&preserved).map_err(|e| FetchError::path_io(&preserved, e))?;
    }
    std::fs::rename(output, &preserved).map_err(|e| FetchError::path_io(output, e))?;
    info!(from = %output.display(), to = %preserved.display(), "kept previous output");
    Ok(Some(preserved))
}

fn write_script(config: &MuxConfig, folder: &Path, playlist: &Path, output: &Path) {
    let path = folder.join(SCRIPT_FILE);
    if let Err(e) = std::fs::write(&path, config.script(playlist, output)) {
        warn!(path = %path.display(), error = %e, "could not write combine script");
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755));
    }
}

fn ffmpeg_command(config: &MuxConfig) -> Command {
    let mut cmd = Command::new(&config.ffmpeg);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd.env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Mux `playlist` into `<folder>/<name>.<ext>` and return the output path.
pub async fn mux(
    config: &MuxConfig,
    playlist: &Path,
    folder: &Path,
    name: &str,
    stop: &StopSignal,
) -> Result<PathBuf, FetchError> {
    let output = config.output_path(folder, name);
    if config.write_script {
        write_script(config, folder, playlist, &output);
    }
    preserve_existing(&output)?;

    let args = config.args(playlist, &output);
    debug!(ffmpeg = %config.ffmpeg.display(), ?args, "running ffmpeg");
    let child = ffmpeg_command(config)
        .args(&args)
        .spawn()
        .map_err(|e| FetchError::mux(format!("cannot start {}: {e}", config.ffmpeg.display())))?;

    let result = tokio::select! {
        _ = stop.stopped() => return Err(FetchError::Cancelled),
        result = child.wait_with_output() => result?,
    };

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let last = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no output");
        return Err(FetchError::mux(format!(
            "ffmpeg exited with {}: {last}",
            result.status.code().unwrap_or(-1)
        )));
    }
    info!(output = %output.display(), "mux finished");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn args_and_script_match() {
        let config = MuxConfig::default();
        let playlist = Path::new("/d/.TEMP/index.m3u8");
        let output = config.output_path(Path::new("/d"), "show");
        assert_eq!(output, PathBuf::from("/d/show.mp4"));
        let args: Vec<String> = config
            .args(playlist, &output)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["-y", "-allowed_extensions", "ALL", "-i", "/d/.TEMP/index.m3u8", "-c", "copy", "/d/show.mp4"]
        );
        assert!(
            config
                .script(playlist, &output)
                .contains("\"ffmpeg\" -allowed_extensions ALL -i \"/d/.TEMP/index.m3u8\" -c copy \"/d/show.mp4\"")
        );
    }

    #[test]
    fn existing_output_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("show.mp4");
        assert_eq!(preserve_existing(&output).unwrap(), None);
        std::fs::write(&output, b"old").unwrap();
        let preserved = preserve_existing(&output).unwrap().unwrap();
        assert_eq!(preserved, dir.path().join("origin-show.mp4"));
        assert!(!output.exists());
        assert_eq!(std::fs::read(preserved).unwrap(), b"old");
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_ffmpeg_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("index.m3u8");
        std::fs::write(&playlist, "#EXTM3U\n").unwrap();

        let config = MuxConfig {
            ffmpeg: fake_ffmpeg(dir.path(), "ok-ffmpeg", r#"for last; do :; done; echo muxed > "$last""#),
            ..MuxConfig::default()
        };
        let output = mux(&config, &playlist, dir.path(), "show", &StopSignal::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap().trim(), "muxed");
        assert!(dir.path().join(SCRIPT_FILE).exists());

        let failing = MuxConfig {
            ffmpeg: fake_ffmpeg(dir.path(), "bad-ffmpeg", "echo 'Invalid data found' >&2; exit 1"),
            write_script: false,
            ..MuxConfig::default()
        };
        let err = mux(&failing, &playlist, dir.path(), "show", &StopSignal::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid data found"), "{err}");
        assert!(dir.path().join("origin-show.mp4").exists());
    }
}
