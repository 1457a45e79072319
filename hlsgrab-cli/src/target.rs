//! Turning command-line and file input into named download targets.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{AppError, Result};

const FALLBACK_NAME: &str = "output";

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    /// File-system safe base name of the output and of its folder
    pub name: String,
}

impl Target {
    pub fn is_direct_manifest(&self) -> bool {
        self.url.to_ascii_lowercase().contains(".m3u8")
    }
}

/// Reduce user input to a safe base name: no directories, no extension,
/// no characters Windows rejects.
pub fn normalize_name(input: &str, fallback: &str) -> String {
    let text = input.trim().trim_matches(|c| c == '"' || c == '\'');
    let base = text.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };

    let mut name = clean_component(stem);
    if name.is_empty() {
        name = clean_component(fallback);
    }
    if name.is_empty() {
        name = FALLBACK_NAME.to_string();
    }
    if cfg!(windows) && WINDOWS_RESERVED_NAMES.contains(&name.to_ascii_uppercase().as_str()) {
        name = format!("_{name}_");
    }
    name
}

fn clean_component(value: &str) -> String {
    INVALID_CHARS
        .replace_all(value.trim(), "_")
        .trim_end_matches([' ', '.'])
        .trim()
        .to_string()
}

/// Name for a target given without one: the last path segment, else the
/// host.
fn name_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_NAME.to_string();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()));
    let host = clean_component(parsed.host_str().unwrap_or_default());
    match segment {
        Some(segment) => normalize_name(&segment, &host),
        None if !host.is_empty() => host,
        None => FALLBACK_NAME.to_string(),
    }
}

/// Parse one `URL [name]` line; blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Target>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (url, name) = match line.split_once(char::is_whitespace) {
        Some((url, rest)) => (url, Some(rest.trim())),
        None => (line, None),
    };
    let url = url.trim_matches(|c| c == '"' || c == '\'');
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(_) => return Err(AppError::InvalidInput(format!("`{url}` is not an http(s) URL"))),
        Err(e) => return Err(AppError::InvalidInput(format!("`{url}`: {e}"))),
    }
    let fallback = name_from_url(url);
    let name = match name {
        Some(name) if !name.is_empty() => normalize_name(name, &fallback),
        _ => fallback,
    };
    Ok(Some(Target {
        url: url.to_string(),
        name,
    }))
}

/// Collect targets from positional arguments and an optional input file.
///
/// `default_name` names a single target given without one. Repeated names
/// get a numeric suffix so every target keeps its own folder.
pub fn collect_targets(
    args: &[String],
    input: Option<&Path>,
    default_name: Option<&str>,
) -> Result<Vec<Target>> {
    let mut lines = args.to_vec();
    if let Some(path) = input {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
        lines.extend(text.lines().map(str::to_string));
    }

    let mut targets = Vec::new();
    let mut named_explicitly = Vec::new();
    for line in &lines {
        if let Some(target) = parse_line(line)? {
            named_explicitly.push(line.trim().contains(char::is_whitespace));
            targets.push(target);
        }
    }
    if targets.is_empty() {
        return Err(AppError::InvalidInput("no targets given".to_string()));
    }
    if let (Some(name), [target]) = (default_name, targets.as_mut_slice())
        && !named_explicitly[0]
    {
        target.name = normalize_name(name, &target.name);
    }

    let mut seen = HashSet::new();
    for target in &mut targets {
        let base = target.name.clone();
        let mut suffix = 2;
        while !seen.insert(target.name.to_ascii_lowercase()) {
            target.name = format!("{base}-{suffix}");
            suffix += 1;
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("  \"My Show.mp4\" ", "My Show")]
    #[case("C:\\videos\\clip.final.mkv", "clip.final")]
    #[case("dir/sub/ep:1?", "ep_1_")]
    #[case("trailing dots...", "trailing dots")]
    #[case("", "fallback")]
    #[case("...", "fallback")]
    #[case(".hidden", ".hidden")]
    fn names_are_normalized(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_name(input, "fallback"), expected);
    }

    #[test]
    fn empty_fallback_becomes_output() {
        assert_eq!(normalize_name("", ""), "output");
        assert_eq!(normalize_name("?", "??"), "_");
    }

    #[rstest]
    #[case("https://v.example/watch/episode-3", "episode-3")]
    #[case("https://v.example/watch/episode-3/", "episode-3")]
    #[case("https://v.example/", "v.example")]
    #[case("https://cdn.example/hls/movie%20one.m3u8?sign=1", "movie one")]
    fn names_from_urls(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(name_from_url(url), expected);
    }

    #[test]
    fn lines_are_parsed() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# a comment").unwrap(), None);
        let target = parse_line("https://v.example/watch/1   Pilot: Part 1").unwrap().unwrap();
        assert_eq!(target.url, "https://v.example/watch/1");
        assert_eq!(target.name, "Pilot_ Part 1");
        assert!(!target.is_direct_manifest());
        assert!(parse_line("ftp://v.example/a").is_err());
        assert!(parse_line("not a url").is_err());
    }

    #[test]
    fn targets_from_args_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("targets.txt");
        std::fs::write(
            &input,
            "# queue\nhttps://v.example/watch/1 show\n\nhttps://cdn.example/live/index.m3u8 show\n",
        )
        .unwrap();
        let targets = collect_targets(
            &["https://v.example/watch/0".to_string()],
            Some(&input),
            Some("ignored"),
        )
        .unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["0", "show", "show-2"]);
        assert!(targets[2].is_direct_manifest());
    }

    #[test]
    fn default_name_applies_to_a_single_unnamed_target() {
        let targets = collect_targets(
            &["https://v.example/watch/1".to_string()],
            None,
            Some("movie.mp4"),
        )
        .unwrap();
        assert_eq!(targets[0].name, "movie");

        let named = collect_targets(
            &["https://v.example/watch/1 kept".to_string()],
            None,
            Some("movie"),
        )
        .unwrap();
        assert_eq!(named[0].name, "kept");
        assert!(collect_targets(&[], None, None).is_err());
    }
}
