// Text heuristics that pull candidate URLs out of HTML, scripts and JSON.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::url::normalize_url;

static ABSOLUTE_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s'"<>()]+"#).unwrap());
static ESCAPED_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?:(?:\\{1,2}/){2}[^\s'"<>()]+"#).unwrap());
static QUOTED_MANIFEST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)["']([^"'\s]+?\.m3u8[^"'\s]*)["']"#).unwrap());

static PLAYER_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)player_[a-z0-9_]+\s*=\s*(\{.*?\})\s*;").unwrap());
static PLAYER_ENCRYPT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)["']encrypt["']\s*:\s*["']?([0-9]+)["']?"#).unwrap());
static PLAYER_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)["']url["']\s*:\s*["']([^"']+)["']"#).unwrap());
static PLAYER_PARSE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)["']parse["']\s*:\s*["']([^"']+)["']"#).unwrap());
static SOURCE_FIELD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(?:url|source|src)\s*[:=]\s*["']([^"']+?)["']"#).unwrap());

static SCRIPT_SRC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<script[^>]+src=["']([^"']+)["']"#).unwrap());

fn insert_normalized(found: &mut BTreeSet<String>, raw: &str, base: &str) {
    let normalized = normalize_url(raw, Some(base));
    if !normalized.is_empty() {
        found.insert(normalized);
    }
}

/// Absolute, JSON-escaped and quoted relative manifest URLs in `text`.
pub fn urls_in_text(text: &str, base: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    if text.is_empty() {
        return found;
    }

    for m in ABSOLUTE_URL_REGEX.find_iter(text) {
        insert_normalized(&mut found, m.as_str(), base);
    }
    for m in ESCAPED_URL_REGEX.find_iter(text) {
        insert_normalized(&mut found, &m.as_str().replace("\\\\", "\\"), base);
    }
    for caps in QUOTED_MANIFEST_REGEX.captures_iter(text) {
        insert_normalized(&mut found, &caps[1], base);
    }
    found
}

/// Decode a player `url` value according to its `encrypt` mode.
///
/// Mode 1 is percent-encoding, mode 2 is base64 wrapped around
/// percent-encoding. Undecodable values are returned unchanged.
pub fn decode_player_url(raw: &str, encrypt: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        return String::new();
    }

    match encrypt.trim() {
        "1" => percent_decode(value),
        "2" => {
            let source = if value.contains('%') {
                percent_decode(value)
            } else {
                value.to_string()
            };
            let padding = (4 - source.len() % 4) % 4;
            let padded = format!("{source}{}", "=".repeat(padding));
            match STANDARD.decode(padded.as_bytes()) {
                Ok(bytes) => percent_decode(&String::from_utf8_lossy(&bytes)),
                Err(_) => value.to_string(),
            }
        }
        _ => value.to_string(),
    }
}

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Candidates from `player_xxx = {...};` configuration blocks plus loose
/// `url/source/src` assignments.
pub fn player_config_urls(text: &str, base: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    if text.is_empty() {
        return found;
    }

    for block in PLAYER_BLOCK_REGEX.captures_iter(text) {
        let block = &block[1];
        let encrypt = PLAYER_ENCRYPT_REGEX
            .captures(block)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "0".to_string());

        for caps in PLAYER_URL_REGEX.captures_iter(block) {
            let decoded = decode_player_url(&caps[1], &encrypt);
            insert_normalized(&mut found, &decoded, base);
        }
        for caps in PLAYER_PARSE_REGEX.captures_iter(block) {
            insert_normalized(&mut found, &caps[1], base);
        }
    }

    for caps in SOURCE_FIELD_REGEX.captures_iter(text) {
        let value = &caps[1];
        let lowered = value.to_ascii_lowercase();
        if !lowered.contains(".m3u8") && !lowered.contains("http") {
            continue;
        }
        insert_normalized(&mut found, value, base);
    }

    found
}

/// Every candidate URL the text heuristics can find.
pub fn candidate_urls(text: &str, base: &str) -> BTreeSet<String> {
    let mut found = urls_in_text(text, base);
    found.extend(player_config_urls(text, base));
    found
}

/// `<script src>` URLs in document order, deduplicated.
pub fn script_sources(html: &str, base: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in SCRIPT_SRC_REGEX.captures_iter(html) {
        let normalized = normalize_url(&caps[1], Some(base));
        if !normalized.is_empty() && !found.contains(&normalized) {
            found.push(normalized);
        }
    }
    found
}
