//! Rule file persistence.
//!
//! A missing file is created with the built-in document. A file that fails
//! to parse or validate is moved aside to `<path>.broken-YYYYmmdd-HHMMSS`
//! and replaced by the built-in document. Loading therefore always yields a
//! usable [`RuleSet`].

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use super::model::RuleDocument;
use super::set::RuleSet;
use crate::error::ProbeError;

pub const DEFAULT_RULES_FILE: &str = "monitor_rules.json";

pub async fn load_rules(path: &Path) -> RuleSet {
    ensure_rules_file(path).await;

    let document = match read_document(path).await {
        Ok(doc) => match RuleSet::compile(&doc, true) {
            Ok(rules) => return rules.with_source(path.to_path_buf()),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "rule file failed validation");
                repair_rules_file(path).await
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "rule file could not be loaded");
            repair_rules_file(path).await
        }
    };

    RuleSet::compile(&document, true)
        .unwrap_or_default()
        .with_source(path.to_path_buf())
}

async fn read_document(path: &Path) -> Result<RuleDocument, ProbeError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProbeError::RuleFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_str(&text)?)
}

async fn ensure_rules_file(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return;
    }
    match write_document(path, &RuleDocument::default()).await {
        Ok(()) => info!(path = %path.display(), "rule file created"),
        Err(err) => warn!(path = %path.display(), error = %err, "rule file create failed"),
    }
}

/// Back up the current file (if any) and write the default document.
pub async fn repair_rules_file(path: &Path) -> RuleDocument {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let backup = backup_path(path);
        match tokio::fs::rename(path, &backup).await {
            Ok(()) => info!(backup = %backup.display(), "rule file backed up"),
            Err(err) => warn!(error = %err, "rule file backup skipped"),
        }
    }

    let document = RuleDocument::default();
    match write_document(path, &document).await {
        Ok(()) => info!(path = %path.display(), "rule file reset"),
        Err(err) => warn!(path = %path.display(), error = %err, "rule file reset failed"),
    }
    document
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".broken-{stamp}"));
    PathBuf::from(name)
}

async fn write_document(path: &Path, document: &RuleDocument) -> Result<(), ProbeError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ProbeError::RuleFile {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let text = serde_json::to_string_pretty(document)?;
    tokio::fs::write(path, text)
        .await
        .map_err(|source| ProbeError::RuleFile {
            path: path.to_path_buf(),
            source,
        })
}
