//! Compiled rule set and per-URL resolution.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::action::{self, Action, ActionError, StagedAction};
use super::expand::expand_chains;
use super::matcher::SiteMatcher;
use super::model::{ChainMap, RawAction, RawSite, RuleDocument};
use super::when;

pub const GLOBAL_RULE_NAME: &str = "global";

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub name: String,
    pub matcher: SiteMatcher,
    pub actions: Vec<StagedAction>,
}

/// A rule document after validation, chain expansion and compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub source: Option<PathBuf>,
    pub global: CompiledRule,
    pub sites: Vec<CompiledRule>,
}

/// The actions that apply to one target URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRules {
    pub name: String,
    pub source: Option<PathBuf>,
    pub matched_sites: Vec<String>,
    pub actions: Vec<StagedAction>,
}

impl Default for RuleSet {
    fn default() -> Self {
        // The built-in document always compiles.
        Self::compile(&RuleDocument::default(), true).unwrap_or_else(|_| Self {
            source: None,
            global: CompiledRule {
                name: GLOBAL_RULE_NAME.to_string(),
                matcher: SiteMatcher::default(),
                actions: Vec::new(),
            },
            sites: Vec::new(),
        })
    }
}

impl RuleSet {
    /// Full structural check of a document, including chain references.
    pub fn validate(doc: &RuleDocument) -> Result<(), ActionError> {
        let global_chains = merge_chains(&doc.chains, &doc.global.chains);

        validate_chain_map(&doc.chains, "chains")?;
        validate_chain_map(&doc.global.chains, "global.chains")?;
        validate_list(&doc.global.actions, "global.actions")?;
        check_references(&doc.global.actions, &global_chains, "global.actions")?;
        for (name, body) in &global_chains {
            check_references(body, &global_chains, &format!("chains.{name}"))?;
        }

        for (index, site) in doc.sites.iter().enumerate() {
            let path = format!("sites[{index}]");
            let site_chains = merge_chains(&global_chains, &site.chains);
            validate_chain_map(&site.chains, &format!("{path}.chains"))?;
            validate_list(&site.actions, &format!("{path}.actions"))?;
            check_references(&site.actions, &site_chains, &format!("{path}.actions"))?;
            for (name, body) in &site.chains {
                check_references(body, &site_chains, &format!("{path}.chains.{name}"))?;
            }
        }
        Ok(())
    }

    /// Build the rule set. With `strict`, any invalid action fails the whole
    /// document; otherwise bad actions are skipped with a warning and unknown
    /// types survive as [`Action::Unsupported`].
    pub fn compile(doc: &RuleDocument, strict: bool) -> Result<Self, ActionError> {
        if strict {
            Self::validate(doc)?;
        }

        let global_chains = merge_chains(&doc.chains, &doc.global.chains);
        let global = CompiledRule {
            name: GLOBAL_RULE_NAME.to_string(),
            matcher: SiteMatcher::default(),
            actions: compile_list(&doc.global.actions, &global_chains, "global.actions", strict)?,
        };

        let mut sites = Vec::new();
        for (index, site) in doc.sites.iter().enumerate() {
            if !site.enabled.unwrap_or(true) {
                continue;
            }
            let site_chains = merge_chains(&global_chains, &site.chains);
            let path = format!("sites[{index}].actions");
            sites.push(CompiledRule {
                name: site_name(site, index),
                matcher: site_matcher(site),
                actions: compile_list(&site.actions, &site_chains, &path, strict)?,
            });
        }

        Ok(Self {
            source: None,
            global,
            sites,
        })
    }

    pub fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    /// Global actions followed by those of every matching site, in
    /// document order.
    pub fn resolve(&self, target_url: &str) -> ActiveRules {
        let mut active = ActiveRules {
            name: self.global.name.clone(),
            source: self.source.clone(),
            matched_sites: Vec::new(),
            actions: self.global.actions.clone(),
        };

        for site in &self.sites {
            if !site.matcher.matches(target_url) {
                continue;
            }
            debug!(
                site = %site.name,
                actions = site.actions.len(),
                hosts = ?site.matcher.host_patterns,
                url_contains = ?site.matcher.url_contains,
                url_regex = ?site.matcher.url_regex,
                "site rule matched"
            );
            active.matched_sites.push(site.name.clone());
            active.actions.extend(site.actions.iter().cloned());
        }

        if !active.matched_sites.is_empty() {
            active.name = active.matched_sites.join(",");
        }
        active
    }
}

fn merge_chains(base: &ChainMap, overlay: &ChainMap) -> ChainMap {
    let mut merged = base.clone();
    for (name, body) in overlay {
        let name = name.trim();
        if !name.is_empty() {
            merged.insert(name.to_string(), body.clone());
        }
    }
    merged
}

fn site_name(site: &RawSite, index: usize) -> String {
    site.name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("site_{}", index + 1))
}

fn site_matcher(site: &RawSite) -> SiteMatcher {
    let m = &site.matcher;
    SiteMatcher::new(
        m.host.as_ref().map(|h| h.items()).unwrap_or_default(),
        m.url_contains.as_ref().map(|c| c.items()).unwrap_or_default(),
        m.url_regex.clone(),
    )
}

fn validate_list(actions: &[RawAction], path: &str) -> Result<(), ActionError> {
    for (index, raw) in actions.iter().enumerate() {
        action::validate(raw, &format!("{path}[{index}]"), false)?;
    }
    Ok(())
}

fn validate_chain_map(chains: &ChainMap, path: &str) -> Result<(), ActionError> {
    for (name, body) in chains {
        if name.trim().is_empty() {
            return Err(ActionError {
                path: path.to_string(),
                reason: "chain name cannot be empty".to_string(),
            });
        }
        validate_list(body, &format!("{path}.{}", name.trim()))?;
    }
    Ok(())
}

fn check_references(actions: &[RawAction], chains: &ChainMap, path: &str) -> Result<(), ActionError> {
    let (_, issues) = expand_chains(actions, chains);
    match issues.into_iter().next() {
        None => Ok(()),
        Some(reason) => Err(ActionError {
            path: path.to_string(),
            reason,
        }),
    }
}

fn compile_list(
    actions: &[RawAction],
    chains: &ChainMap,
    path: &str,
    strict: bool,
) -> Result<Vec<StagedAction>, ActionError> {
    let (expanded, _) = expand_chains(actions, chains);
    let mut compiled = Vec::with_capacity(expanded.len());
    for (index, raw) in expanded.iter().enumerate() {
        let item_path = format!("{path}[{index}]");
        if !strict {
            if let Some(when_value) = raw.when.as_ref() {
                if let Err(reason) = when::validate(when_value) {
                    warn!(path = %item_path, %reason, "rule action when ignored");
                }
            }
        }
        match action::compile(raw, &item_path, strict) {
            Ok(staged) => compiled.push(staged),
            Err(err) if strict => return Err(err),
            Err(err) => warn!(error = %err, "rule action skipped"),
        }
    }
    Ok(compiled)
}

impl ActiveRules {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions enabled for this attempt.
    pub fn for_attempt(&self, attempt: u32, tries: u32) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(move |staged| staged.when.is_active(attempt, tries))
            .map(|staged| &staged.action)
    }
}
