//! Chain splicing.
//!
//! `chain` actions are replaced by the body of the named chain, recursively.
//! The expansion path is tracked so a chain that (directly or indirectly)
//! references itself is cut instead of looping.

use tracing::warn;

use super::model::{ChainMap, RawAction};

/// Nesting level past which expansion gives up.
pub const MAX_CHAIN_DEPTH: usize = 10;

/// Expand every `chain` in `actions` against `chains`.
///
/// Problems (missing name, unknown chain, cycle, depth) are logged and
/// returned; the offending chain action is skipped.
pub fn expand_chains(actions: &[RawAction], chains: &ChainMap) -> (Vec<RawAction>, Vec<String>) {
    let mut issues = Vec::new();
    let mut trace = Vec::new();
    let expanded = expand_inner(actions, chains, &mut trace, 0, &mut issues);
    (expanded, issues)
}

fn expand_inner(
    actions: &[RawAction],
    chains: &ChainMap,
    trace: &mut Vec<String>,
    depth: usize,
    issues: &mut Vec<String>,
) -> Vec<RawAction> {
    if depth > MAX_CHAIN_DEPTH {
        warn!(depth, "rule chain depth exceeded");
        issues.push(format!("chain depth exceeded at {}", trace.join(" -> ")));
        return Vec::new();
    }

    let mut expanded = Vec::new();
    for action in actions {
        if action.normalized_kind() != "chain" {
            expanded.push(action.clone());
            continue;
        }

        let name = action
            .args
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            warn!("rule chain action skipped: missing name");
            issues.push("chain action without a name".to_string());
            continue;
        }
        if trace.contains(&name) {
            let cycle = format!("{} -> {name}", trace.join(" -> "));
            warn!(cycle = %cycle, "rule chain skipped: circular reference");
            issues.push(format!("circular chain reference {cycle}"));
            continue;
        }
        let Some(body) = chains.get(&name) else {
            warn!(chain = %name, "rule chain skipped: not found");
            issues.push(format!("unknown chain '{name}'"));
            continue;
        };

        trace.push(name);
        let nested = expand_inner(body, chains, trace, depth + 1, issues);
        trace.pop();

        match action.when.as_ref().filter(|w| !is_blank(w)) {
            None => expanded.extend(nested),
            Some(when) => expanded.extend(nested.into_iter().map(|mut child| {
                if child.when.is_none() {
                    child.when = Some(when.clone());
                }
                child
            })),
        }
    }
    expanded
}

fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
