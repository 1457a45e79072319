//! On-disk shape of the interaction rule document.
//!
//! These types only describe structure. Every struct rejects unknown keys;
//! argument checking per action type happens in [`super::action`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A string or a list of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextList {
    One(String),
    Many(Vec<String>),
}

impl TextList {
    /// Trimmed, non-empty entries.
    pub fn items(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            TextList::One(item) => vec![item],
            TextList::Many(items) => items.iter().collect(),
        };
        raw.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Value>,
}

impl RawAction {
    pub fn new(kind: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.to_string(),
            args,
            when: None,
        }
    }

    pub fn when(mut self, when: impl Into<Value>) -> Self {
        self.when = Some(when.into());
        self
    }

    /// Lower-cased, trimmed action type.
    pub fn normalized_kind(&self) -> String {
        self.kind.trim().to_ascii_lowercase()
    }

    /// The stage predicate source: `when` on the action, else `args.when`.
    pub fn when_source(&self) -> Option<&Value> {
        self.when.as_ref().or_else(|| self.args.get("when"))
    }
}

pub type ChainMap = BTreeMap<String, Vec<RawAction>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGlobal {
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chains: ChainMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<TextList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_contains: Option<TextList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_regex: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, rename = "match")]
    pub matcher: RawMatch,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chains: ChainMap,
}

/// Root of the rule file. All three keys are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    pub chains: ChainMap,
    pub global: RawGlobal,
    pub sites: Vec<RawSite>,
}

pub const FIRST_PASS_CHAIN: &str = "monitor_first_pass";
pub const RETRY_PASS_CHAIN: &str = "monitor_retry_pass";

impl Default for RuleDocument {
    /// First attempt: play media, wait, click the player once. Later
    /// attempts: wait for a player, click across frames, scroll, click the
    /// viewport center and press space.
    fn default() -> Self {
        let first_pass = vec![
            RawAction::new("play_media", json!({ "target": "page" })),
            RawAction::new("wait", json!({ "ms": 1400 })),
            RawAction::new(
                "click",
                json!({ "selectors": ["$player"], "repeat": 1, "wait_ms": 1600 }),
            ),
        ];
        let retry_pass = vec![
            RawAction::new(
                "wait_for_selector",
                json!({
                    "selectors": ["$player"],
                    "state": "visible",
                    "match": "any",
                    "target": "all",
                    "timeout_ms": 4000,
                    "poll_ms": 150,
                }),
            ),
            RawAction::new(
                "click",
                json!({ "selectors": ["$player"], "target": "all", "repeat": 2, "wait_ms": 1200 }),
            ),
            RawAction::new(
                "scroll",
                json!({ "deltas": [240, 800, 1500], "wait_after_scroll_ms": 900 }),
            ),
            RawAction::new(
                "mouse_click",
                json!({ "position": { "x": "center", "y": "center" } }),
            ),
            RawAction::new("press", json!({ "key": "Space" })),
            RawAction::new("wait", json!({ "ms": 1200 })),
        ];

        let mut chains = ChainMap::new();
        chains.insert(FIRST_PASS_CHAIN.to_string(), first_pass);
        chains.insert(RETRY_PASS_CHAIN.to_string(), retry_pass);

        Self {
            chains,
            global: RawGlobal {
                actions: vec![
                    RawAction::new("chain", json!({ "name": FIRST_PASS_CHAIN })).when("=1"),
                    RawAction::new("chain", json!({ "name": RETRY_PASS_CHAIN })).when(">=2"),
                ],
                chains: ChainMap::new(),
            },
            sites: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_round_trips_through_json() {
        let doc = RuleDocument::default();
        let text = serde_json::to_string_pretty(&doc).unwrap();
        let parsed: RuleDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn rejects_unknown_and_missing_root_keys() {
        let extra = r#"{"chains":{},"global":{},"sites":[],"extra":1}"#;
        assert!(serde_json::from_str::<RuleDocument>(extra).is_err());
        let missing = r#"{"chains":{},"global":{}}"#;
        assert!(serde_json::from_str::<RuleDocument>(missing).is_err());
        let bad_action = r#"{"chains":{},"global":{"actions":[{"type":"wait","name":"x"}]},"sites":[]}"#;
        assert!(serde_json::from_str::<RuleDocument>(bad_action).is_err());
    }

    #[test]
    fn text_list_accepts_string_or_list() {
        let one: TextList = serde_json::from_str(r#"" *.example.com ""#).unwrap();
        assert_eq!(one.items(), vec!["*.example.com"]);
        let many: TextList = serde_json::from_str(r#"["a", " ", "b"]"#).unwrap();
        assert_eq!(many.items(), vec!["a", "b"]);
    }
}
