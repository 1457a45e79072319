//! Typed interaction actions.
//!
//! Each action type has its own argument struct. The structs reject unknown
//! keys, so decoding a raw `args` object doubles as the per-type argument
//! whitelist. Numeric arguments are read as `f64` and clamped when used.

use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

use super::model::{RawAction, TextList};
use super::when::{self, StagePredicate};
use crate::page::{LoadState, MouseButton};

/// Built-in selectors behind the `$player` token.
pub const PLAYER_SELECTORS: [&str; 13] = [
    "video",
    "audio",
    "button[aria-label*='play' i]",
    "button[title*='play' i]",
    ".play-button",
    ".vjs-play-control",
    ".jw-icon-playback",
    ".dplayer-play-icon",
    ".art-control-play",
    ".xgplayer-play",
    ".ckplayer .ck-play",
    ".player .play",
    "[data-testid*='play' i]",
];

pub const PLAYER_TOKEN: &str = "$player";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Chain,
    Wait,
    WaitForSelector,
    WaitGroup,
    PlayMedia,
    Click,
    Hover,
    Fill,
    WaitForLoadState,
    Goto,
    Evaluate,
    Scroll,
    MouseClick,
    Press,
    Log,
}

impl ActionKind {
    /// Types allowed inside `wait_group.group_actions`.
    pub fn allowed_in_wait_group(self) -> bool {
        matches!(
            self,
            ActionKind::Wait | ActionKind::WaitForSelector | ActionKind::WaitGroup
        )
    }
}

/// Which documents an element-level action searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Target {
    #[default]
    Page,
    Frame,
    Frames,
    All,
    PageAndFrames,
}

impl Target {
    pub fn includes_page(self) -> bool {
        matches!(self, Target::Page | Target::All | Target::PageAndFrames)
    }

    pub fn includes_frames(self) -> bool {
        !matches!(self, Target::Page)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SelectorState {
    Attached,
    Detached,
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MatchMode {
    Any,
    All,
}

fn keyword<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|value| {
        value
            .trim()
            .to_ascii_lowercase()
            .parse::<T>()
            .map_err(|_| de::Error::custom(format!("invalid value `{value}`")))
    })
    .transpose()
}

fn int_arg(value: Option<f64>, default: i64, min: i64, max: i64) -> i64 {
    value.map(|v| v as i64).unwrap_or(default).clamp(min, max)
}

fn ms_arg(value: Option<f64>, default: i64, min: i64, max: i64) -> Duration {
    Duration::from_millis(int_arg(value, default, min, max) as u64)
}

/// `selector` and `selectors` merged, `$player` expanded, duplicates dropped.
fn resolve_selectors(selectors: Option<&TextList>, selector: Option<&TextList>) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    let raw = selectors
        .map(TextList::items)
        .unwrap_or_default()
        .into_iter()
        .chain(selector.map(TextList::items).unwrap_or_default());
    for item in raw {
        if item.eq_ignore_ascii_case(PLAYER_TOKEN) {
            for builtin in PLAYER_SELECTORS {
                if !resolved.iter().any(|s| s == builtin) {
                    resolved.push(builtin.to_string());
                }
            }
        } else if !resolved.contains(&item) {
            resolved.push(item);
        }
    }
    resolved
}

macro_rules! selector_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn selectors(&self) -> Vec<String> {
                resolve_selectors(self.selectors.as_ref(), self.selector.as_ref())
            }

            pub fn target(&self) -> Target {
                self.target.unwrap_or_default()
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainArgs {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitArgs {
    pub ms: Option<f64>,
}

impl WaitArgs {
    pub fn duration(&self) -> Duration {
        ms_arg(self.ms, 300, 0, 30_000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayMediaArgs {
    #[serde(default, deserialize_with = "keyword")]
    pub target: Option<Target>,
}

impl PlayMediaArgs {
    pub fn target(&self) -> Target {
        self.target.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitForSelectorArgs {
    pub selector: Option<TextList>,
    pub selectors: Option<TextList>,
    #[serde(default, deserialize_with = "keyword")]
    pub state: Option<SelectorState>,
    #[serde(default, rename = "match", deserialize_with = "keyword")]
    pub match_mode: Option<MatchMode>,
    #[serde(default, deserialize_with = "keyword")]
    pub target: Option<Target>,
    pub timeout_ms: Option<f64>,
    pub poll_ms: Option<f64>,
}

selector_accessors!(WaitForSelectorArgs);

impl WaitForSelectorArgs {
    pub fn condition(&self) -> SelectorCondition {
        SelectorCondition {
            selectors: self.selectors(),
            state: self.state.unwrap_or_default(),
            match_mode: self.match_mode.unwrap_or(MatchMode::Any),
            target: self.target(),
        }
    }

    pub fn timeout(&self) -> Duration {
        ms_arg(self.timeout_ms, 5000, 100, 60_000)
    }

    pub fn poll(&self) -> Duration {
        ms_arg(self.poll_ms, 150, 50, 1000)
    }
}

/// A selector-state predicate evaluated across the targeted documents.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorCondition {
    pub selectors: Vec<String>,
    pub state: SelectorState,
    pub match_mode: MatchMode,
    pub target: Target,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitGroupArgs {
    #[serde(default, deserialize_with = "keyword")]
    pub mode: Option<MatchMode>,
    pub timeout_ms: Option<f64>,
    pub poll_ms: Option<f64>,
    #[serde(default)]
    pub group_actions: Vec<RawAction>,
}

/// One condition inside a wait group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupItem {
    Selector(SelectorCondition),
    /// Satisfied once this much time has passed since the enclosing group
    /// started.
    Timer(Duration),
    Group {
        mode: MatchMode,
        items: Vec<GroupItem>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitGroup {
    pub mode: MatchMode,
    pub timeout: Duration,
    pub poll: Duration,
    pub items: Vec<GroupItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickArgs {
    pub selector: Option<TextList>,
    pub selectors: Option<TextList>,
    #[serde(default, deserialize_with = "keyword")]
    pub target: Option<Target>,
    pub repeat: Option<f64>,
    pub wait_ms: Option<f64>,
    pub max_per_selector: Option<f64>,
    pub visible_timeout_ms: Option<f64>,
    pub click_timeout_ms: Option<f64>,
    pub wait_after_click_ms: Option<f64>,
}

selector_accessors!(ClickArgs);

impl ClickArgs {
    pub fn repeat(&self) -> u32 {
        int_arg(self.repeat, 1, 1, 20) as u32
    }
    pub fn wait(&self) -> Duration {
        ms_arg(self.wait_ms, 300, 0, 30_000)
    }
    pub fn max_per_selector(&self) -> usize {
        int_arg(self.max_per_selector, 2, 1, 20) as usize
    }
    pub fn visible_timeout(&self) -> Duration {
        ms_arg(self.visible_timeout_ms, 600, 100, 10_000)
    }
    pub fn click_timeout(&self) -> Duration {
        ms_arg(self.click_timeout_ms, 1400, 100, 20_000)
    }
    pub fn wait_after_click(&self) -> Duration {
        ms_arg(self.wait_after_click_ms, 250, 0, 10_000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoverArgs {
    pub selector: Option<TextList>,
    pub selectors: Option<TextList>,
    #[serde(default, deserialize_with = "keyword")]
    pub target: Option<Target>,
    pub repeat: Option<f64>,
    pub max_per_selector: Option<f64>,
    pub visible_timeout_ms: Option<f64>,
    pub hover_timeout_ms: Option<f64>,
    pub wait_ms: Option<f64>,
}

selector_accessors!(HoverArgs);

impl HoverArgs {
    pub fn repeat(&self) -> u32 {
        int_arg(self.repeat, 1, 1, 20) as u32
    }
    pub fn max_per_selector(&self) -> usize {
        int_arg(self.max_per_selector, 1, 1, 20) as usize
    }
    pub fn visible_timeout(&self) -> Duration {
        ms_arg(self.visible_timeout_ms, 600, 100, 10_000)
    }
    pub fn hover_timeout(&self) -> Duration {
        ms_arg(self.hover_timeout_ms, 1200, 100, 20_000)
    }
    pub fn wait(&self) -> Duration {
        ms_arg(self.wait_ms, 200, 0, 30_000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FillArgs {
    pub selector: Option<TextList>,
    pub selectors: Option<TextList>,
    #[serde(default, deserialize_with = "keyword")]
    pub target: Option<Target>,
    #[serde(default)]
    pub value: String,
    pub index: Option<f64>,
    pub fill_timeout_ms: Option<f64>,
    pub visible_timeout_ms: Option<f64>,
    pub require_visible: Option<bool>,
    pub submit_key: Option<String>,
}

selector_accessors!(FillArgs);

impl FillArgs {
    pub fn index(&self) -> usize {
        int_arg(self.index, 0, 0, i64::MAX) as usize
    }
    pub fn fill_timeout(&self) -> Duration {
        ms_arg(self.fill_timeout_ms, 2500, 100, 30_000)
    }
    pub fn visible_timeout(&self) -> Duration {
        ms_arg(self.visible_timeout_ms, 600, 100, 10_000)
    }
    pub fn require_visible(&self) -> bool {
        self.require_visible.unwrap_or(true)
    }
    pub fn submit_key(&self) -> Option<&str> {
        self.submit_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadStateArgs {
    #[serde(default, deserialize_with = "keyword")]
    pub state: Option<LoadState>,
    pub timeout_ms: Option<f64>,
}

impl LoadStateArgs {
    pub fn state(&self) -> LoadState {
        self.state.unwrap_or(LoadState::NetworkIdle)
    }
    pub fn timeout(&self) -> Duration {
        ms_arg(self.timeout_ms, 8000, 100, 60_000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GotoArgs {
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "keyword")]
    pub wait_until: Option<LoadState>,
    pub timeout_ms: Option<f64>,
}

impl GotoArgs {
    pub fn wait_until(&self) -> LoadState {
        self.wait_until.unwrap_or(LoadState::DomContentLoaded)
    }
    pub fn timeout(&self) -> Duration {
        ms_arg(self.timeout_ms, 18_000, 100, 120_000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluateArgs {
    #[serde(default)]
    pub script: String,
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "keyword")]
    pub target: Option<Target>,
    pub arg: Option<Value>,
}

impl EvaluateArgs {
    pub fn target(&self) -> Target {
        self.target.unwrap_or_default()
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrollArgs {
    pub deltas: Option<Vec<f64>>,
    pub y: Option<f64>,
    pub x: Option<f64>,
    pub wait_after_scroll_ms: Option<f64>,
}

impl ScrollArgs {
    pub fn deltas(&self) -> Vec<f64> {
        match &self.deltas {
            Some(deltas) if !deltas.is_empty() => deltas.iter().map(|d| d.trunc()).collect(),
            _ => vec![self.y.unwrap_or(240.0).trunc()],
        }
    }
    pub fn x(&self) -> f64 {
        self.x.unwrap_or(0.0).trunc()
    }
    pub fn wait_after_scroll(&self) -> Duration {
        ms_arg(self.wait_after_scroll_ms, 250, 0, 30_000)
    }
}

/// A viewport coordinate: a number, or `center`/`middle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coordinate {
    Pixels(f64),
    Center,
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_f64()
                .map(Coordinate::Pixels)
                .ok_or_else(|| de::Error::custom("coordinate out of range")),
            Value::String(s) if matches!(s.trim().to_ascii_lowercase().as_str(), "center" | "middle") => {
                Ok(Coordinate::Center)
            }
            other => Err(de::Error::custom(format!(
                "coordinate must be a number or `center`, got {other}"
            ))),
        }
    }
}

impl Coordinate {
    fn resolve(coordinate: Option<Coordinate>, center: f64) -> f64 {
        match coordinate {
            Some(Coordinate::Pixels(v)) => v.trunc(),
            _ => center,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Position {
    pub x: Option<Coordinate>,
    pub y: Option<Coordinate>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MouseClickArgs {
    pub position: Option<Position>,
    pub x: Option<Coordinate>,
    pub y: Option<Coordinate>,
    #[serde(default, deserialize_with = "keyword")]
    pub button: Option<MouseButton>,
    pub click_count: Option<f64>,
    pub delay_ms: Option<f64>,
}

impl MouseClickArgs {
    /// Resolve the click point; `position` wins over top-level `x`/`y`.
    pub fn point(&self, center: (f64, f64)) -> (f64, f64) {
        let position = self.position.clone().unwrap_or_default();
        let x = position.x.or(self.x);
        let y = position.y.or(self.y);
        (
            Coordinate::resolve(x, center.0),
            Coordinate::resolve(y, center.1),
        )
    }
    pub fn button(&self) -> MouseButton {
        self.button.unwrap_or_default()
    }
    pub fn click_count(&self) -> u32 {
        int_arg(self.click_count, 1, 1, 3) as u32
    }
    pub fn delay(&self) -> Duration {
        ms_arg(self.delay_ms, 0, 0, 3000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PressArgs {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogArgs {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Wait(WaitArgs),
    WaitForSelector(WaitForSelectorArgs),
    WaitGroup(WaitGroup),
    PlayMedia(PlayMediaArgs),
    Click(ClickArgs),
    Hover(HoverArgs),
    Fill(FillArgs),
    WaitForLoadState(LoadStateArgs),
    Goto(GotoArgs),
    Evaluate(EvaluateArgs),
    Scroll(ScrollArgs),
    MouseClick(MouseClickArgs),
    Press(PressArgs),
    Log(LogArgs),
    /// A type this build does not know. Only produced by lenient
    /// compilation; the interpreter logs and skips it.
    Unsupported(String),
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::Wait(_) => "wait",
            Action::WaitForSelector(_) => "wait_for_selector",
            Action::WaitGroup(_) => "wait_group",
            Action::PlayMedia(_) => "play_media",
            Action::Click(_) => "click",
            Action::Hover(_) => "hover",
            Action::Fill(_) => "fill",
            Action::WaitForLoadState(_) => "wait_for_load_state",
            Action::Goto(_) => "goto",
            Action::Evaluate(_) => "evaluate",
            Action::Scroll(_) => "scroll",
            Action::MouseClick(_) => "mouse_click",
            Action::Press(_) => "press",
            Action::Log(_) => "log",
            Action::Unsupported(kind) => kind,
        }
    }
}

/// An action together with the attempts it is enabled for.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedAction {
    pub action: Action,
    pub when: StagePredicate,
}

/// Validation failure carrying the JSON-path-like location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct ActionError {
    pub path: String,
    pub reason: String,
}

impl ActionError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

fn decode_args<T: for<'de> Deserialize<'de>>(
    raw: &RawAction,
    path: &str,
    strict: bool,
) -> Result<T, ActionError> {
    let mut args = raw.args.clone();
    if !strict {
        args.remove("when");
    }
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ActionError::new(&format!("{path}.args"), e.to_string()))
}

fn require_selectors(selectors: Vec<String>, path: &str) -> Result<Vec<String>, ActionError> {
    if selectors.is_empty() {
        return Err(ActionError::new(
            &format!("{path}.args"),
            "requires selector or selectors",
        ));
    }
    Ok(selectors)
}

fn require_text(value: &str, path: &str, field: &str) -> Result<(), ActionError> {
    if value.trim().is_empty() {
        return Err(ActionError::new(&format!("{path}.args.{field}"), "is required"));
    }
    Ok(())
}

fn parse_kind(raw: &RawAction, path: &str) -> Result<ActionKind, ActionError> {
    let kind = raw.normalized_kind();
    if kind.is_empty() {
        return Err(ActionError::new(path, "action.type is required"));
    }
    kind.parse()
        .map_err(|_| ActionError::new(path, format!("action.type unsupported: {kind}")))
}

/// Check a raw action the way the loader does: known type, whitelisted and
/// well-typed arguments, required fields present, a parseable `when`.
pub fn validate(raw: &RawAction, path: &str, in_wait_group: bool) -> Result<(), ActionError> {
    let kind = parse_kind(raw, path)?;
    if in_wait_group && !kind.allowed_in_wait_group() {
        return Err(ActionError::new(
            path,
            format!("action.type unsupported: {kind}"),
        ));
    }
    if let Some(when_value) = raw.when.as_ref() {
        when::validate(when_value).map_err(|reason| ActionError::new(path, reason))?;
    }
    if kind == ActionKind::Chain {
        let args: ChainArgs = decode_args(raw, path, true)?;
        return require_text(&args.name, path, "name");
    }
    if kind == ActionKind::WaitGroup {
        let args: WaitGroupArgs = decode_args(raw, path, true)?;
        if args.group_actions.is_empty() {
            return Err(ActionError::new(
                &format!("{path}.args.group_actions"),
                "must be a non-empty array",
            ));
        }
        for (index, child) in args.group_actions.iter().enumerate() {
            validate(child, &format!("{path}.args.group_actions[{index}]"), true)?;
        }
        return Ok(());
    }
    compile_kind(kind, raw, path, true).map(|_| ())
}

/// Compile a non-chain raw action. `strict` rejects `args.when`; lenient
/// compilation tolerates it and maps unknown types to
/// [`Action::Unsupported`].
pub fn compile(raw: &RawAction, path: &str, strict: bool) -> Result<StagedAction, ActionError> {
    let when = StagePredicate::parse(raw.when_source());
    let action = match parse_kind(raw, path) {
        Ok(kind) => compile_kind(kind, raw, path, strict)?,
        Err(err) if strict => return Err(err),
        Err(_) => Action::Unsupported(raw.normalized_kind()),
    };
    Ok(StagedAction { action, when })
}

fn compile_kind(
    kind: ActionKind,
    raw: &RawAction,
    path: &str,
    strict: bool,
) -> Result<Action, ActionError> {
    let action = match kind {
        ActionKind::Chain => {
            return Err(ActionError::new(path, "chain actions must be expanded first"));
        }
        ActionKind::Wait => Action::Wait(decode_args(raw, path, strict)?),
        ActionKind::PlayMedia => Action::PlayMedia(decode_args(raw, path, strict)?),
        ActionKind::WaitForSelector => {
            let args: WaitForSelectorArgs = decode_args(raw, path, strict)?;
            require_selectors(args.selectors(), path)?;
            Action::WaitForSelector(args)
        }
        ActionKind::WaitGroup => {
            let args: WaitGroupArgs = decode_args(raw, path, strict)?;
            Action::WaitGroup(WaitGroup {
                mode: args.mode.unwrap_or(MatchMode::All),
                timeout: ms_arg(args.timeout_ms, 8000, 100, 120_000),
                poll: ms_arg(args.poll_ms, 150, 50, 1000),
                items: compile_group_items(&args.group_actions),
            })
        }
        ActionKind::Click => {
            let args: ClickArgs = decode_args(raw, path, strict)?;
            require_selectors(args.selectors(), path)?;
            Action::Click(args)
        }
        ActionKind::Hover => {
            let args: HoverArgs = decode_args(raw, path, strict)?;
            require_selectors(args.selectors(), path)?;
            Action::Hover(args)
        }
        ActionKind::Fill => {
            let args: FillArgs = decode_args(raw, path, strict)?;
            require_selectors(args.selectors(), path)?;
            Action::Fill(args)
        }
        ActionKind::WaitForLoadState => Action::WaitForLoadState(decode_args(raw, path, strict)?),
        ActionKind::Goto => {
            let args: GotoArgs = decode_args(raw, path, strict)?;
            require_text(&args.url, path, "url")?;
            Action::Goto(args)
        }
        ActionKind::Evaluate => {
            let args: EvaluateArgs = decode_args(raw, path, strict)?;
            require_text(&args.script, path, "script")?;
            Action::Evaluate(args)
        }
        ActionKind::Scroll => Action::Scroll(decode_args(raw, path, strict)?),
        ActionKind::MouseClick => Action::MouseClick(decode_args(raw, path, strict)?),
        ActionKind::Press => {
            let args: PressArgs = decode_args(raw, path, strict)?;
            require_text(&args.key, path, "key")?;
            Action::Press(args)
        }
        ActionKind::Log => Action::Log(decode_args(raw, path, strict)?),
    };
    Ok(action)
}

/// Turn `group_actions` into conditions. Children that cannot contribute a
/// condition (no selectors, empty nested group, other types) are dropped.
fn compile_group_items(children: &[RawAction]) -> Vec<GroupItem> {
    let mut items = Vec::new();
    for child in children {
        let Ok(kind) = child.normalized_kind().parse::<ActionKind>() else {
            continue;
        };
        let args = Value::Object(child.args.clone());
        match kind {
            ActionKind::WaitForSelector => {
                let Ok(args) = serde_json::from_value::<WaitForSelectorArgs>(args) else {
                    continue;
                };
                let condition = args.condition();
                if !condition.selectors.is_empty() {
                    items.push(GroupItem::Selector(condition));
                }
            }
            ActionKind::Wait => {
                let Ok(args) = serde_json::from_value::<WaitArgs>(args) else {
                    continue;
                };
                items.push(GroupItem::Timer(ms_arg(args.ms, 0, 0, 120_000)));
            }
            ActionKind::WaitGroup => {
                let Ok(args) = serde_json::from_value::<WaitGroupArgs>(args) else {
                    continue;
                };
                let nested = compile_group_items(&args.group_actions);
                if !nested.is_empty() {
                    items.push(GroupItem::Group {
                        mode: args.mode.unwrap_or(MatchMode::All),
                        items: nested,
                    });
                }
            }
            _ => {}
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(kind: &str, args: Value) -> RawAction {
        RawAction::new(kind, args)
    }

    #[test]
    fn player_token_expands_and_dedupes() {
        let args: ClickArgs =
            serde_json::from_value(json!({ "selectors": ["video", "$PLAYER"], "selector": ".x" }))
                .unwrap();
        let selectors = args.selectors();
        assert_eq!(selectors[0], "video");
        assert_eq!(selectors.len(), PLAYER_SELECTORS.len() + 1);
        assert_eq!(selectors.last().map(String::as_str), Some(".x"));
    }

    #[test]
    fn click_defaults_and_clamps() {
        let args: ClickArgs =
            serde_json::from_value(json!({ "selector": "video", "repeat": 99, "wait_ms": -5 }))
                .unwrap();
        assert_eq!(args.repeat(), 20);
        assert_eq!(args.wait(), Duration::ZERO);
        assert_eq!(args.max_per_selector(), 2);
        assert_eq!(args.visible_timeout(), Duration::from_millis(600));
        assert_eq!(args.click_timeout(), Duration::from_millis(1400));
        assert_eq!(args.wait_after_click(), Duration::from_millis(250));
    }

    #[test]
    fn validate_rejects_unknown_args_and_types() {
        assert!(validate(&raw("wait", json!({ "ms": 10 })), "a", false).is_ok());
        let err = validate(&raw("wait", json!({ "seconds": 1 })), "a[0]", false).unwrap_err();
        assert!(err.path.starts_with("a[0]"));
        assert_eq!(err.to_string(), format!("{}: {}", err.path, err.reason));
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.to_string().starts_with("a[0].args: "));
        assert!(validate(&raw("teleport", json!({})), "a", false).is_err());
        assert!(validate(&raw("wait", json!({ "ms": true })), "a", false).is_err());
        assert!(validate(&raw("click", json!({})), "a", false).is_err());
        assert!(validate(&raw("click", json!({ "selector": "  " })), "a", false).is_err());
        assert!(validate(&raw("press", json!({})), "a", false).is_err());
        assert!(validate(&raw("goto", json!({ "url": "/next" })), "a", false).is_ok());
        assert!(validate(&raw("goto", json!({ "url": "/n", "wait_until": "soon" })), "a", false).is_err());
        assert!(validate(&raw("chain", json!({})), "a", false).is_err());
        assert!(validate(&raw(" Wait ", json!({})), "a", false).is_ok());
    }

    #[test]
    fn targets_parse_case_insensitively() {
        let args: PlayMediaArgs = serde_json::from_value(json!({ "target": " ALL " })).unwrap();
        assert_eq!(args.target(), Target::All);
        assert!(Target::All.includes_page() && Target::All.includes_frames());
        assert!(!Target::Frames.includes_page());
        assert!(serde_json::from_value::<PlayMediaArgs>(json!({ "target": "window" })).is_err());
    }

    #[test]
    fn wait_group_children_are_restricted() {
        let ok = raw(
            "wait_group",
            json!({ "mode": "any", "group_actions": [
                { "type": "wait", "args": { "ms": 500 } },
                { "type": "wait_for_selector", "args": { "selector": "video" } }
            ]}),
        );
        assert!(validate(&ok, "g", false).is_ok());

        let bad_child = raw(
            "wait_group",
            json!({ "group_actions": [{ "type": "click", "args": { "selector": "video" } }] }),
        );
        assert!(validate(&bad_child, "g", false).is_err());

        let empty = raw("wait_group", json!({ "group_actions": [] }));
        assert!(validate(&empty, "g", false).is_err());
    }

    #[test]
    fn wait_group_compiles_nested_items() {
        let staged = compile(
            &raw(
                "wait_group",
                json!({ "group_actions": [
                    { "type": "wait", "args": { "ms": 500000 } },
                    { "type": "wait_group", "args": { "mode": "any", "group_actions": [
                        { "type": "wait_for_selector", "args": { "selectors": ["video"], "state": "attached" } }
                    ]}}
                ]}),
            ),
            "g",
            true,
        )
        .unwrap();
        let Action::WaitGroup(group) = staged.action else {
            panic!("expected wait_group");
        };
        assert_eq!(group.mode, MatchMode::All);
        assert_eq!(group.timeout, Duration::from_millis(8000));
        assert_eq!(group.items[0], GroupItem::Timer(Duration::from_millis(120_000)));
        match &group.items[1] {
            GroupItem::Group { mode, items } => {
                assert_eq!(*mode, MatchMode::Any);
                assert!(matches!(&items[0], GroupItem::Selector(c) if c.state == SelectorState::Attached));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mouse_click_coordinates() {
        let args: MouseClickArgs = serde_json::from_value(
            json!({ "position": { "x": "center", "y": 40 }, "x": 5, "button": "Right", "click_count": 9 }),
        )
        .unwrap();
        assert_eq!(args.point((683.0, 384.0)), (683.0, 40.0));
        assert_eq!(args.button(), MouseButton::Right);
        assert_eq!(args.click_count(), 3);

        let top_level: MouseClickArgs = serde_json::from_value(json!({ "x": 10.7 })).unwrap();
        assert_eq!(top_level.point((640.0, 360.0)), (10.0, 360.0));
        assert!(serde_json::from_value::<MouseClickArgs>(json!({ "x": "left" })).is_err());
    }

    #[test]
    fn lenient_compile_keeps_unknown_types_and_args_when() {
        let staged = compile(&raw("teleport", json!({})), "a", false).unwrap();
        assert_eq!(staged.action, Action::Unsupported("teleport".to_string()));

        let with_args_when = raw("wait", json!({ "ms": 5, "when": "=2" }));
        assert!(compile(&with_args_when, "a", true).is_err());
        let staged = compile(&with_args_when, "a", false).unwrap();
        assert!(staged.when.is_active(2, 3));
        assert!(!staged.when.is_active(1, 3));
    }

    #[test]
    fn scroll_defaults() {
        let args: ScrollArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.deltas(), vec![240.0]);
        let args: ScrollArgs = serde_json::from_value(json!({ "deltas": [], "y": 90 })).unwrap();
        assert_eq!(args.deltas(), vec![90.0]);
        assert_eq!(args.wait_after_scroll(), Duration::from_millis(250));
    }
}
