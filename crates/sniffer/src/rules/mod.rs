//! Interaction rules: the JSON document, its validation and compilation, and
//! the interpreter that plays compiled actions against a page.

pub mod action;
pub mod expand;
pub mod interpreter;
pub mod matcher;
pub mod model;
pub mod set;
pub mod store;
pub mod when;

pub use action::{Action, ActionError, PLAYER_SELECTORS, StagedAction};
pub use interpreter::{Interpreter, Recovery};
pub use model::{FIRST_PASS_CHAIN, RETRY_PASS_CHAIN, RawAction, RuleDocument};
pub use set::{ActiveRules, RuleSet};
pub use store::{DEFAULT_RULES_FILE, load_rules, repair_rules_file};
pub use when::StagePredicate;
