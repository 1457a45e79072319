//! Attempt gating for rule actions.
//!
//! A `when` value is a token or a list of tokens compared against the
//! current attempt: `2`, `"attempt2"`, `"attempt:2"`, `"=1"`, `">=2"`,
//! `"<last"`. An action runs when any token holds.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(==|=|>=|<=|>|<)(\d+|last)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Attempt(u32),
    /// The final configured attempt.
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StagePredicate {
    #[default]
    Always,
    /// A `when` was given but no token in it could be understood.
    Never,
    Any(Vec<(Comparison, Bound)>),
}

impl StagePredicate {
    pub fn parse(raw: Option<&Value>) -> Self {
        let Some(raw) = raw else {
            return Self::Always;
        };
        let values: Vec<&Value> = match raw {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut tokens = Vec::new();
        let mut explicit = false;
        for value in values {
            match value {
                Value::Number(n) => {
                    explicit = true;
                    if let Some(n) = n.as_f64().filter(|n| *n >= 0.0) {
                        tokens.push((Comparison::Eq, Bound::Attempt(n as u32)));
                    }
                }
                Value::String(s) => {
                    let token = s.trim().to_ascii_lowercase().replace(' ', "");
                    if token.is_empty() || token == "null" {
                        continue;
                    }
                    explicit = true;
                    if let Some(parsed) = parse_token(&token) {
                        tokens.push(parsed);
                    }
                }
                _ => {}
            }
        }

        if !explicit {
            Self::Always
        } else if tokens.is_empty() {
            Self::Never
        } else {
            Self::Any(tokens)
        }
    }

    pub fn is_active(&self, attempt: u32, tries: u32) -> bool {
        let attempt = attempt.max(1);
        let tries = tries.max(1);
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Any(tokens) => tokens.iter().any(|(op, bound)| {
                let value = match bound {
                    Bound::Attempt(n) => *n,
                    Bound::Last => tries,
                };
                match op {
                    Comparison::Eq => attempt == value,
                    Comparison::Gt => attempt > value,
                    Comparison::Ge => attempt >= value,
                    Comparison::Lt => attempt < value,
                    Comparison::Le => attempt <= value,
                }
            }),
        }
    }
}

fn parse_token(token: &str) -> Option<(Comparison, Bound)> {
    let token = match token.strip_prefix("attempt") {
        Some(rest) => rest.strip_prefix(':').unwrap_or(rest).trim(),
        None => token,
    };

    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return token
            .parse()
            .ok()
            .map(|n| (Comparison::Eq, Bound::Attempt(n)));
    }

    let caps = TOKEN_REGEX.captures(token)?;
    let op = match &caps[1] {
        "=" | "==" => Comparison::Eq,
        ">" => Comparison::Gt,
        ">=" => Comparison::Ge,
        "<" => Comparison::Lt,
        _ => Comparison::Le,
    };
    let bound = match &caps[2] {
        "last" => Bound::Last,
        digits => Bound::Attempt(digits.parse().ok()?),
    };
    Some((op, bound))
}

/// Shape check for strict loading: string/number or a list of them, and at
/// least one understood token when anything explicit is present.
pub fn validate(raw: &Value) -> Result<(), String> {
    let shape_ok = match raw {
        Value::String(_) | Value::Number(_) => true,
        Value::Array(items) => items
            .iter()
            .all(|v| matches!(v, Value::String(_) | Value::Number(_))),
        _ => false,
    };
    if !shape_ok {
        return Err("when must be a string/number or a list of them".to_string());
    }
    if StagePredicate::parse(Some(raw)) == StagePredicate::Never {
        return Err(format!("when invalid: {raw}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("=1"), 1, 3, true)]
    #[case(json!("=1"), 2, 3, false)]
    #[case(json!(">=2"), 2, 3, true)]
    #[case(json!(">=2"), 1, 3, false)]
    #[case(json!("==last"), 3, 3, true)]
    #[case(json!("<last"), 3, 3, false)]
    #[case(json!("attempt2"), 2, 3, true)]
    #[case(json!("attempt: 3"), 3, 3, true)]
    #[case(json!(2), 2, 3, true)]
    #[case(json!(["=1", "=3"]), 3, 3, true)]
    #[case(json!(["=1", "=3"]), 2, 3, false)]
    #[case(json!("> 1"), 2, 3, true)]
    fn evaluates_tokens(
        #[case] raw: Value,
        #[case] attempt: u32,
        #[case] tries: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(StagePredicate::parse(Some(&raw)).is_active(attempt, tries), expected);
    }

    #[test]
    fn missing_or_blank_means_always() {
        assert_eq!(StagePredicate::parse(None), StagePredicate::Always);
        assert_eq!(StagePredicate::parse(Some(&json!(""))), StagePredicate::Always);
        assert_eq!(StagePredicate::parse(Some(&json!([]))), StagePredicate::Always);
        assert_eq!(StagePredicate::parse(Some(&json!(null))), StagePredicate::Always);
    }

    #[test]
    fn unparseable_means_never() {
        let p = StagePredicate::parse(Some(&json!("sometimes")));
        assert_eq!(p, StagePredicate::Never);
        assert!(!p.is_active(1, 1));
    }

    #[test]
    fn validation() {
        assert!(validate(&json!(">=2")).is_ok());
        assert!(validate(&json!(["last"])).is_err());
        assert!(validate(&json!([1, "<=last"])).is_ok());
        assert!(validate(&json!(true)).is_err());
        assert!(validate(&json!({"a": 1})).is_err());
        assert!(validate(&json!("soon")).is_err());
    }
}
