//! Parser for the command attribute.
//!
//! ```text
//! command := trigger ws verb
//! verb    := "call" ws action-name [ws "->" ws target [ws swap-mode]]
//!          | "set" ws field ws? "=" ws? value-expr
//! ```

use super::*;

use std::sync::OnceLock;

use crate::pattern::{Pattern, cached};

static ARROW_SPACING: OnceLock<Option<Pattern>> = OnceLock::new();
static ID_SPACING: OnceLock<Option<Pattern>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Event type the command reacts to (`click`, `submit`, ...).
    pub trigger: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Call(CallAction),
    Set(SetAction),
}

impl Action {
    /// Short label used in outcomes and trace lines.
    pub fn label(&self) -> String {
        match self {
            Self::Call(call) => call.action_name.clone(),
            Self::Set(set) => format!("set {}", set.field),
        }
    }
}

/// A server round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct CallAction {
    pub action_name: String,
    pub endpoint: String,
    /// Swap target selector; resolved at execution time when absent.
    pub target: Option<String>,
    pub swap: SwapMode,
    /// Prediction statements copied from the command-bearing element.
    pub prediction: Option<String>,
}

/// A local-only state change.
#[derive(Debug, Clone, PartialEq)]
pub struct SetAction {
    pub field: String,
    pub value_expr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SwapMode {
    #[default]
    Morph,
    /// Unrecognised mode, kept verbatim for the merge collaborator.
    Other(String),
}

impl SwapMode {
    fn from_token(token: &str) -> Self {
        match token {
            "morph" => Self::Morph,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Morph => f.write_str("morph"),
            Self::Other(mode) => f.write_str(mode),
        }
    }
}

/// Parses a raw command attribute. Any input outside the grammar yields
/// `None`.
pub fn parse_command(raw: &str, endpoint_prefix: &str) -> Option<Command> {
    let raw = raw.trim();
    let (trigger, rest) = split_word(raw)?;
    let (verb, rest) = split_word(rest)?;
    let action = match verb {
        "call" => Action::Call(parse_call(rest, endpoint_prefix)?),
        "set" => Action::Set(parse_set(rest)?),
        _ => return None,
    };
    Some(Command {
        trigger: trigger.to_string(),
        action,
    })
}

fn split_word(src: &str) -> Option<(&str, &str)> {
    let src = src.trim_start();
    if src.is_empty() {
        return None;
    }
    match src.find(|c: char| c.is_whitespace()) {
        Some(end) => Some((&src[..end], src[end..].trim_start())),
        None => Some((src, "")),
    }
}

// Upstream tokenizers sometimes emit `- >` and `# id`.
fn normalize_call(rest: &str) -> String {
    let arrows = match cached(&ARROW_SPACING, r"\s*-\s*>\s*") {
        Some(p) => p.replace_all(rest, " -> ").into_owned(),
        None => rest.to_string(),
    };
    match cached(&ID_SPACING, r"#\s+") {
        Some(p) => p.replace_all(&arrows, "#").into_owned(),
        None => arrows,
    }
}

fn parse_call(rest: &str, endpoint_prefix: &str) -> Option<CallAction> {
    let normalized = normalize_call(rest);
    let parts = normalized.split_whitespace().collect::<Vec<_>>();
    let (&action_name, tail) = parts.split_first()?;
    if !is_action_name(action_name) {
        return None;
    }
    let (target, swap) = match tail {
        [] => (None, SwapMode::Morph),
        ["->", target] => (Some(target.to_string()), SwapMode::Morph),
        ["->", target, mode] => (Some(target.to_string()), SwapMode::from_token(mode)),
        _ => return None,
    };
    Some(CallAction {
        action_name: action_name.to_string(),
        endpoint: format!("{endpoint_prefix}{action_name}"),
        target,
        swap,
        prediction: None,
    })
}

fn is_action_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn parse_set(rest: &str) -> Option<SetAction> {
    let (field, value_expr) = rest.split_once('=')?;
    let field = field.trim();
    let value_expr = value_expr.trim();
    if !is_identifier(field) || value_expr.is_empty() {
        return None;
    }
    Some(SetAction {
        field: field.to_string(),
        value_expr: value_expr.to_string(),
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
