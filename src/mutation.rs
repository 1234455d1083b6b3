//! Structured prediction statements (`field = expr`, `;`-separated).

use super::*;

use std::sync::OnceLock;

use crate::pattern::{Pattern, cached};
use serde_json::Number;

use crate::scalar::{add_amount, is_truthy, sub_amount};

static STATEMENT: OnceLock<Option<Pattern>> = OnceLock::new();
static ADD: OnceLock<Option<Pattern>> = OnceLock::new();
static SUB: OnceLock<Option<Pattern>> = OnceLock::new();
static INTEGER: OnceLock<Option<Pattern>> = OnceLock::new();
static FLOAT: OnceLock<Option<Pattern>> = OnceLock::new();

/// One parsed prediction statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `field = !field`
    Toggle { field: String },
    /// `field = field + n`; `n` beyond `i64` is kept as a float.
    Add { field: String, amount: Number },
    /// `field = field - n`
    Sub { field: String, amount: Number },
    /// `field = <literal>`; anything unrecognised is stored as a string.
    Assign { field: String, value: Value },
}

impl Mutation {
    pub fn parse(statement: &str) -> Result<Self> {
        let statement = statement.trim();
        let groups = cached(&STATEMENT, r"^([A-Za-z0-9_]+)\s*=\s*(.+)$")
            .and_then(|p| p.captures(statement))
            .ok_or_else(|| {
                Error::ExpressionParse(format!("expected `field = expr`, got {statement:?}"))
            })?;
        let field = groups.get(1).cloned().flatten().unwrap_or_default();
        let expr = groups.get(2).cloned().flatten().unwrap_or_default();
        Ok(classify(field, expr.trim()))
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Toggle { field }
            | Self::Add { field, .. }
            | Self::Sub { field, .. }
            | Self::Assign { field, .. } => field,
        }
    }

    pub fn apply(&self, state: &mut ScopeState) {
        match self {
            Self::Toggle { field } => {
                let next = !is_truthy(state.get(field));
                state.set(field, Value::Bool(next));
            }
            Self::Add { field, amount } => {
                let next = add_amount(state.get(field), amount);
                state.set(field, next);
            }
            Self::Sub { field, amount } => {
                let next = sub_amount(state.get(field), amount);
                state.set(field, next);
            }
            Self::Assign { field, value } => state.set(field, value.clone()),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toggle { field } => write!(f, "{field} = !{field}"),
            Self::Add { field, amount } => {
                write!(f, "{field} = {field} + {}", amount_digits(amount))
            }
            Self::Sub { field, amount } => {
                write!(f, "{field} = {field} - {}", amount_digits(amount))
            }
            Self::Assign {
                field,
                value: Value::String(s),
            } => {
                if is_bare_string(s) {
                    write!(f, "{field} = {s}")
                } else {
                    write!(f, "{field} = \"{s}\"")
                }
            }
            Self::Assign { field, value } => write!(f, "{field} = {value}"),
        }
    }
}

fn amount_digits(amount: &Number) -> String {
    match amount.as_i64() {
        Some(n) => n.to_string(),
        None => format!("{:.0}", amount.as_f64().unwrap_or_default()),
    }
}

// A string prints without quotes when it would parse back as itself.
fn is_bare_string(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed == s
        && !s.is_empty()
        && !s.contains(';')
        && !s.starts_with('"')
        && matches!(classify(String::new(), s), Mutation::Assign { value: Value::String(ref v), .. } if v == s)
}

fn classify(field: String, expr: &str) -> Mutation {
    if let Some(rest) = expr.strip_prefix('!') {
        if rest.trim() == field {
            return Mutation::Toggle { field };
        }
    }

    if let Some(amount) = same_field_amount(&ADD, r"^([A-Za-z0-9_]+)\s*\+\s*(\d+)$", &field, expr) {
        return Mutation::Add { field, amount };
    }
    if let Some(amount) = same_field_amount(&SUB, r"^([A-Za-z0-9_]+)\s*-\s*(\d+)$", &field, expr) {
        return Mutation::Sub { field, amount };
    }

    let value = parse_literal(expr);
    Mutation::Assign { field, value }
}

fn same_field_amount(
    cell: &'static OnceLock<Option<Pattern>>,
    src: &str,
    field: &str,
    expr: &str,
) -> Option<Number> {
    let groups = cached(cell, src)?.captures(expr)?;
    let name = groups.get(1)?.as_deref()?;
    if name != field {
        return None;
    }
    let digits = groups.get(2)?.as_deref()?;
    match digits.parse::<i64>() {
        Ok(n) => Some(Number::from(n)),
        Err(_) => digits.parse::<f64>().ok().and_then(Number::from_f64),
    }
}

fn parse_literal(expr: &str) -> Value {
    match expr {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if cached(&INTEGER, r"^-?\d+$").is_some_and(|p| p.is_match(expr)) {
        if let Ok(n) = expr.parse::<i64>() {
            return Value::Number(n.into());
        }
        return expr
            .parse::<f64>()
            .ok()
            .and_then(crate::scalar::number_value)
            .unwrap_or_else(|| Value::String(expr.to_string()));
    }
    if cached(&FLOAT, r"^-?\d+\.\d+$").is_some_and(|p| p.is_match(expr)) {
        if let Some(value) = expr.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(value);
        }
    }
    if expr.starts_with('"') && expr.ends_with('"') {
        return Value::String(expr.get(1..expr.len().saturating_sub(1)).unwrap_or("").to_string());
    }
    Value::String(expr.to_string())
}

/// Result of applying a `;`-separated batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Statements applied before the batch stopped.
    pub applied: Vec<Mutation>,
    /// The first malformed statement, which stopped the batch.
    pub error: Option<Error>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub fn apply_mutation(state: &mut ScopeState, statement: &str) -> Result<()> {
    Mutation::parse(statement)?.apply(state);
    Ok(())
}

/// Applies statements left to right, each seeing the previous effects. The
/// first malformed statement stops the batch; the prefix stays applied.
pub fn apply_statements(state: &mut ScopeState, batch: &str) -> BatchReport {
    let mut report = BatchReport::default();
    for statement in batch.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match Mutation::parse(statement) {
            Ok(mutation) => {
                mutation.apply(state);
                report.applied.push(mutation);
            }
            Err(err) => {
                report.error = Some(err);
                break;
            }
        }
    }
    report
}
