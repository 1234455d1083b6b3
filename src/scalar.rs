//! JavaScript-flavoured semantics for the scalars a scope may hold.

use serde_json::{Number, Value};

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

pub(crate) fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_numeric_string(s),
        Some(Value::Array(_) | Value::Object(_)) => f64::NAN,
    }
}

fn parse_numeric_string(src: &str) -> f64 {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E')) =>
        {
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

/// Converts an arithmetic result back into JSON: integral values become
/// integers, non-finite values have no JSON form.
pub(crate) fn number_value(value: f64) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        // -0.0 collapses to 0 like JSON.stringify does
        return Some(Value::Number(Number::from(value as i64)));
    }
    Number::from_f64(value).map(Value::Number)
}

/// `String(value)` as a browser would print it.
pub(crate) fn display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format_float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

pub(crate) fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        return format!("{}", value as i128);
    }
    format!("{value}")
}

/// Deep equality where `5` and `5.0` compare equal.
pub(crate) fn scalar_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| scalar_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| scalar_eq(x, y)))
        }
        _ => left == right,
    }
}

/// `(current || 0) + delta` with JavaScript coercions. Integer operands stay
/// exact while the result fits in `i64`.
pub(crate) fn add_amount(current: Option<&Value>, delta: &Number) -> Value {
    let base = if is_truthy(current) { current } else { None };
    let step = delta.as_f64().unwrap_or(f64::NAN);
    match base {
        None => Value::Number(delta.clone()),
        Some(Value::String(s)) => {
            Value::String(format!("{s}{}", display_string(&Value::Number(delta.clone()))))
        }
        Some(other) => match exact_step(other, delta, i64::checked_add) {
            Some(sum) => Value::Number(Number::from(sum)),
            None => number_value(to_number(Some(other)) + step).unwrap_or(Value::Null),
        },
    }
}

/// `(current || 0) - delta` with JavaScript coercions; NaN serializes as null.
pub(crate) fn sub_amount(current: Option<&Value>, delta: &Number) -> Value {
    let base = if is_truthy(current) { current } else { None };
    let step = delta.as_f64().unwrap_or(f64::NAN);
    match base {
        None => match delta.as_i64() {
            Some(d) => Value::Number(Number::from(d.saturating_neg())),
            None => number_value(-step).unwrap_or(Value::Null),
        },
        Some(other) => match exact_step(other, delta, i64::checked_sub) {
            Some(diff) => Value::Number(Number::from(diff)),
            None => number_value(to_number(Some(other)) - step).unwrap_or(Value::Null),
        },
    }
}

fn exact_step(current: &Value, delta: &Number, op: fn(i64, i64) -> Option<i64>) -> Option<i64> {
    let Value::Number(n) = current else {
        return None;
    };
    op(n.as_i64()?, delta.as_i64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_browser_rules() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(is_truthy(Some(&json!("0"))));
        assert!(is_truthy(Some(&json!(-1.5))));
    }

    #[test]
    fn display_matches_string_conversion() {
        assert_eq!(display_string(&json!(5)), "5");
        assert_eq!(display_string(&json!(2.5)), "2.5");
        assert_eq!(display_string(&json!(3.0)), "3");
        assert_eq!(display_string(&json!(true)), "true");
        assert_eq!(display_string(&json!("hi")), "hi");
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert!(scalar_eq(&json!({"n": 5}), &json!({"n": 5.0})));
        assert!(!scalar_eq(&json!({"n": 5}), &json!({"n": "5"})));
    }

    #[test]
    fn add_and_sub_coerce_like_scripts() {
        let two = Number::from(2);
        assert_eq!(add_amount(None, &two), json!(2));
        assert_eq!(add_amount(Some(&json!(false)), &two), json!(2));
        assert_eq!(add_amount(Some(&json!(true)), &two), json!(3));
        assert_eq!(add_amount(Some(&json!("a")), &two), json!("a2"));
        assert_eq!(add_amount(Some(&json!(1.5)), &Number::from(1)), json!(2.5));
        assert_eq!(sub_amount(Some(&json!("x")), &Number::from(1)), Value::Null);
        assert_eq!(sub_amount(Some(&json!(10)), &Number::from(3)), json!(7));
        assert_eq!(
            add_amount(Some(&json!(i64::MAX)), &Number::from(1)),
            json!(9_223_372_036_854_775_808.0)
        );
    }

    #[test]
    fn amounts_beyond_i64_use_float_arithmetic() {
        let huge = Number::from_f64(1e20).unwrap_or_else(|| Number::from(0));
        assert_eq!(add_amount(Some(&json!(5)), &huge), json!(1e20));
        assert_eq!(sub_amount(None, &huge), json!(-1e20));
        assert_eq!(add_amount(Some(&json!("n")), &huge), json!("n100000000000000000000"));
    }
}
