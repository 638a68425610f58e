use regex::Regex;
use serde_json::Value;

use crate::error::{HrpError, Result};
use crate::parser::format_value;

/// Outcome of a single validator entry, recorded pass or fail.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub check: String,
    pub assert: String,
    pub expect: Value,
    pub actual: Value,
    pub passed: bool,
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Deep equality with int/float compared by numeric value.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(xo), Value::Object(yo)) => {
            xo.len() == yo.len()
                && xo.iter().all(|(k, x)| yo.get(k).is_some_and(|y| value_eq(x, y)))
        }
        _ => a == b,
    }
}

fn numeric_cmp<F>(actual: &Value, expect: &Value, ok: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    match (as_number(actual), as_number(expect)) {
        (Some(a), Some(e)) => a.partial_cmp(&e).map(&ok).unwrap_or(false),
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&format_value(needle)),
        Value::Array(items) => items.iter().any(|item| value_eq(item, needle)),
        _ => false,
    }
}

fn value_len(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn length_cmp<F>(actual: &Value, expect: &Value, ok: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    match (value_len(actual), as_number(expect)) {
        (Some(len), Some(e)) => (len as f64).partial_cmp(&e).map(&ok).unwrap_or(false),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn regex_match(actual: &Value, expect: &Value) -> bool {
    let Some(subject) = actual.as_str() else { return false };
    match Regex::new(&format_value(expect)) {
        Ok(re) => re.is_match(subject),
        Err(_) => false,
    }
}

/// Apply a named comparator. Unknown comparators are validation errors;
/// comparators applied to unsuitable types simply fail.
pub(crate) fn compare(assert: &str, actual: &Value, expect: &Value) -> Result<bool> {
    use std::cmp::Ordering;

    let passed = match assert {
        "equals" => value_eq(actual, expect),
        "not_equal" => !value_eq(actual, expect),
        "greater_than" => numeric_cmp(actual, expect, |o| o == Ordering::Greater),
        "less_than" => numeric_cmp(actual, expect, |o| o == Ordering::Less),
        "greater_or_equals" => numeric_cmp(actual, expect, |o| o != Ordering::Less),
        "less_or_equals" => numeric_cmp(actual, expect, |o| o != Ordering::Greater),
        "contains" => contains(actual, expect),
        "contained_by" => contains(expect, actual),
        "startswith" => format_value(actual).starts_with(&format_value(expect)),
        "endswith" => format_value(actual).ends_with(&format_value(expect)),
        "string_equals" => format_value(actual) == format_value(expect),
        "length_equals" => length_cmp(actual, expect, |o| o == Ordering::Equal),
        "length_less_than" => length_cmp(actual, expect, |o| o == Ordering::Less),
        "length_greater_than" => length_cmp(actual, expect, |o| o == Ordering::Greater),
        "length_less_or_equals" => length_cmp(actual, expect, |o| o != Ordering::Greater),
        "length_greater_or_equals" => length_cmp(actual, expect, |o| o != Ordering::Less),
        "type_match" => expect.as_str() == Some(type_name(actual)),
        "regex_match" => regex_match(actual, expect),
        other => {
            return Err(HrpError::Validation(format!("unknown comparator: {}", other)));
        }
    };
    Ok(passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(assert: &str, actual: Value, expect: Value) -> bool {
        compare(assert, &actual, &expect).unwrap()
    }

    #[test]
    fn equals_normalizes_numbers() {
        assert!(check("equals", json!(200), json!(200.0)));
        assert!(check("equals", json!({"a": [1, 2]}), json!({"a": [1.0, 2.0]})));
        assert!(!check("equals", json!("200"), json!(200)));
        assert!(check("not_equal", json!(1), json!(2)));
    }

    #[test]
    fn numeric_ordering() {
        assert!(check("greater_than", json!(3), json!(2)));
        assert!(!check("greater_than", json!("3"), json!(2)));
        assert!(check("less_or_equals", json!(2), json!(2)));
        assert!(check("greater_or_equals", json!(2.5), json!(2)));
        assert!(!check("less_than", json!(2), json!(2)));
    }

    #[test]
    fn containment() {
        assert!(check("contains", json!("hello world"), json!("world")));
        assert!(check("contains", json!([1, 2, 3]), json!(2)));
        assert!(!check("contains", json!(5), json!(5)));
        assert!(check("contained_by", json!(2), json!([1, 2])));
    }

    #[test]
    fn string_checks() {
        assert!(check("startswith", json!("abcdef"), json!("abc")));
        assert!(check("endswith", json!("abcdef"), json!("def")));
        assert!(check("string_equals", json!(200), json!("200")));
        assert!(check("regex_match", json!("v1.2.3"), json!(r"^v\d+\.\d+\.\d+$")));
        assert!(!check("regex_match", json!(123), json!(r"\d+")));
        // invalid pattern fails the assertion rather than erroring
        assert!(!check("regex_match", json!("x"), json!("(unclosed")));
    }

    #[test]
    fn length_checks() {
        assert!(check("length_equals", json!("abcd"), json!(4)));
        assert!(check("length_equals", json!([1, 2]), json!(2)));
        assert!(check("length_less_than", json!([1]), json!(2)));
        assert!(check("length_greater_or_equals", json!({"a": 1}), json!(1)));
        assert!(!check("length_equals", json!(7), json!(1)));
    }

    #[test]
    fn type_matching() {
        assert!(check("type_match", json!(1), json!("int")));
        assert!(check("type_match", json!(1.5), json!("float")));
        assert!(check("type_match", json!("s"), json!("str")));
        assert!(check("type_match", json!([1]), json!("list")));
        assert!(check("type_match", json!({}), json!("map")));
        assert!(check("type_match", json!(null), json!("null")));
        assert!(!check("type_match", json!(1), json!("str")));
    }

    #[test]
    fn unknown_comparator_errors() {
        let err = compare("almost_equals", &json!(1), &json!(1)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
