//! Field-level assertion evaluation.
//!
//! Pure and deterministic: the same `(output, expected, spec)` triple always
//! yields the same [`AssertionResult`]. Matcher failures are recorded as
//! check results, never raised.

use serde_json::Value;

use crate::model::{
    AssertionCheckResult, AssertionOperator, AssertionResult, AssertionSpec, FieldMatcher,
    NumericRange,
};

/// Evaluate one output against one assertion spec.
pub fn evaluate(output: &Value, expected: &Value, spec: &AssertionSpec) -> AssertionResult {
    let output_keys: Vec<&str> = match output {
        Value::Object(map) => map.keys().map(String::as_str).collect(),
        _ => Vec::new(),
    };

    let missing_keys: Vec<String> = spec
        .required_keys
        .iter()
        .filter(|key| !output_keys.contains(&key.as_str()))
        .cloned()
        .collect();

    let unexpected_keys: Vec<String> = if spec.allow_additional_keys {
        Vec::new()
    } else {
        let allowed: Vec<&str> = spec
            .required_keys
            .iter()
            .map(String::as_str)
            .chain(spec.variable_fields.iter().map(String::as_str))
            .chain(spec.field_matchers.keys().map(String::as_str))
            .collect();
        output_keys
            .iter()
            .filter(|key| !allowed.contains(*key))
            .map(|key| (*key).to_string())
            .collect()
    };

    let mut checks = Vec::new();
    for (field, matchers) in &spec.field_matchers {
        let actual = get_by_path(output, field);
        for matcher in matchers {
            checks.push(run_matcher(field, matcher, actual, expected));
        }
    }

    let passed =
        missing_keys.is_empty() && unexpected_keys.is_empty() && checks.iter().all(|c| c.passed);

    AssertionResult {
        passed,
        checks,
        missing_keys,
        unexpected_keys,
    }
}

/// Resolve a dot-delimited path against a JSON value. Empty tokens are
/// discarded, so `"a..b"` and `".a.b"` both mean `a.b`. Traversal stops at
/// non-objects.
pub fn get_by_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for token in path.split('.').filter(|t| !t.is_empty()) {
        current = current.as_object()?.get(token)?;
    }
    Some(current)
}

fn run_matcher(
    field: &str,
    matcher: &FieldMatcher,
    actual: Option<&Value>,
    expected_root: &Value,
) -> AssertionCheckResult {
    let (passed, message) = match matcher.op {
        AssertionOperator::Exists => {
            if matches!(actual, Some(v) if !v.is_null()) {
                (true, None)
            } else {
                (false, Some("expected field to be present".to_string()))
            }
        }
        AssertionOperator::Absent => {
            if actual.is_none() || actual.is_some_and(Value::is_null) {
                (true, None)
            } else {
                (false, Some("expected field to be absent".to_string()))
            }
        }
        AssertionOperator::Unsupported => {
            (false, Some("unsupported assertion operator".to_string()))
        }
        op => match resolve_expected(field, matcher, expected_root) {
            Some(expected) => run_value_matcher(op, actual, expected),
            None => (
                false,
                Some("no expected value resolved for matcher".to_string()),
            ),
        },
    };

    AssertionCheckResult {
        field: field.to_string(),
        op: matcher.op,
        passed,
        message,
    }
}

/// Resolve the comparison value for a matcher: an inline `value` wins, then
/// an explicit `$expected.`-prefixed path, then the mirror path (the field's
/// own path applied to the expected document).
fn resolve_expected<'a>(
    field: &str,
    matcher: &'a FieldMatcher,
    expected_root: &'a Value,
) -> Option<&'a Value> {
    if let Some(value) = &matcher.value {
        return Some(value);
    }
    if let Some(path) = &matcher.expected_path {
        if let Some(rest) = path.strip_prefix("$expected.") {
            return get_by_path(expected_root, rest);
        }
    }
    get_by_path(expected_root, field)
}

fn run_value_matcher(
    op: AssertionOperator,
    actual: Option<&Value>,
    expected: &Value,
) -> (bool, Option<String>) {
    match op {
        AssertionOperator::Equals => {
            if actual.is_some_and(|a| json_eq(a, expected)) {
                (true, None)
            } else {
                (
                    false,
                    Some(format!(
                        "expected {} but got {}",
                        expected,
                        render_actual(actual)
                    )),
                )
            }
        }
        AssertionOperator::OneOf => match expected.as_array() {
            Some(options) => {
                if actual.is_some_and(|a| options.iter().any(|opt| json_eq(a, opt))) {
                    (true, None)
                } else {
                    (
                        false,
                        Some(format!(
                            "{} is not one of {}",
                            render_actual(actual),
                            expected
                        )),
                    )
                }
            }
            None => (
                false,
                Some("oneOf requires an array of candidates".to_string()),
            ),
        },
        AssertionOperator::Contains => match (actual, expected) {
            (Some(Value::String(haystack)), Value::String(needle)) => {
                if haystack.contains(needle.as_str()) {
                    (true, None)
                } else {
                    (false, Some(format!("{haystack:?} does not contain {needle:?}")))
                }
            }
            (Some(Value::Array(items)), _) => {
                if items.iter().any(|item| json_eq(item, expected)) {
                    (true, None)
                } else {
                    (false, Some(format!("array does not contain {expected}")))
                }
            }
            _ => (
                false,
                Some("contains requires a string or array actual".to_string()),
            ),
        },
        AssertionOperator::Regex => match expected.as_str() {
            Some(pattern) => match regex::Regex::new(pattern) {
                Ok(re) => {
                    let subject = value_as_match_subject(actual);
                    if re.is_match(&subject) {
                        (true, None)
                    } else {
                        (
                            false,
                            Some(format!("{subject:?} does not match /{pattern}/")),
                        )
                    }
                }
                Err(err) => (false, Some(format!("invalid regex pattern: {err}"))),
            },
            None => (false, Some("regex requires a string pattern".to_string())),
        },
        AssertionOperator::NumericRange => {
            let range: NumericRange = match serde_json::from_value(expected.clone()) {
                Ok(range) => range,
                Err(_) => {
                    return (
                        false,
                        Some("numericRange requires a {min, max} object".to_string()),
                    )
                }
            };
            let Some(number) = actual.and_then(Value::as_f64).filter(|n| n.is_finite()) else {
                return (
                    false,
                    Some(format!("{} is not a finite number", render_actual(actual))),
                );
            };
            if range.min.is_some_and(|min| number < min) {
                (
                    false,
                    Some(format!("{number} is below minimum {}", range.min.unwrap())),
                )
            } else if range.max.is_some_and(|max| number > max) {
                (
                    false,
                    Some(format!("{number} is above maximum {}", range.max.unwrap())),
                )
            } else {
                (true, None)
            }
        }
        // exists/absent/unsupported are handled before expected resolution.
        _ => (false, Some("unsupported assertion operator".to_string())),
    }
}

/// JSON-normalized equality: numbers compare by value (`1 == 1.0`),
/// composites compare element-wise, everything else compares structurally.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

fn value_as_match_subject(actual: Option<&Value>) -> String {
    match actual {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn render_actual(actual: Option<&Value>) -> String {
    match actual {
        None => "<missing>".to_string(),
        Some(value) => value.to_string(),
    }
}
