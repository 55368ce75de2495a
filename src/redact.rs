//! Report payload redaction.
//!
//! Recursive structural walk replacing personally-identifying substrings in
//! string leaves. Idempotent: redacting an already-redacted value is a
//! no-op, because the replacement tokens match none of the patterns.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email pattern")
});

// Separator-delimited phone shapes only; plain digit runs fall through to
// the number rule below.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]?\d{4}\b").expect("phone pattern")
});

static LONG_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{12,19}\b").expect("number pattern"));

/// Redact a JSON value for inclusion in a report.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), redact(item)))
                .collect(),
        ),
        Value::Null => Value::Null,
        other => other.clone(),
    }
}

fn redact_text(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, "[REDACTED_EMAIL]");
    let text = PHONE_RE.replace_all(&text, "[REDACTED_PHONE]");
    LONG_NUMBER_RE
        .replace_all(&text, "[REDACTED_NUMBER]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_emails() {
        let value = json!({ "contact": "reach me at jane.doe@example.com today" });
        let redacted = redact(&value);
        assert_eq!(
            redacted["contact"],
            json!("reach me at [REDACTED_EMAIL] today")
        );
    }

    #[test]
    fn test_redacts_phone_numbers() {
        let value = json!("call +1 (555) 123-4567 or 555-867-5309");
        let redacted = redact(&value);
        let text = redacted.as_str().unwrap();
        assert!(!text.contains("555"), "got: {text}");
        assert!(text.contains("[REDACTED_PHONE]"));
    }

    #[test]
    fn test_redacts_long_digit_runs() {
        let value = json!("card 4111111111111111 on file");
        assert_eq!(redact(&value), json!("card [REDACTED_NUMBER] on file"));
    }

    #[test]
    fn test_short_digit_runs_survive() {
        let value = json!("order 12345 confirmed");
        assert_eq!(redact(&value), value);
    }

    #[test]
    fn test_structural_walk() {
        let value = json!({
            "emails": ["a@example.com", "plain text"],
            "nested": { "phone": "555-123-4567" },
            "count": 3,
            "flag": true,
            "nothing": null
        });
        let redacted = redact(&value);
        assert_eq!(redacted["emails"][0], json!("[REDACTED_EMAIL]"));
        assert_eq!(redacted["emails"][1], json!("plain text"));
        assert_eq!(redacted["nested"]["phone"], json!("[REDACTED_PHONE]"));
        assert_eq!(redacted["count"], json!(3));
        assert_eq!(redacted["flag"], json!(true));
        assert_eq!(redacted["nothing"], Value::Null);
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let value = json!({
            "a": "jane@example.com",
            "b": "+44 201 555 0199",
            "c": "4111111111111111",
            "d": ["nested@example.com", { "e": "555-123-4567" }]
        });
        let once = redact(&value);
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_preserves_key_order() {
        let value: Value = serde_json::from_str(r#"{"z": "a@b.co", "a": 1}"#).unwrap();
        let redacted = redact(&value);
        let keys: Vec<&String> = redacted.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a"]);
    }
}
