//! Helpers for partial updates sent as raw JSON objects, where a missing key
//! and an explicit `null` mean different things.

use serde_json::Value;

use crate::validation::FieldErrors;

#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(Value::Number(n)) => Ok(NullableValue::String(n.to_string())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// Classifies `body[field]`, recording a field error for other JSON types.
pub fn nullable_field(body: &Value, field: &str, errors: &mut FieldErrors) -> NullableValue {
    match classify_nullable(body.get(field)) {
        Ok(value) => value,
        Err(message) => {
            errors.push(field, message);
            NullableValue::Omitted
        }
    }
}

/// Changeset value for a nullable text column; blank strings clear it.
pub fn optional_text_change(value: &NullableValue) -> Option<Option<&str>> {
    match value {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::String(text) => {
            let trimmed = text.trim();
            Some((!trimmed.is_empty()).then_some(trimmed))
        }
    }
}

/// Changeset value for a required text column.
pub fn required_text_change<'a>(
    value: &'a NullableValue,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<&'a str> {
    match value {
        NullableValue::Omitted => None,
        NullableValue::Null => {
            errors.push(field, format!("{field} cannot be null"));
            None
        }
        NullableValue::String(text) if text.trim().is_empty() => {
            errors.push(field, format!("{field} must not be empty"));
            None
        }
        NullableValue::String(text) => Some(text.trim()),
    }
}

/// Reads an optional boolean, recording a field error for other types.
pub fn bool_field(body: &Value, field: &str, errors: &mut FieldErrors) -> Option<bool> {
    match body.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(other) => {
            errors.push(field, format!("expected boolean, got {other}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn distinguishes_missing_from_null() {
        let body = json!({ "notes": null, "name": "Gate", "number": 12 });
        assert_eq!(classify_nullable(body.get("missing")), Ok(NullableValue::Omitted));
        assert_eq!(classify_nullable(body.get("notes")), Ok(NullableValue::Null));
        assert_eq!(
            classify_nullable(body.get("name")),
            Ok(NullableValue::String("Gate".into()))
        );
        assert_eq!(
            classify_nullable(body.get("number")),
            Ok(NullableValue::String("12".into()))
        );
        assert!(classify_nullable(Some(&json!([1]))).is_err());
    }

    #[test]
    fn blank_text_clears_optional_columns() {
        assert_eq!(optional_text_change(&NullableValue::Omitted), None);
        assert_eq!(optional_text_change(&NullableValue::Null), Some(None));
        assert_eq!(
            optional_text_change(&NullableValue::String("  ".into())),
            Some(None)
        );
        assert_eq!(
            optional_text_change(&NullableValue::String(" East ".into())),
            Some(Some("East"))
        );
    }

    #[test]
    fn required_text_rejects_null_and_blank() {
        let mut errors = FieldErrors::new();
        let null = NullableValue::Null;
        let blank = NullableValue::String(" ".into());
        assert_eq!(required_text_change(&null, "name", &mut errors), None);
        assert_eq!(required_text_change(&blank, "name", &mut errors), None);
        assert!(!errors.is_empty());
    }

    #[test]
    fn reads_booleans() {
        let mut errors = FieldErrors::new();
        let body = json!({ "is_active": false, "bad": "yes" });
        assert_eq!(bool_field(&body, "is_active", &mut errors), Some(false));
        assert_eq!(bool_field(&body, "absent", &mut errors), None);
        assert!(errors.is_empty());
        assert_eq!(bool_field(&body, "bad", &mut errors), None);
        assert!(!errors.is_empty());
    }
}
