//! Dynamic field validation

use super::{FieldError, FieldErrorKind, FieldLookup};
use crate::descriptor::{FieldDescriptor, FieldType};
use crate::error::{GatehouseError, Result};
use crate::registry::FieldSchema;
use crate::types::{Payload, PrincipalId, Value};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Checks payloads against a field schema
///
/// Every declared field is checked before returning, so a rejection carries
/// all field errors at once.
#[derive(Clone)]
pub struct FieldValidator {
    lookup: Arc<dyn FieldLookup>,
}

impl FieldValidator {
    /// Validator that checks uniqueness through `lookup`
    pub fn new(lookup: Arc<dyn FieldLookup>) -> Self {
        FieldValidator { lookup }
    }

    /// Validate a payload
    ///
    /// `existing` is the principal being updated; its own values never count
    /// as uniqueness collisions. Undeclared payload keys are ignored.
    #[instrument(skip(self, schema, payload), fields(fields = schema.len()))]
    pub fn validate(
        &self,
        schema: &FieldSchema,
        payload: &Payload,
        existing: Option<PrincipalId>,
    ) -> Result<()> {
        let mut errors = Vec::new();

        for field in schema.iter() {
            if let Some(error) = self.check(field, payload, existing)? {
                errors.push(error);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            debug!("Rejected payload with {} field errors", errors.len());
            Err(GatehouseError::FieldValidationFailed(errors))
        }
    }

    fn check(
        &self,
        field: &FieldDescriptor,
        payload: &Payload,
        existing: Option<PrincipalId>,
    ) -> Result<Option<FieldError>> {
        let value = match payload.get(&field.name) {
            None | Some(Value::Null) => {
                return Ok(field
                    .required
                    .then(|| FieldError::new(&field.name, FieldErrorKind::Required)));
            }
            Some(value) => value,
        };

        if !matches_type(field.field_type, value) {
            return Ok(Some(FieldError::new(
                &field.name,
                FieldErrorKind::Type {
                    expected: field.field_type,
                },
            )));
        }

        if field.unique {
            let holders = self
                .lookup
                .principals_with(&field.name, &coerce(field.field_type, value))
                .map_err(|e| match e {
                    GatehouseError::StoreUnavailable(_) => e,
                    other => GatehouseError::StoreUnavailable(other.to_string()),
                })?;

            if holders.iter().any(|id| Some(*id) != existing) {
                return Ok(Some(FieldError::new(&field.name, FieldErrorKind::Unique)));
            }
        }

        Ok(None)
    }
}

impl std::fmt::Debug for FieldValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldValidator").finish_non_exhaustive()
    }
}

fn matches_type(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => matches!(value, Value::String(_)),
        FieldType::Integer => is_numeric(value),
        FieldType::Boolean => is_boolean_like(value),
        FieldType::Date => value.as_str().and_then(parse_date).is_some(),
    }
}

/// Canonical form of an accepted value for its declared type
///
/// Numeric strings become numbers and whole floats become integers. `0` and
/// `1` become booleans. Values the type rejects are returned unchanged.
pub fn coerce(field_type: FieldType, value: &Value) -> Value {
    match (field_type, value) {
        (FieldType::Integer, Value::Float(f)) if f.is_finite() => number(*f),
        (FieldType::Integer, Value::String(s)) if is_numeric(value) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => s.parse::<f64>().map(number).unwrap_or_else(|_| value.clone()),
            }
        }
        (FieldType::Boolean, Value::Integer(i)) if is_boolean_like(value) => Value::Bool(*i == 1),
        (FieldType::Boolean, Value::String(s)) if is_boolean_like(value) => Value::Bool(s == "1"),
        _ => value.clone(),
    }
}

fn number(f: f64) -> Value {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

/// Numbers and numeric strings
pub fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Integer(_) => true,
        Value::Float(f) => f.is_finite(),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
                && s.parse::<f64>().is_ok()
        }
        _ => false,
    }
}

/// `true`, `false`, `0`, `1`, `"0"` and `"1"`
pub fn is_boolean_like(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Integer(i) => *i == 0 || *i == 1,
        Value::String(s) => s == "0" || s == "1",
        _ => false,
    }
}

/// Parse a timestamp in one of the accepted layouts
///
/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`,
/// `YYYY/MM/DD` and the words `now`, `today`, `tomorrow`, `yesterday`.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    let now = Utc::now();

    match input.to_ascii_lowercase().as_str() {
        "now" => return Some(now),
        "today" => return midnight(now),
        "tomorrow" => return midnight(now + Duration::days(1)),
        "yesterday" => return midnight(now - Duration::days(1)),
        _ => {}
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return Some(naive.and_utc());
        }
    }

    for layout in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, layout) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

fn midnight(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    at.date_naive().and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Lookup backed by a fixed field -> (value, principal) list
    struct StaticLookup(Vec<(&'static str, Value, PrincipalId)>);

    impl FieldLookup for StaticLookup {
        fn principals_with(&self, field: &str, value: &Value) -> Result<Vec<PrincipalId>> {
            Ok(self
                .0
                .iter()
                .filter(|(f, v, _)| *f == field && v == value)
                .map(|(_, _, id)| *id)
                .collect())
        }
    }

    struct BrokenLookup;

    impl FieldLookup for BrokenLookup {
        fn principals_with(&self, _field: &str, _value: &Value) -> Result<Vec<PrincipalId>> {
            Err(GatehouseError::Conflict("connection reset".into()))
        }
    }

    fn schema() -> FieldSchema {
        vec![
            FieldDescriptor::new("phone", FieldType::String).unwrap().required().unique(),
            FieldDescriptor::new("age", FieldType::Integer).unwrap(),
            FieldDescriptor::new("subscribed", FieldType::Boolean).unwrap(),
            FieldDescriptor::new("born", FieldType::Date).unwrap(),
        ]
        .into_iter()
        .collect()
    }

    fn validator() -> FieldValidator {
        FieldValidator::new(Arc::new(StaticLookup(vec![(
            "phone",
            Value::string("555-0100"),
            7,
        )])))
    }

    fn payload(entries: &[(&str, Value)]) -> Payload {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn test_required_missing_is_exactly_one_error() {
        let err = validator()
            .validate(&schema(), &payload(&[("age", Value::Integer(30))]), None)
            .unwrap_err();
        assert_eq!(
            err.field_errors(),
            &[FieldError::new("phone", FieldErrorKind::Required)]
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = validator()
            .validate(&schema(), &payload(&[("phone", Value::Null)]), None)
            .unwrap_err();
        assert_eq!(err.field_errors().len(), 1);
    }

    #[test]
    fn test_errors_accumulate() {
        let err = validator()
            .validate(
                &schema(),
                &payload(&[
                    ("phone", Value::string("555-0100")),
                    ("age", Value::string("thirty")),
                    ("subscribed", Value::string("yes")),
                    ("born", Value::string("someday")),
                ]),
                None,
            )
            .unwrap_err();

        let fields: Vec<_> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["phone", "age", "subscribed", "born"]);
        assert_eq!(err.field_errors()[0].kind, FieldErrorKind::Unique);
    }

    #[test]
    fn test_uniqueness_excludes_self() {
        let body = payload(&[("phone", Value::string("555-0100"))]);
        assert!(validator().validate(&schema(), &body, Some(7)).is_ok());
        assert!(validator().validate(&schema(), &body, Some(8)).is_err());
    }

    #[test]
    fn test_accepted_values() {
        let body = payload(&[
            ("phone", Value::string("555-0199")),
            ("age", Value::string("42")),
            ("subscribed", Value::string("1")),
            ("born", Value::string("1990-04-01")),
        ]);
        assert!(validator().validate(&schema(), &body, None).is_ok());
    }

    #[test]
    fn test_lookup_failure_is_store_unavailable() {
        let validator = FieldValidator::new(Arc::new(BrokenLookup));
        let err = validator
            .validate(&schema(), &payload(&[("phone", Value::string("1"))]), None)
            .unwrap_err();
        assert!(matches!(err, GatehouseError::StoreUnavailable(_)));
    }

    #[test]
    fn test_type_predicates() {
        assert!(is_numeric(&Value::Float(1.5)));
        assert!(is_numeric(&Value::string(" -3e2 ")));
        assert!(!is_numeric(&Value::string("inf")));
        assert!(!is_numeric(&Value::Bool(true)));

        assert!(is_boolean_like(&Value::Integer(0)));
        assert!(is_boolean_like(&Value::Bool(false)));
        assert!(!is_boolean_like(&Value::Integer(2)));
        assert!(!is_boolean_like(&Value::string("true")));

        assert!(parse_date("2024-02-29T10:00:00Z").is_some());
        assert!(parse_date("2024-02-29 10:00:00").is_some());
        assert!(parse_date("tomorrow").is_some());
        assert!(parse_date("2023-02-30").is_none());
    }

    #[test]
    fn test_coerce_to_declared_type() {
        assert_eq!(coerce(FieldType::Integer, &Value::string(" 42 ")), Value::Integer(42));
        assert_eq!(coerce(FieldType::Integer, &Value::string("2.5")), Value::Float(2.5));
        assert_eq!(coerce(FieldType::Integer, &Value::string("1e3")), Value::Integer(1000));
        assert_eq!(coerce(FieldType::Integer, &Value::Float(1.0)), Value::Integer(1));
        assert_eq!(coerce(FieldType::Integer, &Value::Float(1e19)), Value::Float(1e19));
        assert_eq!(coerce(FieldType::Boolean, &Value::Integer(1)), Value::Bool(true));
        assert_eq!(coerce(FieldType::Boolean, &Value::string("0")), Value::Bool(false));
        assert_eq!(coerce(FieldType::String, &Value::Integer(1)), Value::Integer(1));
        assert_eq!(coerce(FieldType::Date, &Value::string("today")), Value::string("today"));
        assert_eq!(coerce(FieldType::Boolean, &Value::Integer(2)), Value::Integer(2));
    }

    #[test]
    fn test_unique_matches_equivalent_forms() {
        let lookup = StaticLookup(vec![("age", Value::Integer(42), 7)]);
        let validator = FieldValidator::new(Arc::new(lookup));
        let schema: FieldSchema = vec![FieldDescriptor::new("age", FieldType::Integer).unwrap().unique()]
            .into_iter()
            .collect();

        let err = validator
            .validate(&schema, &payload(&[("age", Value::string("042"))]), None)
            .unwrap_err();
        assert_eq!(err.field_errors()[0].kind, FieldErrorKind::Unique);
    }
}
