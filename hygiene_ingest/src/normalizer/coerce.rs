//! # Value Coercion
//!
//! Scanner exports are loosely typed: integers arrive as strings, timestamps
//! in several layouts, and documents round-tripped through the document
//! database carry extended-JSON wrappers (`$date`, `$numberLong`, `$oid`).
//! Everything here accepts those forms and returns plain values.

use super::error::NormalizeError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;

const NAIVE_TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    // Nessus ctime, e.g. "Wed Sep 26 12:48:38 2012"
    "%a %b %e %H:%M:%S %Y",
];

pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        Value::Object(map) => map
            .get("$numberLong")
            .or_else(|| map.get("$numberInt"))
            .and_then(coerce_i64),
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Object(map) => map
            .get("$numberDouble")
            .or_else(|| map.get("$numberLong"))
            .or_else(|| map.get("$numberInt"))
            .and_then(coerce_f64),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Strings pass through; numbers are rendered in decimal
pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn coerce_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => number
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::Object(map) => match map.get("$date")? {
            Value::String(text) => parse_timestamp(text),
            millis => coerce_i64(millis).and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        },
        _ => None,
    }
}

/// Parse a timestamp string; zone-less layouts are taken as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        return text
            .parse()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }

    None
}

/// Make a key safe for the document database: dots and a leading `$` become `_`
pub fn clean_key(key: &str) -> String {
    let replaced = key.replace('.', "_");
    match replaced.strip_prefix('$') {
        Some(rest) => format!("_{}", rest),
        None => replaced,
    }
}

/// Unwrap extended-JSON wrappers and clean nested keys
pub fn clean_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.contains_key("$date") {
                if let Some(time) = coerce_datetime(value) {
                    return Value::String(time.to_rfc3339());
                }
            }
            if map.len() == 1 {
                if let Some(number) = map.get("$numberLong").and_then(coerce_i64) {
                    return Value::from(number);
                }
                if let Some(Value::String(oid)) = map.get("$oid") {
                    return Value::String(oid.clone());
                }
            }
            Value::Object(
                map.iter()
                    .map(|(key, nested)| (clean_key(key), clean_value(nested)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(clean_value).collect()),
        other => other.clone(),
    }
}

/// Typed, error-reporting access to a document's fields
///
/// JSON `null` is treated the same as an absent field.
pub(crate) struct FieldReader<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> FieldReader<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|value| !value.is_null())
    }

    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn string(&self, field: &str) -> Result<Option<String>, NormalizeError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => coerce_string(value)
                .map(Some)
                .ok_or_else(|| NormalizeError::invalid(field, "expected a string")),
        }
    }

    pub fn required_string(&self, field: &str) -> Result<String, NormalizeError> {
        self.string(field)?
            .ok_or_else(|| NormalizeError::missing(field))
    }

    pub fn integer(
        &self,
        field: &str,
        range: RangeInclusive<i64>,
    ) -> Result<Option<i64>, NormalizeError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };

        let number = coerce_i64(value)
            .ok_or_else(|| NormalizeError::invalid(field, format!("expected an integer, got {}", value)))?;

        if !range.contains(&number) {
            return Err(NormalizeError::invalid(
                field,
                format!(
                    "{} is outside {}-{}",
                    number,
                    range.start(),
                    range.end()
                ),
            ));
        }

        Ok(Some(number))
    }

    pub fn required_integer(
        &self,
        field: &str,
        range: RangeInclusive<i64>,
    ) -> Result<i64, NormalizeError> {
        self.integer(field, range)?
            .ok_or_else(|| NormalizeError::missing(field))
    }

    pub fn float(
        &self,
        field: &str,
        range: RangeInclusive<f64>,
    ) -> Result<Option<f64>, NormalizeError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };

        let number = coerce_f64(value)
            .ok_or_else(|| NormalizeError::invalid(field, format!("expected a number, got {}", value)))?;

        if !range.contains(&number) {
            return Err(NormalizeError::invalid(
                field,
                format!(
                    "{} is outside {}-{}",
                    number,
                    range.start(),
                    range.end()
                ),
            ));
        }

        Ok(Some(number))
    }

    pub fn datetime(&self, field: &str) -> Result<Option<DateTime<Utc>>, NormalizeError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => coerce_datetime(value)
                .map(Some)
                .ok_or_else(|| NormalizeError::invalid(field, format!("unrecognized timestamp {}", value))),
        }
    }

    /// Fields not in `known`, with cleaned keys and unwrapped values
    pub fn remaining(&self, known: &[&str]) -> Vec<(String, Value)> {
        self.map
            .iter()
            .filter(|(key, value)| !value.is_null() && !known.contains(&key.as_str()))
            .map(|(key, value)| (clean_key(key), clean_value(value)))
            .collect()
    }
}
