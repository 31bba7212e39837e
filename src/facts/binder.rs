//! Argument Binder
//!
//! Validates a host-supplied parameter mapping against a [`Schema`] and
//! produces an immutable [`Binding`]. No I/O happens here.

use super::schema::{ParamKind, ParamSpec, Schema};
use crate::error::FactsError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Raw parameter mapping as handed over by the host
pub type RawParams = BTreeMap<String, ParamValue>;

/// A host-supplied parameter value before coercion
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    List(Vec<ParamValue>),
    Object(Map<String, Value>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    fn describe(&self) -> String {
        match self {
            ParamValue::Null => "null".to_string(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Integer(i) => i.to_string(),
            ParamValue::Number(n) => n.to_string(),
            ParamValue::String(s) => format!("{:?}", s),
            ParamValue::Timestamp(t) => t.to_rfc3339(),
            ParamValue::List(items) => format!("a list of {} item(s)", items.len()),
            ParamValue::Object(_) => "a mapping".to_string(),
        }
    }

    /// Render a scalar as a string, if it is one
    fn scalar_string(&self) -> Option<String> {
        match self {
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Integer(i) => Some(i.to_string()),
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::String(s) => Some(s.clone()),
            ParamValue::Timestamp(t) => Some(format_datetime(t)),
            _ => None,
        }
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Integer(i),
                None => ParamValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ParamValue::String(s),
            Value::Array(items) => ParamValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => ParamValue::Object(map),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(value: DateTime<Utc>) -> Self {
        ParamValue::Timestamp(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// A parameter value after coercion to its declared kind
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    String(String),
    Integer(i64),
    Number(f64),
    Datetime(DateTime<Utc>),
    StringList(Vec<String>),
}

impl BoundValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BoundValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            BoundValue::StringList(items) => Some(items),
            _ => None,
        }
    }

    /// JSON form handed to the SDK and to projections
    pub fn to_json(&self) -> Value {
        match self {
            BoundValue::String(s) => Value::String(s.clone()),
            BoundValue::Integer(i) => Value::from(*i),
            BoundValue::Number(n) => Value::from(*n),
            BoundValue::Datetime(t) => Value::String(format_datetime(t)),
            BoundValue::StringList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

fn format_datetime(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Every declared parameter mapped to its value, or `None` when absent
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Binding {
    values: Vec<(String, Option<BoundValue>)>,
}

impl Binding {
    /// Bound value of a parameter; `None` when undeclared or null
    pub fn get(&self, name: &str) -> Option<&BoundValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn declares(&self, name: &str) -> bool {
        self.values.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&BoundValue>)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }
}

/// Validate `raw` against `schema` and coerce every supplied value
pub fn bind(schema: &Schema, raw: &RawParams) -> Result<Binding, FactsError> {
    if let Some(unknown) = raw.keys().find(|k| !schema.contains(k)) {
        return Err(FactsError::UnknownParameter(unknown.clone()));
    }

    let mut values = Vec::with_capacity(schema.len());
    let mut missing = Vec::new();

    for spec in schema.iter() {
        let supplied = raw.get(&spec.name).filter(|v| !v.is_null());
        let bound = match supplied {
            Some(value) => Some(coerce(spec, value.clone())?),
            None => match &spec.default {
                Some(default) => Some(coerce(spec, default.clone().into())?),
                None => None,
            },
        };

        if spec.required && bound.is_none() {
            missing.push(spec.name.clone());
        }
        values.push((spec.name.clone(), bound));
    }

    if !missing.is_empty() {
        return Err(FactsError::MissingRequired(missing));
    }

    Ok(Binding { values })
}

/// Coerce one value to the kind declared by `spec`
pub(crate) fn coerce(spec: &ParamSpec, value: ParamValue) -> Result<BoundValue, FactsError> {
    let mismatch = |detail: String| FactsError::TypeMismatch {
        name: spec.name.clone(),
        expected: spec.kind.as_str(),
        detail,
    };

    match spec.kind {
        ParamKind::String => value
            .scalar_string()
            .map(BoundValue::String)
            .ok_or_else(|| mismatch(format!("{} is not a string", value.describe()))),

        ParamKind::Integer => match value {
            ParamValue::Integer(i) => Ok(BoundValue::Integer(i)),
            ParamValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Ok(BoundValue::Integer(n as i64))
            }
            ParamValue::String(ref s) => s
                .trim()
                .parse::<i64>()
                .map(BoundValue::Integer)
                .map_err(|_| mismatch(format!("{} is not an integer", value.describe()))),
            other => Err(mismatch(format!("{} is not an integer", other.describe()))),
        },

        ParamKind::Number => {
            let number = match value {
                ParamValue::Integer(i) => Some(i as f64),
                ParamValue::Number(n) => Some(n),
                ParamValue::String(ref s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .filter(|n| n.is_finite())
                .map(BoundValue::Number)
                .ok_or_else(|| mismatch(format!("{} is not a finite number", value.describe())))
        }

        ParamKind::Datetime => match value {
            ParamValue::Timestamp(t) => Ok(BoundValue::Datetime(t)),
            ParamValue::String(ref s) => parse_datetime(s)
                .map(BoundValue::Datetime)
                .ok_or_else(|| mismatch(format!("{} is not an ISO-8601 timestamp", value.describe()))),
            other => Err(mismatch(format!("{} is not a timestamp", other.describe()))),
        },

        ParamKind::ListOfString => match value {
            ParamValue::List(items) => items
                .iter()
                .map(|item| {
                    item.scalar_string().ok_or_else(|| {
                        mismatch(format!("list element {} is not a string", item.describe()))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(BoundValue::StringList),
            ParamValue::String(s) => Ok(BoundValue::StringList(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            other => other
                .scalar_string()
                .map(|s| BoundValue::StringList(vec![s]))
                .ok_or_else(|| mismatch(format!("{} is not a list", other.describe()))),
        },
    }
}

/// Parse RFC 3339, or a naive date/time interpreted as UTC
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            ParamSpec::new("resource_group", ParamKind::String).required(),
            ParamSpec::new("name", ParamKind::String),
            ParamSpec::new("top", ParamKind::Integer).with_default(json!(25)),
            ParamSpec::new("ratio", ParamKind::Number),
            ParamSpec::new("start_time", ParamKind::Datetime),
            ParamSpec::new("tags", ParamKind::ListOfString),
        ])
        .unwrap()
    }

    fn raw(pairs: &[(&str, ParamValue)]) -> RawParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let err = bind(
            &schema(),
            &raw(&[("resource_group", "rg".into()), ("bogus", 1i64.into())]),
        )
        .unwrap_err();
        assert_eq!(err, FactsError::UnknownParameter("bogus".into()));
    }

    #[test]
    fn test_missing_required_rejected() {
        let err = bind(&schema(), &raw(&[("name", "web".into())])).unwrap_err();
        assert_eq!(err, FactsError::MissingRequired(vec!["resource_group".into()]));
    }

    #[test]
    fn test_explicit_null_counts_as_absent() {
        let err = bind(&schema(), &raw(&[("resource_group", ParamValue::Null)])).unwrap_err();
        assert!(matches!(err, FactsError::MissingRequired(_)));

        let binding = bind(
            &schema(),
            &raw(&[("resource_group", "rg".into()), ("name", ParamValue::Null)]),
        )
        .unwrap();
        assert!(binding.declares("name"));
        assert!(!binding.is_bound("name"));
    }

    #[test]
    fn test_defaults_applied() {
        let binding = bind(&schema(), &raw(&[("resource_group", "rg".into())])).unwrap();
        assert_eq!(binding.get("top"), Some(&BoundValue::Integer(25)));
        assert_eq!(binding.get("ratio"), None);
    }

    #[test]
    fn test_scalar_coercions() {
        let binding = bind(
            &schema(),
            &raw(&[
                ("resource_group", 42i64.into()),
                ("top", "7".into()),
                ("ratio", "0.5".into()),
            ]),
        )
        .unwrap();
        assert_eq!(binding.get("resource_group").and_then(|v| v.as_str()), Some("42"));
        assert_eq!(binding.get("top"), Some(&BoundValue::Integer(7)));
        assert_eq!(binding.get("ratio"), Some(&BoundValue::Number(0.5)));
    }

    #[test]
    fn test_type_mismatch() {
        let err = bind(
            &schema(),
            &raw(&[("resource_group", "rg".into()), ("top", "ten".into())]),
        )
        .unwrap_err();
        assert!(matches!(err, FactsError::TypeMismatch { ref name, .. } if name == "top"));

        let err = bind(
            &schema(),
            &raw(&[("resource_group", "rg".into()), ("top", 2.5f64.into())]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");

        let err = bind(
            &schema(),
            &raw(&[("resource_group", ParamValue::List(vec!["a".into()]))]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn test_list_of_string_preserves_order() {
        let binding = bind(
            &schema(),
            &raw(&[
                ("resource_group", "rg".into()),
                ("tags", vec!["env:prod", "owner", "tier:web"].into()),
            ]),
        )
        .unwrap();
        assert_eq!(
            binding.get("tags").and_then(|v| v.as_string_list()),
            Some(&["env:prod".to_string(), "owner".to_string(), "tier:web".to_string()][..])
        );
    }

    #[test]
    fn test_list_of_string_from_comma_separated() {
        let binding = bind(
            &schema(),
            &raw(&[("resource_group", "rg".into()), ("tags", "env:prod, owner".into())]),
        )
        .unwrap();
        assert_eq!(
            binding.get("tags"),
            Some(&BoundValue::StringList(vec!["env:prod".into(), "owner".into()]))
        );
    }

    #[test]
    fn test_datetime_canonicalized_to_utc() {
        let binding = bind(
            &schema(),
            &raw(&[
                ("resource_group", "rg".into()),
                ("start_time", "2024-03-01T12:00:00+02:00".into()),
            ]),
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(binding.get("start_time"), Some(&BoundValue::Datetime(expected)));
        assert_eq!(
            binding.get("start_time").map(|v| v.to_json()),
            Some(json!("2024-03-01T10:00:00Z"))
        );
    }

    #[test]
    fn test_datetime_accepts_parsed_and_naive() {
        let parsed = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let binding = bind(
            &schema(),
            &raw(&[("resource_group", "rg".into()), ("start_time", parsed.into())]),
        )
        .unwrap();
        assert_eq!(binding.get("start_time"), Some(&BoundValue::Datetime(parsed)));

        assert_eq!(
            parse_datetime("2024-01-02"),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).single()
        );
        assert_eq!(
            parse_datetime("2024-01-02T03:04:05"),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single()
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_bind_does_not_touch_input() {
        let input = raw(&[("resource_group", "rg".into()), ("name", "web".into())]);
        let before = input.clone();
        let _ = bind(&schema(), &input).unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn test_param_value_from_json() {
        assert_eq!(ParamValue::from(json!(3)), ParamValue::Integer(3));
        assert_eq!(ParamValue::from(json!(1.5)), ParamValue::Number(1.5));
        assert_eq!(
            ParamValue::from(json!(["a", 1])),
            ParamValue::List(vec![ParamValue::String("a".into()), ParamValue::Integer(1)])
        );
    }
}
