//! Argument Schema
//!
//! Declarative description of the parameters a fact module accepts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scalar kinds a parameter may take. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Datetime,
    ListOfString,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Datetime => "datetime",
            ParamKind::ListOfString => "list-of-string",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ParamKind::String),
            "integer" => Ok(ParamKind::Integer),
            "number" => Ok(ParamKind::Number),
            "datetime" => Ok(ParamKind::Datetime),
            "list-of-string" => Ok(ParamKind::ListOfString),
            other => Err(SchemaError::UnknownKind(other.to_string())),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Errors raised while constructing a schema
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("parameter {0} is declared more than once")]
    DuplicateParameter(String),

    #[error("unknown parameter kind: {0}")]
    UnknownKind(String),

    #[error("default for {name} does not fit kind {kind}: {detail}")]
    InvalidDefault {
        name: String,
        kind: ParamKind,
        detail: String,
    },

    #[error("parameter {0} is required and also has a default")]
    RequiredWithDefault(String),
}

/// Ordered, duplicate-free set of parameter declarations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    params: Vec<ParamSpec>,
}

impl Schema {
    /// Build a schema, rejecting duplicate names and ill-typed defaults
    pub fn new(params: Vec<ParamSpec>) -> Result<Self, SchemaError> {
        for (i, spec) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == spec.name) {
                return Err(SchemaError::DuplicateParameter(spec.name.clone()));
            }
            if let Some(default) = &spec.default {
                if spec.required {
                    return Err(SchemaError::RequiredWithDefault(spec.name.clone()));
                }
                super::binder::coerce(spec, default.clone().into()).map_err(|e| {
                    SchemaError::InvalidDefault {
                        name: spec.name.clone(),
                        kind: spec.kind,
                        detail: e.to_string(),
                    }
                })?;
            }
        }
        Ok(Self { params })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let params = Vec::<ParamSpec>::deserialize(deserializer)?;
        Schema::new(params).map_err(serde::de::Error::custom)
    }
}
