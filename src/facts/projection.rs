//! Projector
//!
//! Maps a raw entity onto the documented output shape. Paths are dotted
//! traversals into the entity's plain mapping; a missing step yields `null`
//! rather than an error.

use super::binder::Binding;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field declaration as written in a descriptor table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDef>>,
    #[serde(default)]
    pub omit_null: bool,
}

/// Errors in a projection declaration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("field {field}: invalid path {path:?}")]
    InvalidPath { field: String, path: String },

    #[error("field {0}: a parameter source cannot also have a path or nested fields")]
    ConflictingSource(String),

    #[error("field {0} is declared more than once")]
    DuplicateField(String),

    #[error("field name must not be empty")]
    EmptyName,
}

/// Where a field takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    /// Dotted path into the entity
    Path(Vec<String>),
    /// A bound module parameter
    Param(String),
    /// Sub-object projected from the subtree at `path`
    Nested { path: Vec<String>, fields: Vec<Field> },
}

/// One output field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub source: FieldSource,
    pub omit_null: bool,
}

impl Field {
    pub fn path(name: &str, path: &str) -> Result<Self, ProjectionError> {
        Ok(Self {
            name: name.to_string(),
            source: FieldSource::Path(parse_path(name, path)?),
            omit_null: false,
        })
    }

    pub fn param(name: &str, param: &str) -> Self {
        Self {
            name: name.to_string(),
            source: FieldSource::Param(param.to_string()),
            omit_null: false,
        }
    }

    /// Parameters this field (or its nested fields) reads from the binding
    pub fn params_referenced(&self) -> Vec<&str> {
        match &self.source {
            FieldSource::Path(_) => Vec::new(),
            FieldSource::Param(p) => vec![p.as_str()],
            FieldSource::Nested { fields, .. } => {
                fields.iter().flat_map(|f| f.params_referenced()).collect()
            }
        }
    }
}

impl TryFrom<FieldDef> for Field {
    type Error = ProjectionError;

    fn try_from(def: FieldDef) -> Result<Self, Self::Error> {
        if def.name.is_empty() {
            return Err(ProjectionError::EmptyName);
        }

        let source = match (def.param, def.fields) {
            (Some(param), None) if def.path.is_none() => FieldSource::Param(param),
            (Some(_), _) => return Err(ProjectionError::ConflictingSource(def.name)),
            (None, fields) => {
                let raw = def.path.as_deref().unwrap_or(&def.name);
                let path = parse_path(&def.name, raw)?;
                match fields {
                    Some(fields) => FieldSource::Nested {
                        path,
                        fields: build_fields(fields)?,
                    },
                    None => FieldSource::Path(path),
                }
            }
        };

        Ok(Self {
            name: def.name,
            source,
            omit_null: def.omit_null,
        })
    }
}

/// Convert a list of declarations, rejecting duplicate output names
pub fn build_fields(defs: Vec<FieldDef>) -> Result<Vec<Field>, ProjectionError> {
    let mut fields: Vec<Field> = Vec::with_capacity(defs.len());
    for def in defs {
        let field = Field::try_from(def)?;
        if fields.iter().any(|f| f.name == field.name) {
            return Err(ProjectionError::DuplicateField(field.name));
        }
        fields.push(field);
    }
    Ok(fields)
}

/// Split a dotted path; empty segments are invalid
fn parse_path(field: &str, path: &str) -> Result<Vec<String>, ProjectionError> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty() || s.trim() != s) {
        return Err(ProjectionError::InvalidPath {
            field: field.to_string(),
            path: path.to_string(),
        });
    }
    Ok(segments)
}

/// Null-safe traversal; numeric segments index arrays
pub fn lookup_path<'a, S: AsRef<str>>(root: &'a Map<String, Value>, path: &[S]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = root.get(first.as_ref())?;

    for segment in rest {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Project one entity's plain mapping through `fields`
pub fn project(fields: &[Field], entity: &Map<String, Value>, binding: &Binding) -> Map<String, Value> {
    let mut out = Map::with_capacity(fields.len());

    for field in fields {
        let value = match &field.source {
            FieldSource::Path(path) => lookup_path(entity, path).cloned().unwrap_or(Value::Null),
            FieldSource::Param(param) => binding
                .get(param)
                .map(|v| v.to_json())
                .unwrap_or(Value::Null),
            FieldSource::Nested { path, fields } => {
                let empty = Map::new();
                let subtree = lookup_path(entity, path)
                    .and_then(|v| v.as_object())
                    .unwrap_or(&empty);
                Value::Object(project(fields, subtree, binding))
            }
        };

        if field.omit_null && value.is_null() {
            continue;
        }
        out.insert(field.name.clone(), value);
    }

    out
}
