//! Module Descriptor
//!
//! The declarative bundle behind one fact module. A [`DescriptorDef`] is what
//! the descriptor table holds; [`Descriptor::build`] cross-checks it against
//! its client class and produces the immutable value the engine runs.

use super::dispatch::{DispatchRule, OperationEntry, Predicate, RuleAction, RuleDef};
use super::projection::{build_fields, Field, FieldDef, ProjectionError};
use super::schema::{ParamKind, ParamSpec, Schema, SchemaError};
use crate::arm::client::{ClientClass, ReadKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Parameter whose value every projection carries when the schema declares it
pub const RESOURCE_GROUP_PARAM: &str = "resource_group";

/// Parameter holding the caller's tag filter
pub const TAGS_PARAM: &str = "tags";

/// Descriptor as written in the descriptor table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorDef {
    #[serde(default)]
    pub description: Option<String>,
    pub client: String,
    pub schema: Vec<ParamSpec>,
    pub operations: BTreeMap<String, OperationEntry>,
    pub dispatch: Vec<RuleDef>,
    pub projection: Vec<FieldDef>,
    pub result_key: String,
}

/// Construction-time validation failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("unknown client class {0}")]
    UnknownClient(String),

    #[error("operation {op}: {client} has no subclient {subclient}")]
    UnknownSubclient {
        op: String,
        client: String,
        subclient: String,
    },

    #[error("operation {op}: {subclient} has no method {method}")]
    UnknownMethod {
        op: String,
        subclient: String,
        method: String,
    },

    #[error("operation {op}: {subclient}.{method} takes no keyword {keyword}")]
    UnsupportedArgument {
        op: String,
        subclient: String,
        method: String,
        keyword: String,
    },

    #[error("operation {op}: keyword {keyword} is supplied more than once")]
    ConflictingArgument { op: String, keyword: String },

    #[error("{context} references undeclared parameter {param}")]
    UnknownParameter { context: String, param: String },

    #[error("dispatch rule {index} names unknown operation {op}")]
    UnknownOperation { index: usize, op: String },

    #[error("dispatch rule {index}: {detail}")]
    InvalidRule { index: usize, detail: String },

    #[error("a default dispatch rule must be the last rule")]
    DefaultNotLast,

    #[error("no dispatch rules declared")]
    EmptyDispatch,

    #[error("invalid result key {0:?}")]
    InvalidResultKey(String),

    #[error("parameter tags must be list-of-string, not {0}")]
    TagsNotStringList(ParamKind),
}

/// Validated, immutable fact module definition
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub id: String,
    pub description: Option<String>,
    pub schema: Schema,
    pub client: Arc<ClientClass>,
    pub operations: BTreeMap<String, OperationEntry>,
    pub dispatch: Vec<DispatchRule>,
    pub projection: Vec<Field>,
    pub result_key: String,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Descriptor {
    /// Validate a table entry against the known client classes
    pub fn build(
        id: &str,
        def: DescriptorDef,
        clients: &HashMap<String, Arc<ClientClass>>,
    ) -> Result<Self, DescriptorError> {
        let schema = Schema::new(def.schema)?;
        if let Some(tags) = schema.get(TAGS_PARAM) {
            if tags.kind != ParamKind::ListOfString {
                return Err(DescriptorError::TagsNotStringList(tags.kind));
            }
        }

        let client = clients
            .get(&def.client)
            .cloned()
            .ok_or_else(|| DescriptorError::UnknownClient(def.client.clone()))?;

        for (op, entry) in &def.operations {
            validate_operation(op, entry, &client, &schema)?;
        }

        let dispatch = validate_dispatch(def.dispatch, &def.operations, &schema)?;

        let mut projection = build_fields(def.projection)?;
        for field in &projection {
            for param in field.params_referenced() {
                if !schema.contains(param) {
                    return Err(DescriptorError::UnknownParameter {
                        context: format!("projection field {}", field.name),
                        param: param.to_string(),
                    });
                }
            }
        }
        if schema.contains(RESOURCE_GROUP_PARAM)
            && !projection.iter().any(|f| f.name == RESOURCE_GROUP_PARAM)
        {
            projection.insert(0, Field::param(RESOURCE_GROUP_PARAM, RESOURCE_GROUP_PARAM));
        }

        if !is_identifier(&def.result_key) || def.result_key == "changed" {
            return Err(DescriptorError::InvalidResultKey(def.result_key));
        }

        Ok(Self {
            id: id.to_string(),
            description: def.description,
            schema,
            client,
            operations: def.operations,
            dispatch,
            projection,
            result_key: def.result_key,
        })
    }

    pub fn operation(&self, tag: &str) -> Option<&OperationEntry> {
        self.operations.get(tag)
    }

    /// Whether an operation yields one entity or a collection
    pub fn read_kind(&self, tag: &str) -> Option<ReadKind> {
        let entry = self.operations.get(tag)?;
        self.client
            .method(&entry.subclient, &entry.method)
            .map(|m| m.kind)
    }

    /// Does the schema carry a tag filter parameter?
    pub fn filters_tags(&self) -> bool {
        self.schema.contains(TAGS_PARAM)
    }

    /// Serializable overview for hosts
    pub fn summary(&self) -> DescriptorSummary<'_> {
        DescriptorSummary {
            id: &self.id,
            description: self.description.as_deref(),
            client: &self.client.name,
            provider: &self.client.provider,
            result_key: &self.result_key,
            parameters: &self.schema,
            operations: self
                .operations
                .iter()
                .map(|(tag, entry)| OperationSummary {
                    tag,
                    subclient: &entry.subclient,
                    method: &entry.method,
                    kind: self.read_kind(tag),
                })
                .collect(),
            dispatch: &self.dispatch,
        }
    }
}

fn validate_operation(
    op: &str,
    entry: &OperationEntry,
    client: &ClientClass,
    schema: &Schema,
) -> Result<(), DescriptorError> {
    if !client.has_subclient(&entry.subclient) {
        return Err(DescriptorError::UnknownSubclient {
            op: op.to_string(),
            client: client.name.clone(),
            subclient: entry.subclient.clone(),
        });
    }
    let method = client
        .method(&entry.subclient, &entry.method)
        .ok_or_else(|| DescriptorError::UnknownMethod {
            op: op.to_string(),
            subclient: entry.subclient.clone(),
            method: entry.method.clone(),
        })?;

    let unsupported = |keyword: &str| DescriptorError::UnsupportedArgument {
        op: op.to_string(),
        subclient: entry.subclient.clone(),
        method: entry.method.clone(),
        keyword: keyword.to_string(),
    };

    for keyword in entry.args.keys() {
        if !method.accepts(keyword) {
            return Err(unsupported(keyword));
        }
    }

    let mut seen: Vec<&str> = entry.args.keys().map(|k| k.as_str()).collect();
    for (param, keyword) in &entry.bind {
        if !schema.contains(param) {
            return Err(DescriptorError::UnknownParameter {
                context: format!("operation {}", op),
                param: param.clone(),
            });
        }
        if !method.accepts(keyword) {
            return Err(unsupported(keyword));
        }
        if seen.contains(&keyword.as_str()) {
            return Err(DescriptorError::ConflictingArgument {
                op: op.to_string(),
                keyword: keyword.clone(),
            });
        }
        seen.push(keyword);
    }

    Ok(())
}

fn validate_dispatch(
    defs: Vec<RuleDef>,
    operations: &BTreeMap<String, OperationEntry>,
    schema: &Schema,
) -> Result<Vec<DispatchRule>, DescriptorError> {
    if defs.is_empty() {
        return Err(DescriptorError::EmptyDispatch);
    }

    let last = defs.len() - 1;
    let mut rules = Vec::with_capacity(defs.len());

    for (index, def) in defs.into_iter().enumerate() {
        let rule = DispatchRule::try_from(def)
            .map_err(|detail| DescriptorError::InvalidRule { index, detail })?;

        if rule.when == Predicate::Default && index != last {
            return Err(DescriptorError::DefaultNotLast);
        }

        let referenced = match &rule.action {
            RuleAction::Op(op) => {
                if !operations.contains_key(op) {
                    return Err(DescriptorError::UnknownOperation {
                        index,
                        op: op.clone(),
                    });
                }
                rule.when.params().iter().collect::<Vec<_>>()
            }
            RuleAction::FailMissing(params) => rule.when.params().iter().chain(params).collect(),
        };
        for param in referenced {
            if !schema.contains(param) {
                return Err(DescriptorError::UnknownParameter {
                    context: format!("dispatch rule {}", index),
                    param: param.clone(),
                });
            }
        }

        rules.push(rule);
    }

    Ok(rules)
}

/// Host-facing overview of a descriptor
#[derive(Debug, Serialize)]
pub struct DescriptorSummary<'a> {
    pub id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub client: &'a str,
    pub provider: &'a str,
    pub result_key: &'a str,
    pub parameters: &'a Schema,
    pub operations: Vec<OperationSummary<'a>>,
    pub dispatch: &'a [DispatchRule],
}

#[derive(Debug, Serialize)]
pub struct OperationSummary<'a> {
    pub tag: &'a str,
    pub subclient: &'a str,
    pub method: &'a str,
    pub kind: Option<ReadKind>,
}
