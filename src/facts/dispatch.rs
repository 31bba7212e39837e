//! Dispatcher
//!
//! Picks exactly one read path from the descriptor's rules, builds the SDK
//! keyword arguments, and runs the read. Cloud-side failures come back as
//! [`DispatchOutcome::Failed`]; only caller bugs become errors.

use super::binder::Binding;
use super::descriptor::Descriptor;
use crate::arm::client::{Entity, ManagementClient, ReadCall, ReadKind, ReadResponse};
use crate::arm::http::CloudError;
use crate::error::FactsError;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Condition over the parameter binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Every listed parameter is non-null
    AllBound(Vec<String>),
    /// At least one listed parameter is non-null
    AnyBound(Vec<String>),
    /// Always holds; only valid as the last rule
    Default,
}

impl Predicate {
    pub fn holds(&self, binding: &Binding) -> bool {
        match self {
            Predicate::AllBound(params) => params.iter().all(|p| binding.is_bound(p)),
            Predicate::AnyBound(params) => params.iter().any(|p| binding.is_bound(p)),
            Predicate::Default => true,
        }
    }

    pub fn params(&self) -> &[String] {
        match self {
            Predicate::AllBound(params) | Predicate::AnyBound(params) => params,
            Predicate::Default => &[],
        }
    }
}

/// What a matching rule does
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Run the named operation-table entry
    Op(String),
    /// Abort: the listed parameters are needed for any read
    FailMissing(Vec<String>),
}

/// Rule as written in a descriptor table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub when: Predicate,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub fail_missing: Option<Vec<String>>,
}

/// One dispatch rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRule {
    pub when: Predicate,
    pub action: RuleAction,
}

impl TryFrom<RuleDef> for DispatchRule {
    type Error = String;

    fn try_from(def: RuleDef) -> Result<Self, Self::Error> {
        let action = match (def.op, def.fail_missing) {
            (Some(op), None) => RuleAction::Op(op),
            (None, Some(params)) if !params.is_empty() => RuleAction::FailMissing(params),
            (None, Some(_)) => return Err("fail_missing must list at least one parameter".into()),
            (Some(_), Some(_)) => return Err("a rule takes either op or fail_missing, not both".into()),
            (None, None) => return Err("a rule needs op or fail_missing".into()),
        };
        Ok(Self {
            when: def.when,
            action,
        })
    }
}

/// A read operation: which subclient method to call and how module
/// parameters map onto its keyword arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationEntry {
    pub subclient: String,
    pub method: String,
    /// Module parameter -> SDK keyword
    #[serde(default)]
    pub bind: BTreeMap<String, String>,
    /// Constant SDK keywords
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl OperationEntry {
    /// Keyword arguments for this call; null parameters are left out
    pub fn kwargs(&self, binding: &Binding) -> Map<String, Value> {
        let mut kwargs = self.args.clone();
        for (param, keyword) in &self.bind {
            if let Some(value) = binding.get(param) {
                kwargs.insert(keyword.clone(), value.to_json());
            }
        }
        kwargs
    }
}

/// Outcome of a dispatched read
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Entities(Vec<Entity>),
    Failed { operation: String, error: CloudError },
}

/// Walk the rules in order; the first whose predicate holds decides
pub fn select_operation<'a>(rules: &'a [DispatchRule], binding: &Binding) -> Result<&'a str, FactsError> {
    for rule in rules {
        if !rule.when.holds(binding) {
            continue;
        }
        return match &rule.action {
            RuleAction::Op(tag) => Ok(tag.as_str()),
            RuleAction::FailMissing(params) => {
                let unbound: Vec<String> = params
                    .iter()
                    .filter(|p| !binding.is_bound(p))
                    .cloned()
                    .collect();
                Err(FactsError::MissingRequired(if unbound.is_empty() {
                    params.clone()
                } else {
                    unbound
                }))
            }
        };
    }

    let bound: Vec<&str> = binding
        .iter()
        .filter(|(_, v)| v.is_some())
        .map(|(n, _)| n)
        .collect();
    Err(FactsError::Undispatchable(if bound.is_empty() {
        "no parameters bound".to_string()
    } else {
        format!("bound: {}", bound.join(", "))
    }))
}

/// Select and execute one read path
pub async fn dispatch(
    client: &dyn ManagementClient,
    descriptor: &Descriptor,
    binding: &Binding,
) -> Result<DispatchOutcome, FactsError> {
    let tag = select_operation(&descriptor.dispatch, binding)?;
    let entry = descriptor
        .operation(tag)
        .ok_or_else(|| FactsError::Undispatchable(format!("no operation named {}", tag)))?;
    let kind = descriptor.read_kind(tag).unwrap_or(ReadKind::List);
    let kwargs = entry.kwargs(binding);

    tracing::debug!(
        "dispatch: {} -> {} ({}.{})",
        descriptor.id,
        tag,
        entry.subclient,
        entry.method
    );

    let call = ReadCall {
        subclient: &entry.subclient,
        method: &entry.method,
        kwargs: &kwargs,
    };

    let result = match client.read(call).await {
        Ok(ReadResponse::Single(entity)) => Ok(vec![entity]),
        Ok(ReadResponse::Collection(entities)) => entities.try_collect::<Vec<_>>().await,
        Err(e) => Err(e),
    };

    Ok(match result {
        Ok(entities) => DispatchOutcome::Entities(entities),
        Err(e) if kind == ReadKind::Get && e.is_not_found() => {
            tracing::debug!("{}: {} reported not found", descriptor.id, tag);
            DispatchOutcome::Entities(Vec::new())
        }
        Err(error) => DispatchOutcome::Failed {
            operation: tag.to_string(),
            error,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::binder::{bind, RawParams};
    use crate::facts::schema::{ParamKind, ParamSpec, Schema};
    use serde_json::json;

    fn binding(pairs: &[(&str, &str)]) -> Binding {
        let schema = Schema::new(vec![
            ParamSpec::new("resource_group", ParamKind::String),
            ParamSpec::new("name", ParamKind::String),
            ParamSpec::new("top", ParamKind::Integer),
        ])
        .unwrap();
        let raw: RawParams = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), (*v).into()))
            .collect();
        bind(&schema, &raw).unwrap()
    }

    fn rules(value: Value) -> Vec<DispatchRule> {
        let defs: Vec<RuleDef> = serde_json::from_value(value).unwrap();
        defs.into_iter().map(|d| DispatchRule::try_from(d).unwrap()).collect()
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = rules(json!([
            {"when": {"all_bound": ["resource_group", "name"]}, "op": "get"},
            {"when": {"all_bound": ["resource_group"]}, "op": "list_by_resource_group"},
            {"when": "default", "op": "list"}
        ]));

        let both = binding(&[("resource_group", "rg"), ("name", "n")]);
        assert_eq!(select_operation(&rules, &both).unwrap(), "get");

        let rg = binding(&[("resource_group", "rg")]);
        assert_eq!(select_operation(&rules, &rg).unwrap(), "list_by_resource_group");

        assert_eq!(select_operation(&rules, &binding(&[])).unwrap(), "list");
    }

    #[test]
    fn test_overlapping_rules_respect_order() {
        let earlier_broad = rules(json!([
            {"when": {"all_bound": ["resource_group"]}, "op": "broad"},
            {"when": {"all_bound": ["resource_group", "name"]}, "op": "narrow"}
        ]));
        let both = binding(&[("resource_group", "rg"), ("name", "n")]);
        assert_eq!(select_operation(&earlier_broad, &both).unwrap(), "broad");
    }

    #[test]
    fn test_undispatchable_without_match() {
        let rules = rules(json!([
            {"when": {"any_bound": ["name"]}, "op": "get"}
        ]));
        let err = select_operation(&rules, &binding(&[("resource_group", "rg")])).unwrap_err();
        assert_eq!(err, FactsError::Undispatchable("bound: resource_group".into()));
    }

    #[test]
    fn test_fail_missing_rule() {
        let rules = rules(json!([
            {"when": {"all_bound": ["resource_group", "name"]}, "op": "get"},
            {"when": "default", "fail_missing": ["resource_group", "name"]}
        ]));
        let err = select_operation(&rules, &binding(&[("name", "n")])).unwrap_err();
        assert_eq!(err, FactsError::MissingRequired(vec!["resource_group".into()]));
    }

    #[test]
    fn test_rule_needs_exactly_one_action() {
        let def: RuleDef = serde_json::from_value(json!({"when": "default"})).unwrap();
        assert!(DispatchRule::try_from(def).is_err());

        let def: RuleDef =
            serde_json::from_value(json!({"when": "default", "op": "a", "fail_missing": ["x"]})).unwrap();
        assert!(DispatchRule::try_from(def).is_err());
    }

    #[test]
    fn test_kwargs_rename_and_skip_nulls() {
        let entry: OperationEntry = serde_json::from_value(json!({
            "subclient": "managed_clusters",
            "method": "get",
            "bind": {"resource_group": "resource_group_name", "name": "resource_name", "top": "top"},
            "args": {"expand": "instanceView"}
        }))
        .unwrap();

        let kwargs = entry.kwargs(&binding(&[("resource_group", "rg"), ("name", "aks1")]));
        assert_eq!(
            Value::Object(kwargs),
            json!({"expand": "instanceView", "resource_name": "aks1", "resource_group_name": "rg"})
        );
    }
}
