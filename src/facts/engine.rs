//! Fact Module Engine
//!
//! Single entry point tying the pieces together: bind, build the client,
//! dispatch, filter by tags, project, and wrap the survivors in a
//! [`ResultEnvelope`].

use super::binder::{bind, RawParams};
use super::descriptor::{Descriptor, TAGS_PARAM};
use super::dispatch::{dispatch, DispatchOutcome};
use super::projection::project;
use super::registry;
use super::tags::TagFilter;
use crate::arm::auth::Environment;
use crate::arm::client::{ArmClientFactory, ClientFactory};
use crate::error::FactsError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// `{changed: false, <result_key>: [...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    result_key: String,
    items: Vec<Map<String, Value>>,
}

impl ResultEnvelope {
    pub fn new(result_key: impl Into<String>, items: Vec<Map<String, Value>>) -> Self {
        Self {
            result_key: result_key.into(),
            items,
        }
    }

    /// Always false; fact modules never modify anything
    pub fn changed(&self) -> bool {
        false
    }

    pub fn result_key(&self) -> &str {
        &self.result_key
    }

    pub fn items(&self) -> &[Map<String, Value>] {
        &self.items
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert("changed".to_string(), Value::Bool(false));
        map.insert(
            self.result_key,
            Value::Array(self.items.into_iter().map(Value::Object).collect()),
        );
        Value::Object(map)
    }
}

impl Serialize for ResultEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("changed", &false)?;
        map.serialize_entry(&self.result_key, &self.items)?;
        map.end()
    }
}

/// Run one invocation of `descriptor`
pub async fn execute(
    descriptor: &Descriptor,
    raw: &RawParams,
    env: &Environment,
    factory: &dyn ClientFactory,
) -> Result<ResultEnvelope, FactsError> {
    let binding = bind(&descriptor.schema, raw)?;
    let client = factory.create(&descriptor.client, env)?;

    let entities = match dispatch(client.as_ref(), descriptor, &binding).await? {
        DispatchOutcome::Entities(entities) => entities,
        DispatchOutcome::Failed { operation, error } => {
            tracing::debug!(
                "{}: {} failed ({}): {}",
                descriptor.id,
                operation,
                error.category(),
                error
            );
            Vec::new()
        }
    };

    let filter = if descriptor.filters_tags() {
        binding
            .get(TAGS_PARAM)
            .and_then(|v| v.as_string_list())
            .map(TagFilter::parse)
            .unwrap_or_default()
    } else {
        TagFilter::default()
    };

    let total = entities.len();
    let items: Vec<Map<String, Value>> = entities
        .iter()
        .filter(|entity| filter.matches(entity.tags().as_ref()))
        .map(|entity| project(&descriptor.projection, entity.to_plain(), &binding))
        .collect();

    tracing::debug!(
        "{}: {} of {} entities kept",
        descriptor.id,
        items.len(),
        total
    );

    Ok(ResultEnvelope::new(descriptor.result_key.clone(), items))
}

/// Runs registered descriptors by id
#[derive(Debug, Clone, Default)]
pub struct FactEngine<F: ClientFactory = ArmClientFactory> {
    factory: F,
}

impl FactEngine<ArmClientFactory> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: ClientFactory> FactEngine<F> {
    pub fn with_factory(factory: F) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Look up a registered descriptor and execute it
    pub async fn run(
        &self,
        id: &str,
        raw: &RawParams,
        env: &Environment,
    ) -> Result<ResultEnvelope, FactsError> {
        let descriptor = registry::get_descriptor(id)
            .ok_or_else(|| FactsError::UnknownDescriptor(id.to_string()))?;
        self.execute(descriptor, raw, env).await
    }

    pub async fn execute(
        &self,
        descriptor: &Descriptor,
        raw: &RawParams,
        env: &Environment,
    ) -> Result<ResultEnvelope, FactsError> {
        execute(descriptor, raw, env, &self.factory).await
    }
}
