//! Shared fixtures: a stub management client that serves canned entities
//! and records every read it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use rmfacts::arm::auth::{AccessToken, Environment};
use rmfacts::arm::client::{
    ClientClass, ClientFactory, Entity, ManagementClient, ReadCall, ReadResponse,
};
use rmfacts::arm::http::CloudError;
use rmfacts::facts::descriptor::{Descriptor, DescriptorDef};
use rmfacts::FactsError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";

/// One recorded read
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub subclient: String,
    pub method: String,
    pub kwargs: Map<String, Value>,
}

/// What the stub answers for one `subclient.method`
#[derive(Debug, Clone)]
pub enum Canned {
    One(Value),
    Many(Vec<Value>),
    Fail(CloudError),
}

#[derive(Debug, Clone, Default)]
pub struct StubClient {
    answers: HashMap<String, Canned>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, subclient: &str, method: &str, canned: Canned) -> Self {
        self.answers
            .insert(format!("{}.{}", subclient, method), canned);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManagementClient for StubClient {
    async fn read(&self, call: ReadCall<'_>) -> Result<ReadResponse, CloudError> {
        self.calls.lock().unwrap().push(RecordedCall {
            subclient: call.subclient.to_string(),
            method: call.method.to_string(),
            kwargs: call.kwargs.clone(),
        });

        let key = format!("{}.{}", call.subclient, call.method);
        match self.answers.get(&key) {
            Some(Canned::One(value)) => Ok(ReadResponse::Single(Entity::from_value(value.clone())?)),
            Some(Canned::Many(values)) => {
                let entities = values
                    .iter()
                    .cloned()
                    .map(Entity::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ReadResponse::collection(entities))
            }
            Some(Canned::Fail(error)) => Err(error.clone()),
            None => Err(CloudError::InvalidRequest(format!("no canned answer for {}", key))),
        }
    }
}

/// Hands out clones of one stub and counts constructions
#[derive(Debug, Clone, Default)]
pub struct StubFactory {
    pub client: StubClient,
    created: Arc<AtomicUsize>,
}

impl StubFactory {
    pub fn new(client: StubClient) -> Self {
        Self {
            client,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ClientFactory for StubFactory {
    fn create(
        &self,
        _class: &Arc<ClientClass>,
        _env: &Environment,
    ) -> Result<Box<dyn ManagementClient>, FactsError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.client.clone()))
    }
}

pub fn environment() -> Environment {
    environment_at("https://management.azure.com/")
}

pub fn environment_at(endpoint: &str) -> Environment {
    Environment::new(
        SUBSCRIPTION,
        Url::parse(endpoint).unwrap(),
        AccessToken::new("test-token"),
    )
}

/// A client class shaped like the web-site management SDK
pub fn web_class() -> ClientClass {
    let mut class: ClientClass = serde_json::from_value(json!({
        "provider": "Microsoft.Web",
        "api_version": "2022-03-01",
        "subclients": {
            "web_apps": {
                "get": {
                    "kind": "get",
                    "path": "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Web/sites/{name}"
                },
                "list_by_resource_group": {
                    "kind": "list",
                    "path": "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Web/sites"
                },
                "list": {
                    "kind": "list",
                    "path": "/subscriptions/{subscription_id}/providers/Microsoft.Web/sites",
                    "query": {"filter": "$filter", "top": "$top"}
                }
            }
        }
    }))
    .unwrap();
    class.name = "WebSiteManagementClient".to_string();
    class
}

pub fn build_descriptor(id: &str, def: Value) -> Descriptor {
    let class = web_class();
    let clients = HashMap::from([(class.name.clone(), Arc::new(class))]);
    let def: DescriptorDef = serde_json::from_value(def).unwrap();
    Descriptor::build(id, def, &clients).unwrap()
}

/// `{resource_group: required, name: required, tags}` reading one site
pub fn get_descriptor() -> Descriptor {
    build_descriptor(
        "site",
        json!({
            "client": "WebSiteManagementClient",
            "schema": [
                {"name": "resource_group", "kind": "string", "required": true},
                {"name": "name", "kind": "string", "required": true},
                {"name": "tags", "kind": "list-of-string"}
            ],
            "operations": {
                "get": {"subclient": "web_apps", "method": "get",
                        "bind": {"resource_group": "resource_group_name", "name": "name"}}
            },
            "dispatch": [
                {"when": {"all_bound": ["resource_group", "name"]}, "op": "get"}
            ],
            "projection": [{"name": "id"}, {"name": "name"}, {"name": "location"}, {"name": "tags"}],
            "result_key": "items"
        }),
    )
}

/// Optional name; falls back to listing the group
pub fn list_descriptor() -> Descriptor {
    build_descriptor(
        "sites",
        json!({
            "client": "WebSiteManagementClient",
            "schema": [
                {"name": "resource_group", "kind": "string"},
                {"name": "name", "kind": "string"},
                {"name": "tags", "kind": "list-of-string"}
            ],
            "operations": {
                "get": {"subclient": "web_apps", "method": "get",
                        "bind": {"resource_group": "resource_group_name", "name": "name"}},
                "list_by_resource_group": {"subclient": "web_apps", "method": "list_by_resource_group",
                        "bind": {"resource_group": "resource_group_name"}}
            },
            "dispatch": [
                {"when": {"all_bound": ["resource_group", "name"]}, "op": "get"},
                {"when": {"any_bound": ["resource_group"]}, "op": "list_by_resource_group"}
            ],
            "projection": [{"name": "id"}, {"name": "name"}, {"name": "location"}, {"name": "tags"}],
            "result_key": "items"
        }),
    )
}

pub fn site(name: &str, tags: Value) -> Value {
    json!({
        "id": format!("/subs/x/rg/r/name/{}", name),
        "name": name,
        "location": "eastus",
        "tags": tags
    })
}
