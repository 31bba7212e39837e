//! Management Client
//!
//! A client class is the declarative stand-in for a typed management SDK
//! client: named subclients, each with read methods bound to a
//! resource-manager path template. [`ArmClient`] executes those methods over
//! REST; the [`ManagementClient`] trait is the seam the fact engine talks to.

use super::auth::{validate_subscription_id, Environment};
use super::http::{ArmHttpClient, CloudError};
use crate::error::FactsError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Whether a read method yields one entity or a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadKind {
    Get,
    List,
}

fn default_items_path() -> String {
    "value".to_string()
}

/// A read method on a subclient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub kind: ReadKind,
    /// Path template; `{arg}` is percent-encoded, `{+arg}` is inserted verbatim
    pub path: String,
    /// SDK keyword -> query string name
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Where a list page keeps its entities
    #[serde(default = "default_items_path")]
    pub items_path: String,
}

/// A piece of a path template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Arg { name: &'a str, verbatim: bool },
}

/// Split a template into literal text and placeholders
fn parse_template(template: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let literal = &rest[..open];
        if literal.contains('}') {
            return Err(format!("unbalanced '}}' in {}", template));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unclosed '{{' in {}", template))?;
        let raw = &after[..close];
        let (name, verbatim) = match raw.strip_prefix('+') {
            Some(name) => (name, true),
            None => (raw, false),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid placeholder {{{}}} in {}", raw, template));
        }
        segments.push(Segment::Arg { name, verbatim });
        rest = &after[close + 1..];
    }

    if rest.contains('}') {
        return Err(format!("unbalanced '}}' in {}", template));
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

impl MethodDef {
    /// Placeholder names of the path template
    pub fn path_arguments(&self) -> Vec<&str> {
        parse_template(&self.path)
            .map(|segments| {
                segments
                    .into_iter()
                    .filter_map(|segment| match segment {
                        Segment::Arg { name, .. } => Some(name),
                        Segment::Literal(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Does this method take the given SDK keyword?
    pub fn accepts(&self, keyword: &str) -> bool {
        self.query.contains_key(keyword) || self.path_arguments().contains(&keyword)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("path must start with '/': {}", self.path));
        }
        parse_template(&self.path).map(|_| ())
    }
}

/// Errors in a client class declaration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientClassError {
    #[error("client {0} declares no subclients")]
    Empty(String),

    #[error("{client}.{subclient}.{method}: {detail}")]
    InvalidMethod {
        client: String,
        subclient: String,
        method: String,
        detail: String,
    },
}

/// Declarative typed management client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientClass {
    #[serde(skip)]
    pub name: String,
    pub provider: String,
    pub api_version: String,
    pub subclients: BTreeMap<String, BTreeMap<String, MethodDef>>,
}

impl ClientClass {
    pub fn method(&self, subclient: &str, method: &str) -> Option<&MethodDef> {
        self.subclients.get(subclient)?.get(method)
    }

    pub fn has_subclient(&self, subclient: &str) -> bool {
        self.subclients.contains_key(subclient)
    }

    pub fn validate(&self) -> Result<(), ClientClassError> {
        if self.subclients.is_empty() {
            return Err(ClientClassError::Empty(self.name.clone()));
        }
        for (subclient, methods) in &self.subclients {
            for (method, def) in methods {
                def.validate()
                    .map_err(|detail| ClientClassError::InvalidMethod {
                        client: self.name.clone(),
                        subclient: subclient.clone(),
                        method: method.clone(),
                        detail,
                    })?;
            }
        }
        Ok(())
    }
}

/// A resource returned by the management API
#[derive(Debug, Clone, PartialEq)]
pub struct Entity(Map<String, Value>);

impl Entity {
    pub fn from_value(value: Value) -> Result<Self, CloudError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CloudError::Decode(format!(
                "expected a resource object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Plain nested mapping of the entity
    pub fn to_plain(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(|v| v.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(|v| v.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.0.get("location").and_then(|v| v.as_str())
    }

    /// String-valued entries of the `tags` object
    pub fn tags(&self) -> Option<HashMap<&str, &str>> {
        let tags = self.0.get("tags")?.as_object()?;
        Some(
            tags.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v)))
                .collect(),
        )
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One read invocation: a method on a named subclient with its keyword arguments
#[derive(Debug, Clone, Copy)]
pub struct ReadCall<'a> {
    pub subclient: &'a str,
    pub method: &'a str,
    pub kwargs: &'a Map<String, Value>,
}

/// Result of a read method
pub enum ReadResponse {
    Single(Entity),
    /// Lazily fetched; the next page is requested when the previous one is drained
    Collection(BoxStream<'static, Result<Entity, CloudError>>),
}

impl ReadResponse {
    /// Collection over already materialized entities
    pub fn collection(entities: Vec<Entity>) -> Self {
        ReadResponse::Collection(stream::iter(entities.into_iter().map(Ok)).boxed())
    }
}

/// A management client ready for read calls
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn read(&self, call: ReadCall<'_>) -> Result<ReadResponse, CloudError>;
}

/// Builds the client a descriptor's class refers to
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        class: &Arc<ClientClass>,
        env: &Environment,
    ) -> Result<Box<dyn ManagementClient>, FactsError>;
}

/// Factory producing REST-backed [`ArmClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmClientFactory;

impl ClientFactory for ArmClientFactory {
    fn create(
        &self,
        class: &Arc<ClientClass>,
        env: &Environment,
    ) -> Result<Box<dyn ManagementClient>, FactsError> {
        Ok(Box::new(ArmClient::new(Arc::clone(class), env.clone())?))
    }
}

/// Resource-manager client for one client class
#[derive(Clone)]
pub struct ArmClient {
    class: Arc<ClientClass>,
    env: Environment,
    http: ArmHttpClient,
}

impl ArmClient {
    /// Bind a client class to an environment. No request is made.
    pub fn new(class: Arc<ClientClass>, env: Environment) -> Result<Self, FactsError> {
        if env.credentials.is_empty() {
            return Err(FactsError::ClientUnavailable(
                "no access token in the environment".to_string(),
            ));
        }
        if env.subscription_id.trim().is_empty() {
            return Err(FactsError::ClientUnavailable(
                "no subscription in the environment".to_string(),
            ));
        }
        if !validate_subscription_id(&env.subscription_id) {
            return Err(FactsError::ClientUnavailable(format!(
                "subscription id {:?} is not a GUID",
                env.subscription_id
            )));
        }
        if env.resource_manager_endpoint.cannot_be_a_base() {
            return Err(FactsError::ClientUnavailable(format!(
                "invalid resource-manager endpoint: {}",
                env.resource_manager_endpoint
            )));
        }

        let http = ArmHttpClient::new().map_err(|e| {
            FactsError::ClientUnavailable(format!("failed to create HTTP client: {}", e))
        })?;

        tracing::debug!(
            "client {} bound to {}",
            class.name,
            env.resource_manager_endpoint
        );

        Ok(Self { class, env, http })
    }

    pub fn class(&self) -> &ClientClass {
        &self.class
    }

    /// Resolve a method's full URL from its keyword arguments
    pub fn build_url(&self, method: &MethodDef, kwargs: &Map<String, Value>) -> Result<Url, CloudError> {
        let segments = parse_template(&method.path).map_err(CloudError::InvalidRequest)?;

        let mut path = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Arg { name, verbatim } => {
                    let value = match kwargs.get(name).and_then(query_value) {
                        Some(v) => v,
                        None if name == "subscription_id" => self.env.subscription_id.clone(),
                        None => {
                            return Err(CloudError::InvalidRequest(format!(
                                "missing argument {}",
                                name
                            )))
                        }
                    };
                    if verbatim {
                        path.push_str(&verbatim_path(name, &value)?);
                    } else {
                        path.push_str(&urlencoding::encode(&value));
                    }
                }
            }
        }

        let base = self.env.resource_manager_endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| CloudError::InvalidRequest(format!("bad URL for {}: {}", path, e)))?;

        {
            let api_version = method.api_version.as_deref().unwrap_or(&self.class.api_version);
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", api_version);
            for (keyword, name) in &method.query {
                if let Some(value) = kwargs.get(keyword).and_then(query_value) {
                    query.append_pair(name, &value);
                }
            }
        }

        Ok(url)
    }

    /// Fetch list pages lazily, following `nextLink` until a page repeats
    fn paginate(&self, first: Url, items_path: String) -> BoxStream<'static, Result<Entity, CloudError>> {
        let http = self.http.clone();
        let token = self.env.credentials.clone();

        stream::try_unfold(
            (Some(first), HashSet::new()),
            move |(next, mut visited): (Option<Url>, HashSet<Url>)| {
                let http = http.clone();
                let token = token.clone();
                let items_path = items_path.clone();
                async move {
                    let Some(url) = next else {
                        return Ok::<_, CloudError>(None);
                    };
                    let page = http.get(&url, token.secret()).await?;
                    let items = extract_items(&page, &items_path)?;
                    visited.insert(url);
                    let next = page
                        .get("nextLink")
                        .and_then(|v| v.as_str())
                        .filter(|link| !link.is_empty())
                        .and_then(|link| Url::parse(link).ok());
                    let next = match next {
                        Some(link) if visited.contains(&link) => {
                            tracing::debug!("nextLink {} was already fetched, stopping", link);
                            None
                        }
                        other => other,
                    };
                    Ok(Some((items, (next, visited))))
                }
            },
        )
        .map_ok(|items: Vec<Entity>| stream::iter(items.into_iter().map(Ok::<_, CloudError>)))
        .try_flatten()
        .boxed()
    }
}

#[async_trait]
impl ManagementClient for ArmClient {
    async fn read(&self, call: ReadCall<'_>) -> Result<ReadResponse, CloudError> {
        let Some(methods) = self.class.subclients.get(call.subclient) else {
            return Err(CloudError::InvalidRequest(format!(
                "{} has no subclient {}",
                self.class.name, call.subclient
            )));
        };
        let Some(method) = methods.get(call.method) else {
            return Err(CloudError::InvalidRequest(format!(
                "{}.{} has no method {}",
                self.class.name, call.subclient, call.method
            )));
        };
        if let Some(extra) = call.kwargs.keys().find(|k| !method.accepts(k)) {
            return Err(CloudError::InvalidRequest(format!(
                "{}.{}() got an unexpected keyword argument {}",
                call.subclient, call.method, extra
            )));
        }

        tracing::debug!(
            "read: client={}, subclient={}, method={}",
            self.class.name,
            call.subclient,
            call.method
        );

        let url = self.build_url(method, call.kwargs)?;
        match method.kind {
            ReadKind::Get => {
                let body = self.http.get(&url, self.env.credentials.secret()).await?;
                Entity::from_value(body).map(ReadResponse::Single)
            }
            ReadKind::List => Ok(ReadResponse::Collection(
                self.paginate(url, method.items_path.clone()),
            )),
        }
    }
}

/// Check a `{+arg}` value and percent-encode each of its segments.
/// Empty, `.` and `..` segments are rejected so the value can't leave its scope.
fn verbatim_path(name: &str, value: &str) -> Result<String, CloudError> {
    let trimmed = value.trim_matches('/');
    let mut encoded = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(CloudError::InvalidRequest(format!(
                "argument {} is not a resource path: {:?}",
                name, value
            )));
        }
        encoded.push(urlencoding::encode(segment).into_owned());
    }
    Ok(encoded.join("/"))
}

/// Render a keyword value for a URL; null means absent
fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(query_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

/// Extract entities from a list page using a dotted items path
fn extract_items(page: &Value, path: &str) -> Result<Vec<Entity>, CloudError> {
    let mut current = page;
    if !path.is_empty() {
        for part in path.split('.') {
            current = match current.get(part) {
                Some(v) => v,
                None => return Ok(Vec::new()),
            };
        }
    }

    match current {
        Value::Array(items) => items.iter().cloned().map(Entity::from_value).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(CloudError::Decode(format!(
            "expected an array at {:?}, got {}",
            path,
            json_type(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::auth::AccessToken;
    use serde_json::json;

    fn class() -> Arc<ClientClass> {
        let mut class: ClientClass = serde_json::from_value(json!({
            "provider": "Microsoft.Web",
            "api_version": "2022-03-01",
            "subclients": {
                "web_apps": {
                    "get": {
                        "kind": "get",
                        "path": "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Web/sites/{name}"
                    },
                    "list": {
                        "kind": "list",
                        "path": "/subscriptions/{subscription_id}/providers/Microsoft.Web/sites",
                        "query": {"filter": "$filter", "top": "$top"}
                    }
                },
                "scoped": {
                    "list": {
                        "kind": "list",
                        "path": "/{+scope}/providers/Microsoft.Authorization/roleAssignments",
                        "api_version": "2022-04-01"
                    }
                }
            }
        }))
        .unwrap();
        class.name = "WebSiteManagementClient".to_string();
        Arc::new(class)
    }

    fn env(token: &str) -> Environment {
        Environment::new(
            "00000000-0000-0000-0000-000000000001",
            Url::parse("https://management.azure.com/").unwrap(),
            AccessToken::new(token),
        )
    }

    fn kwargs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_template() {
        let parts = parse_template("/a/{b}/c/{+d}").unwrap();
        assert_eq!(parts.len(), 4);
        assert!(parse_template("/a/{b").is_err());
        assert!(parse_template("/a/b}").is_err());
        assert!(parse_template("/a/{}").is_err());
        assert!(parse_template("/a/{b-c}").is_err());
    }

    #[test]
    fn test_method_accepts_path_and_query_keywords() {
        let class = class();
        let list = class.method("web_apps", "list").unwrap();
        assert!(list.accepts("filter"));
        assert!(list.accepts("subscription_id"));
        assert!(!list.accepts("name"));

        let get = class.method("web_apps", "get").unwrap();
        assert_eq!(
            get.path_arguments(),
            vec!["subscription_id", "resource_group_name", "name"]
        );
        assert!(class.validate().is_ok());
    }

    #[test]
    fn test_build_url_encodes_segments() {
        let client = ArmClient::new(class(), env("token")).unwrap();
        let method = client.class().method("web_apps", "get").unwrap();
        let url = client
            .build_url(method, &kwargs(json!({"resource_group_name": "my rg", "name": "site"})))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.azure.com/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/my%20rg/providers/Microsoft.Web/sites/site?api-version=2022-03-01"
        );
    }

    #[test]
    fn test_build_url_query_and_verbatim_scope() {
        let client = ArmClient::new(class(), env("token")).unwrap();
        let list = client.class().method("web_apps", "list").unwrap();
        let url = client
            .build_url(list, &kwargs(json!({"filter": "name eq 'a'", "top": 5})))
            .unwrap();
        assert_eq!(url.query(), Some("api-version=2022-03-01&%24filter=name+eq+%27a%27&%24top=5"));

        let scoped = client.class().method("scoped", "list").unwrap();
        let url = client
            .build_url(scoped, &kwargs(json!({"scope": "/subscriptions/abc/resourceGroups/rg"})))
            .unwrap();
        assert_eq!(
            url.path(),
            "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Authorization/roleAssignments"
        );
        assert_eq!(url.query(), Some("api-version=2022-04-01"));
    }

    #[test]
    fn test_verbatim_argument_cannot_escape_its_scope() {
        let client = ArmClient::new(class(), env("token")).unwrap();
        let scoped = client.class().method("scoped", "list").unwrap();

        let url = client
            .build_url(scoped, &kwargs(json!({"scope": "subscriptions/s/resourceGroups/rg#"})))
            .unwrap();
        assert_eq!(
            url.path(),
            "/subscriptions/s/resourceGroups/rg%23/providers/Microsoft.Authorization/roleAssignments"
        );
        assert_eq!(url.fragment(), None);

        let url = client
            .build_url(scoped, &kwargs(json!({"scope": "subscriptions/s/x?y=1"})))
            .unwrap();
        assert_eq!(url.query(), Some("api-version=2022-04-01"));

        for bad in [
            "subscriptions/s/y/../../other",
            "subscriptions/s/./rg",
            "subscriptions//rg",
            "/",
            "",
        ] {
            let err = client
                .build_url(scoped, &kwargs(json!({"scope": bad})))
                .unwrap_err();
            assert_eq!(err.category(), "invalid_request", "{:?}", bad);
        }
    }

    #[test]
    fn test_client_unavailable_for_malformed_subscription() {
        let env = Environment::new(
            "not-a-guid",
            Url::parse("https://management.azure.com/").unwrap(),
            AccessToken::new("token"),
        );
        let err = ArmClientFactory.create(&class(), &env).err().unwrap();
        assert_eq!(err.kind(), "client_unavailable");
    }

    #[test]
    fn test_build_url_missing_argument() {
        let client = ArmClient::new(class(), env("token")).unwrap();
        let method = client.class().method("web_apps", "get").unwrap();
        let err = client
            .build_url(method, &kwargs(json!({"resource_group_name": "rg"})))
            .unwrap_err();
        assert_eq!(err.category(), "invalid_request");
    }

    #[test]
    fn test_client_unavailable_without_token() {
        let err = ArmClientFactory.create(&class(), &env("  ")).err().unwrap();
        assert_eq!(err.kind(), "client_unavailable");
    }

    #[test]
    fn test_entity_accessors() {
        let entity = Entity::from_value(json!({
            "id": "/subscriptions/x/resourceGroups/r/providers/P/t/n",
            "name": "n",
            "location": "eastus",
            "tags": {"env": "prod", "count": 3}
        }))
        .unwrap();
        assert_eq!(entity.name(), Some("n"));
        assert_eq!(entity.location(), Some("eastus"));
        let tags = entity.tags().unwrap();
        assert_eq!(tags.get("env"), Some(&"prod"));
        assert!(!tags.contains_key("count"));

        assert!(Entity::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_extract_items() {
        let page = json!({"value": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(extract_items(&page, "value").unwrap().len(), 2);
        assert!(extract_items(&json!({}), "value").unwrap().is_empty());
        assert!(extract_items(&json!({"value": "nope"}), "value").is_err());
        assert_eq!(extract_items(&json!([{"name": "a"}]), "").unwrap().len(), 1);
    }
}
