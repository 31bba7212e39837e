//! Authenticated environment
//!
//! The framework does not discover credentials. A host hands over an
//! [`Environment`] carrying an access token, the subscription, and the
//! resource-manager endpoint. The helpers below resolve ambient defaults the
//! way the Azure CLI records them, for hosts that want them.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Public-cloud resource-manager endpoint
pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com/";

/// Bearer token for the resource-manager audience. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Host-provided authenticated environment, shared read-only across invocations
#[derive(Debug, Clone)]
pub struct Environment {
    pub subscription_id: String,
    pub resource_manager_endpoint: Url,
    pub credentials: AccessToken,
}

impl Environment {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_manager_endpoint: Url,
        credentials: AccessToken,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_manager_endpoint,
            credentials,
        }
    }
}

/// Subscription ids are GUIDs
pub fn validate_subscription_id(subscription_id: &str) -> bool {
    uuid::Uuid::parse_str(subscription_id.trim()).is_ok()
}

/// Get the Azure CLI configuration directory
pub fn get_azure_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AZURE_CONFIG_DIR") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|p| p.join(".azure"))
}

#[derive(Debug, Deserialize)]
struct AzureProfile {
    #[serde(default)]
    subscriptions: Vec<ProfileSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileSubscription {
    id: String,
    #[serde(default)]
    is_default: bool,
}

/// Pick the default subscription out of an `azureProfile.json` document
fn default_subscription_from_profile(content: &str) -> Option<String> {
    // The CLI writes this file with a UTF-8 BOM
    let content = content.trim_start_matches('\u{feff}');
    let profile: AzureProfile = serde_json::from_str(content).ok()?;

    profile
        .subscriptions
        .into_iter()
        .find(|s| s.is_default)
        .map(|s| s.id)
        .filter(|id| validate_subscription_id(id))
}

/// Read the default subscription from the environment or the Azure CLI profile
pub fn get_default_subscription() -> Option<String> {
    if let Ok(subscription) = std::env::var("AZURE_SUBSCRIPTION_ID") {
        if validate_subscription_id(&subscription) {
            return Some(subscription.trim().to_string());
        }
        tracing::warn!("Invalid subscription id format in AZURE_SUBSCRIPTION_ID");
    }

    let profile_path = get_azure_config_dir()?.join("azureProfile.json");
    let content = std::fs::read_to_string(profile_path).ok()?;
    default_subscription_from_profile(&content)
}

/// Resource-manager endpoint from the environment, or the public cloud
pub fn get_default_endpoint() -> String {
    std::env::var("AZURE_RESOURCE_MANAGER_ENDPOINT")
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string())
}

/// Access token handed over by the provider-auth collaborator
pub fn get_access_token() -> Option<AccessToken> {
    std::env::var("AZURE_ACCESS_TOKEN")
        .ok()
        .map(AccessToken::new)
        .filter(|t| !t.is_empty())
}
