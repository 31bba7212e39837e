//! Configuration Management
//!
//! Handles persistent configuration storage for rmfacts.

use crate::arm::auth;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Subscription to query
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Resource-manager endpoint (sovereign clouds, test servers)
    #[serde(default)]
    pub resource_manager_endpoint: Option<String>,
    /// Last descriptor run
    #[serde(default)]
    pub last_descriptor: Option<String>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rmfacts").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;

        Ok(())
    }

    /// Get effective subscription (CLI > config > environment / Azure CLI profile)
    pub fn effective_subscription(&self) -> Option<String> {
        self.subscription_id
            .clone()
            .filter(|s| auth::validate_subscription_id(s))
            .or_else(auth::get_default_subscription)
    }

    /// Get effective endpoint (CLI > config > environment > public cloud)
    pub fn effective_endpoint(&self) -> String {
        self.resource_manager_endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(auth::get_default_endpoint)
    }

    /// Remember the last descriptor and save
    pub fn set_last_descriptor(&mut self, id: &str) -> Result<()> {
        self.last_descriptor = Some(id.to_string());
        self.save()
    }
}
