//! Descriptor Registry - Load fact modules from JSON
//!
//! Client classes and fact descriptors are declared in embedded JSON files.
//! Every file contributes to one table; classes are merged first so a fact
//! may use a class declared in another file.

use super::descriptor::{Descriptor, DescriptorDef, DescriptorError};
use crate::arm::client::{ClientClass, ClientClassError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Embedded descriptor files (compiled into the binary)
const DESCRIPTOR_FILES: &[(&str, &str)] = &[
    ("compute.json", include_str!("../descriptors/compute.json")),
    ("network.json", include_str!("../descriptors/network.json")),
    ("storage.json", include_str!("../descriptors/storage.json")),
    ("web.json", include_str!("../descriptors/web.json")),
    ("containers.json", include_str!("../descriptors/containers.json")),
    ("keyvault.json", include_str!("../descriptors/keyvault.json")),
    ("databases.json", include_str!("../descriptors/databases.json")),
    ("monitor.json", include_str!("../descriptors/monitor.json")),
    ("resources.json", include_str!("../descriptors/resources.json")),
];

/// Root structure of descriptors/*.json
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFile {
    #[serde(default)]
    clients: BTreeMap<String, ClientClass>,
    #[serde(default)]
    facts: BTreeMap<String, DescriptorDef>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{file}: client class {name} is declared twice")]
    DuplicateClient { file: String, name: String },

    #[error("{file}: fact {id} is declared twice")]
    DuplicateFact { file: String, id: String },

    #[error(transparent)]
    Client(#[from] ClientClassError),

    #[error("fact {id}: {source}")]
    Descriptor {
        id: String,
        #[source]
        source: DescriptorError,
    },
}

/// All validated descriptors, keyed by id
#[derive(Debug)]
pub struct Registry {
    descriptors: BTreeMap<String, Descriptor>,
}

impl Registry {
    /// Build a registry from `(file name, JSON)` pairs
    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self, RegistryError> {
        let mut clients: HashMap<String, Arc<ClientClass>> = HashMap::new();
        let mut defs: Vec<(String, DescriptorDef)> = Vec::new();

        for (file, content) in sources {
            let parsed: DescriptorFile =
                serde_json::from_str(content).map_err(|source| RegistryError::Parse {
                    file: file.to_string(),
                    source,
                })?;

            for (name, mut class) in parsed.clients {
                if clients.contains_key(&name) {
                    return Err(RegistryError::DuplicateClient {
                        file: file.to_string(),
                        name,
                    });
                }
                class.name = name.clone();
                class.validate()?;
                clients.insert(name, Arc::new(class));
            }

            for (id, def) in parsed.facts {
                if defs.iter().any(|(existing, _)| *existing == id) {
                    return Err(RegistryError::DuplicateFact {
                        file: file.to_string(),
                        id,
                    });
                }
                defs.push((id, def));
            }
        }

        let mut descriptors = BTreeMap::new();
        for (id, def) in defs {
            let descriptor = Descriptor::build(&id, def, &clients)
                .map_err(|source| RegistryError::Descriptor {
                    id: id.clone(),
                    source,
                })?;
            descriptors.insert(id, descriptor);
        }

        Ok(Self { descriptors })
    }

    pub fn get(&self, id: &str) -> Option<&Descriptor> {
        self.descriptors.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get the descriptor registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::from_sources(DESCRIPTOR_FILES)
            .unwrap_or_else(|e| panic!("Failed to load embedded descriptor JSON: {}", e))
    })
}

/// Get a descriptor by id
pub fn get_descriptor(id: &str) -> Option<&'static Descriptor> {
    get_registry().get(id)
}

/// Get all descriptor ids, sorted
pub fn get_all_descriptor_ids() -> Vec<&'static str> {
    get_registry().ids().collect()
}
