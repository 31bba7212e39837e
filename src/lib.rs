//! Read-only resource facts for Azure Resource Manager.
//!
//! Descriptors declare what a fact module accepts, how it reads, and what it
//! emits; [`FactEngine`] runs them against a [`ManagementClient`].

pub mod arm;
pub mod config;
pub mod error;
pub mod facts;

pub use arm::auth::{AccessToken, Environment};
pub use arm::client::{ClientFactory, Entity, ManagementClient};
pub use error::FactsError;
pub use facts::binder::{ParamValue, RawParams};
pub use facts::engine::{FactEngine, ResultEnvelope};
