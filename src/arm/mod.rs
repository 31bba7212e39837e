//! Azure Resource Manager interaction module
//!
//! This module provides the management-client side of the framework: the
//! authenticated environment a host hands over, the HTTP layer, and the
//! declarative client classes executed against the resource-manager endpoint.
//!
//! # Module Structure
//!
//! - [`auth`] - Authenticated environment and ambient defaults
//! - [`client`] - Client classes, the [`client::ManagementClient`] seam, and the REST client
//! - [`http`] - HTTP utilities and categorized cloud errors
//!
//! # Example
//!
//! ```ignore
//! use rmfacts::arm::client::{ArmClientFactory, ClientFactory};
//!
//! let client = ArmClientFactory.create(&class, &environment)?;
//! let response = client.read(call).await?;
//! ```

pub mod auth;
pub mod client;
pub mod http;
