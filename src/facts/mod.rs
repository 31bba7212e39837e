//! Fact module framework
//!
//! A fact module is a read-only query against the resource manager, declared
//! as a [`descriptor::Descriptor`] and run by the [`engine`]. One invocation
//! binds the host's parameters, picks a single read path, filters the
//! resulting entities by tags, and projects each survivor into a plain
//! mapping.
//!
//! # Module Structure
//!
//! - [`schema`] - Parameter declarations
//! - [`binder`] - Parameter validation and coercion
//! - [`tags`] - Tag filter terms and matching
//! - [`dispatch`] - Rule-based read path selection
//! - [`projection`] - Output field descriptors
//! - [`descriptor`] - Declarative descriptors and their validation
//! - [`registry`] - Embedded descriptor table
//! - [`engine`] - The invocation pipeline and result envelope
//!
//! # Example
//!
//! ```ignore
//! use rmfacts::facts::engine::FactEngine;
//!
//! let engine = FactEngine::new();
//! let envelope = engine.run("webapp", &params, &environment).await?;
//! println!("{}", serde_json::to_string(&envelope)?);
//! ```

pub mod binder;
pub mod descriptor;
pub mod dispatch;
pub mod engine;
pub mod projection;
pub mod registry;
pub mod schema;
pub mod tags;
