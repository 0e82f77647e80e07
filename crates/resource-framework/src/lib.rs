//! # Resource Framework
//!
//! This crate composes **resources** (typed, validated documents with behaviour) out of
//! reusable **layers**, exposes their public methods over a JSON-RPC 2.0 gateway, and
//! deploys them to the cloud through an idempotent, fail-fast orchestrator.
//!
//! ## Why Layers?
//!
//! A resource type is never written from scratch. It starts from the built-in `core`
//! implementation (`get`, `set`, `describe`) and every layer receives the implementation
//! built so far and returns an extended one:
//!
//! - **Properties**: declared once with shape, default and validators, then enforced on every write
//! - **Methods**: a layer can add methods or wrap an inherited one, calling the previous body
//! - **Visibility**: only methods a layer chose to *expose* can be reached remotely
//!
//! Layers are referenced by name from documents through `$extend` (another definition) and
//! `$implementation` (a registered layer or a remote endpoint), so the composition chain of a
//! resource is data, resolved by the [`Catalog`] and cached in a [`TypeCache`].
//!
//! ## Architecture Overview
//!
//! 1. **Model Layer** ([`property`], [`definition`], [`registry`]) - Documents, properties, normalization
//! 2. **Composition Layer** ([`layer`], [`compose`], [`instance`], [`runtime`]) - Types and live instances
//! 3. **Interface Layer** ([`invoker`], [`rpc`]) - Uniform invocation, locally or over HTTP
//! 4. **Deployment Layer** ([`deploy`], [`flight`]) - Converging the cloud to a resource
//!
//! ## Quick Start
//!
//! ```rust
//! use resource_framework::{layer, method, Catalog, PropertyDescriptor, Runtime, Shape};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), resource_framework::FrameworkError> {
//!     let mut catalog = Catalog::new();
//!     catalog.register_layer("hello", layer("hello", |base| {
//!         base.property(PropertyDescriptor::new("name", Shape::String).with_default(json!("World")))?
//!             .expose(
//!                 "hello",
//!                 method(|inv| async move {
//!                     let name = inv.this.get("name").unwrap_or_default();
//!                     Ok(json!(format!("Hello, {}!", name.as_str().unwrap_or_default())))
//!                 }),
//!             )
//!     }))?;
//!
//!     let runtime = Arc::new(Runtime::new(catalog));
//!     let greeter = runtime.load(&json!({"$implementation": "hello"}))?;
//!     let reply = greeter.invoke("hello", json!({}), &Default::default()).await?;
//!     assert_eq!(reply, json!("Hello, World!"));
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Instances are shared as `Arc<ResourceInstance>`; attribute reads and writes take a short lock
//! - Method bodies are `'static` futures, so concurrent invocations never borrow each other
//! - Deployments of the same identity are serialized by the [`flight`] coordinator actor
//!
//! ## Testing
//!
//! [`mock::MockCloud`] implements every cloud capability in memory, records each call, and
//! accepts injected failures. [`rpc::LoopbackTransport`] routes remote calls through an
//! in-process [`rpc::ResourceHost`] without opening a socket.

pub mod compose;
pub mod config;
pub mod definition;
pub mod deploy;
pub mod error;
pub mod flight;
pub mod instance;
pub mod invoker;
pub mod layer;
pub mod mock;
pub mod property;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod tracing;

// Re-export core types for convenience
pub use compose::{compose, Catalog, ResourceType, TypeCache};
pub use config::FrameworkConfig;
pub use definition::{Metadata, ResourceDefinition};
pub use error::FrameworkError;
pub use instance::ResourceInstance;
pub use invoker::{Environment, Invoker};
pub use layer::{layer, method, Implementation, Invocation, Layer};
pub use property::{PropertyDescriptor, Shape, Validator};
pub use runtime::Runtime;
