//! # System Lifecycle & Orchestration
//!
//! This module wires the sample application together: the deploy session, the catalog of
//! layers, the runtime that loads documents, and the JSON-RPC host that exposes the
//! greeter to other processes.
//!
//! ## The Orchestration Pattern
//!
//! Individual layers are small. **Wiring them together** is where the ordering constraints
//! live, and this module is the one place that knows them:
//!
//! 1. **Deployment** - The [`DeploySession`](resource_framework::deploy::DeploySession) must
//!    exist before the `cloud` layer is registered, because the layer's `deploy` method
//!    captures it
//! 2. **Composition** - The catalog is frozen once handed to the runtime
//! 3. **Hosting** - The listener is bound before any client is created, so the endpoint a
//!    client receives is always reachable
//! 4. **Clients** - Local and remote clients share one [`HelloClient`](crate::clients::HelloClient) API
//!
//! ## Graceful Shutdown
//!
//! 1. **Signal** - A oneshot tells the server to stop accepting connections
//! 2. **Drain** - Requests already being handled run to completion
//! 3. **Await** - The server task is joined and its outcome reported
//!
//! Deployments in flight are not cancelled by shutdown. Callers that need to abandon one
//! use [`DeploySession::deploy_with_cancel`](resource_framework::deploy::DeploySession::deploy_with_cancel).
//!
//! ## Observability & Tracing
//!
//! Call [`setup_tracing`](resource_framework::tracing::setup_tracing) once at startup.
//!
//! ```bash
//! RUST_LOG=info cargo run      # Deployment progress
//! RUST_LOG=debug cargo run     # Every invocation and forwarded call
//! ```
//!
//! ## Future Extensions
//!
//! - Loading the greeter document from disk instead of the built-in one
//! - Hosting several resources behind one listener

pub mod resource_system;

pub use resource_system::*;
