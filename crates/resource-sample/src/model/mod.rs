//! # Sample Model
//!
//! Layers, definitions and documents of the sample application.
//!
//! The deployable greeter extends `sample/hello` with the framework's `cloud` layer, so
//! one document describes both what the resource answers and where it runs.

pub mod deployment;
pub mod hello;

pub use deployment::{DeployOutputs, DeploySummary, StageSummary};
pub use hello::{hello_layer, uppercase_layer, HELLO, HELLO_LAYER, LOUD_HELLO, UPPERCASE_LAYER};

use resource_framework::deploy::{cloud_layer, DeploySession, CLOUD_LAYER};
use resource_framework::{Catalog, FrameworkError, ResourceDefinition};
use serde_json::{json, Value};
use std::sync::Arc;

pub const GREETER: &str = "sample/greeter";
pub const GREETER_DOMAIN: &str = "hello.sample.dev";

/// Registers every sample layer and base definition.
pub fn catalog(session: Arc<DeploySession>) -> Result<Catalog, FrameworkError> {
    let mut catalog = Catalog::new();
    catalog.register_layer(HELLO_LAYER, hello_layer())?;
    catalog.register_layer(UPPERCASE_LAYER, uppercase_layer())?;
    catalog.register_layer(CLOUD_LAYER, cloud_layer(session))?;
    for document in hello::definitions() {
        catalog.register_definition(ResourceDefinition::from_value(&document)?)?;
    }
    Ok(catalog)
}

/// The greeter the sample hosts and deploys.
pub fn greeter_document() -> Value {
    json!({
        "$id": GREETER,
        "$version": "1.0.0",
        "$extend": LOUD_HELLO,
        "$implementation": CLOUD_LAYER,
        "name": "Rustacean",
        "memorySize": 256,
        "environment": {"GREETING_STYLE": "loud"},
        "domainName": GREETER_DOMAIN,
    })
}
