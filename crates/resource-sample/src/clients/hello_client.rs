//! # Hello Client
//!
//! Provides a high-level API for talking to a greeter resource.
//! It wraps any [`Invoker`], so the same client drives a local instance, a hosted
//! instance, or a bare [`RemoteResource`](resource_framework::rpc::RemoteResource).
use crate::model::DeploySummary;
use resource_framework::invoker::invoke_as;
use resource_framework::{Environment, FrameworkError, Invoker};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HelloError {
    #[error("Method not allowed: {0}")]
    NotAllowed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Greeter unavailable: {0}")]
    Unavailable(String),
}

/// Client for a greeter resource.
#[derive(Clone)]
pub struct HelloClient {
    inner: Arc<dyn Invoker>,
    environment: Environment,
}

impl HelloClient {
    pub fn new(inner: Arc<dyn Invoker>) -> Self {
        Self {
            inner,
            environment: Environment::new(),
        }
    }

    /// Environment forwarded with every call.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn target(&self) -> String {
        self.inner.label()
    }

    fn map_error(e: FrameworkError) -> HelloError {
        match e {
            FrameworkError::MethodNotAllowed(name) => HelloError::NotAllowed(name),
            FrameworkError::Client(_) | FrameworkError::Validation(_) => HelloError::Rejected(e.to_string()),
            other => HelloError::Unavailable(other.to_string()),
        }
    }

    #[instrument(skip(self), fields(target = %self.target()))]
    pub async fn say_hello(&self) -> Result<String, HelloError> {
        debug!("Sending request");
        invoke_as(self.inner.as_ref(), "hello", json!({}), &self.environment)
            .await
            .map_err(Self::map_error)
    }

    #[instrument(skip(self), fields(target = %self.target()))]
    pub async fn describe(&self) -> Result<Value, HelloError> {
        debug!("Sending request");
        self.inner.describe().await.map_err(Self::map_error)
    }

    /// Calls a method by name. Private methods are refused by hosted greeters.
    #[instrument(skip(self, arguments), fields(target = %self.target()))]
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, HelloError> {
        debug!("Sending request");
        self.inner
            .invoke(name, arguments, &self.environment)
            .await
            .map_err(Self::map_error)
    }

    /// Converges the cloud to the greeter's current attributes.
    #[instrument(skip(self), fields(target = %self.target()))]
    pub async fn deploy(&self) -> Result<DeploySummary, HelloError> {
        debug!("Sending request");
        invoke_as(self.inner.as_ref(), "deploy", json!({}), &self.environment)
            .await
            .map_err(Self::map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{hello_layer, uppercase_layer};
    use resource_framework::rpc::{InstanceBundle, LoopbackTransport, RemoteResource, ResourceHost};
    use resource_framework::{compose, Catalog, Runtime};

    fn greeter() -> Arc<resource_framework::ResourceInstance> {
        let rtype = Arc::new(compose(&[hello_layer(), uppercase_layer()]).unwrap());
        Runtime::new(Catalog::new())
            .load_with_type(rtype, &json!({"$id": "sample/test", "name": "Ada"}))
            .unwrap()
    }

    #[tokio::test]
    async fn local_client_says_hello() {
        let client = HelloClient::new(Arc::new(greeter()));
        assert_eq!(client.say_hello().await.unwrap(), "HELLO, ADA!");
    }

    #[tokio::test]
    async fn remote_client_maps_refusals() {
        let host = Arc::new(ResourceHost::new(InstanceBundle(greeter())));
        let remote = RemoteResource::new("loopback://greeter", Arc::new(LoopbackTransport::new(host)));
        let client = HelloClient::new(Arc::new(remote));

        assert_eq!(client.say_hello().await.unwrap(), "HELLO, ADA!");
        let err = client.call("secret", json!({})).await.unwrap_err();
        assert_eq!(err, HelloError::NotAllowed("secret".into()));
    }

    #[tokio::test]
    async fn deploy_without_cloud_layer_is_rejected() {
        let client = HelloClient::new(Arc::new(greeter()));
        let err = client.deploy().await.unwrap_err();
        assert!(matches!(err, HelloError::Rejected(ref m) if m.contains("deploy")), "{err:?}");
    }
}
