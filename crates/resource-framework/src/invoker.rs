//! # Invoker Trait
//!
//! Provides a common interface for anything a method can be invoked on: a live local
//! [`ResourceInstance`](crate::instance::ResourceInstance) or a
//! [`RemoteResource`](crate::rpc::RemoteResource) reached over RPC. Typed clients wrap
//! an `Arc<dyn Invoker>` and never need to know which one they hold.

use crate::error::FrameworkError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Variables passed along with an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl From<BTreeMap<String, String>> for Environment {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }
}

/// Trait for invoking resource methods by name.
///
/// `arguments` is always a JSON object; `Value::Null` is accepted and treated as `{}`.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Human-readable identity used in logs.
    fn label(&self) -> String;

    async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        environment: &Environment,
    ) -> Result<Value, FrameworkError>;

    /// Fetch the published document of the resource.
    #[tracing::instrument(skip(self))]
    async fn describe(&self) -> Result<Value, FrameworkError> {
        tracing::debug!("Sending request");
        self.invoke("describe", Value::Object(Map::new()), &Environment::default())
            .await
    }
}

/// Invokes `name` and decodes the result into `T`.
pub async fn invoke_as<T, I>(
    invoker: &I,
    name: &str,
    arguments: Value,
    environment: &Environment,
) -> Result<T, FrameworkError>
where
    T: DeserializeOwned,
    I: Invoker + ?Sized,
{
    let value = invoker.invoke(name, arguments, environment).await?;
    serde_json::from_value(value)
        .map_err(|e| FrameworkError::server(format!("unexpected result from {name}: {e}")))
}
