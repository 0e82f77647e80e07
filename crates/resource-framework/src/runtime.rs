//! # Runtime
//!
//! The [`Runtime`] turns definition documents into live instances. It owns the
//! [`Catalog`] of layers and base definitions, the [`TypeCache`] of composed types
//! and the [`Transport`] hosted resources use to reach their implementation.
//!
//! ## Loading
//!
//! 1. Split the document into metadata and attributes.
//! 2. Resolve the extension chain and compose (or fetch) the resource type.
//! 3. Normalize the attributes against the type's descriptors.
//! 4. Validate and store each attribute; nested definitions become child instances.
//!
//! Malformed definitions and invalid attribute values are configuration errors:
//! they are the author's fault and surface before anything is invoked.

use crate::compose::{Catalog, ResolvedChain, ResourceType, TypeCache};
use crate::config::FrameworkConfig;
use crate::definition::{self, Attribute, ResourceDefinition};
use crate::error::FrameworkError;
use crate::instance::ResourceInstance;
use crate::invoker::Invoker;
use crate::property::{PropertyDescriptor, PropertySet};
use crate::registry::normalize;
use crate::rpc::{CallPolicy, HttpTransport, RemoteResource, Transport};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Runtime {
    catalog: Catalog,
    types: TypeCache,
    transport: Arc<dyn Transport>,
    calls: CallPolicy,
}

impl Runtime {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            types: TypeCache::default(),
            transport: Arc::new(HttpTransport::default()),
            calls: CallPolicy::default(),
        }
    }

    pub fn with_config(catalog: Catalog, config: &FrameworkConfig) -> Result<Self, FrameworkError> {
        Ok(Self {
            catalog,
            types: TypeCache::new(config.type_cache_capacity),
            transport: Arc::new(HttpTransport::new(config.rpc.timeout())?),
            calls: CallPolicy::from_config(config),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Retries and timeouts of the hosted resources this runtime loads.
    pub fn with_call_policy(mut self, calls: CallPolicy) -> Self {
        self.calls = calls;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn type_cache(&self) -> &TypeCache {
        &self.types
    }

    pub fn resolve(&self, definition: &ResourceDefinition) -> Result<(Arc<ResourceType>, ResolvedChain), FrameworkError> {
        let chain = self.catalog.resolve_chain(definition)?;
        let resource_type = self.types.get_or_compose(&chain)?;
        Ok((resource_type, chain))
    }

    /// Loads a definition document into a live instance.
    pub fn load(&self, document: &Value) -> Result<Arc<ResourceInstance>, FrameworkError> {
        let definition = ResourceDefinition::from_value(document)?;
        let instance = self.instantiate(&definition)?;
        info!(resource = %instance.label(), layers = ?instance.resource_type().layers(), "Resource loaded");
        Ok(instance)
    }

    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<ResourceInstance>, FrameworkError> {
        let document = definition::load_document(path).await?;
        self.load(&document)
    }

    /// Loads a document against an already composed type, bypassing the catalog.
    pub fn load_with_type(
        &self,
        resource_type: Arc<ResourceType>,
        document: &Value,
    ) -> Result<Arc<ResourceInstance>, FrameworkError> {
        let canonical = normalize(document, resource_type.properties())?;
        let definition = ResourceDefinition::from_value(&canonical)?;
        let instance = ResourceInstance::new(resource_type, definition.metadata.clone(), None, None);
        self.populate(&instance, &definition)?;
        Ok(instance)
    }

    pub fn instantiate(&self, definition: &ResourceDefinition) -> Result<Arc<ResourceInstance>, FrameworkError> {
        let (resource_type, chain) = self.resolve(definition)?;
        let canonical = normalize(&definition.to_value(), resource_type.properties())?;
        let definition = ResourceDefinition::from_value(&canonical)?;
        let remote = chain.hosted.map(|endpoint| {
            debug!(%endpoint, "Resource is hosted remotely");
            Arc::new(RemoteResource::new(endpoint, self.transport.clone()).with_policy(self.calls.clone())) as Arc<dyn Invoker>
        });
        let instance = ResourceInstance::new(resource_type, definition.metadata.clone(), None, remote);
        self.populate(&instance, &definition)?;
        Ok(instance)
    }

    fn populate(&self, instance: &Arc<ResourceInstance>, definition: &ResourceDefinition) -> Result<(), FrameworkError> {
        let label = instance.label();
        for (key, attribute) in &definition.attributes {
            let descriptor = instance.properties().get(key).cloned();
            match (attribute, &descriptor) {
                (Attribute::Nested(nested), _) => {
                    let child = self.instantiate_child(nested, descriptor.as_ref())?;
                    instance.attach_child(key, child)?;
                }
                (Attribute::Value(value @ Value::Object(_)), Some(d)) if d.is_nested() => {
                    let nested = ResourceDefinition::from_value(value)?;
                    let child = self.instantiate_child(&nested, Some(d))?;
                    instance.attach_child(key, child)?;
                }
                (Attribute::Value(value), _) => {
                    instance
                        .set(key, value.clone())
                        .map_err(|e| FrameworkError::configuration(format!("{label}: {e}")))?;
                }
            }
        }
        Ok(())
    }

    fn instantiate_child(
        &self,
        definition: &ResourceDefinition,
        descriptor: Option<&PropertyDescriptor>,
    ) -> Result<Arc<ResourceInstance>, FrameworkError> {
        let metadata = &definition.metadata;
        if metadata.extend.is_some() || metadata.implementation.is_some() {
            return self.instantiate(definition);
        }
        let (resource_type, _) = self.resolve(definition)?;
        let properties: Option<PropertySet> = descriptor.and_then(|d| d.nested.clone());
        let child = ResourceInstance::new(resource_type, metadata.clone(), properties, None);
        self.populate(&child, definition)?;
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::layer;
    use crate::property::{Shape, Validator};
    use crate::registry::SerializeOptions;
    use serde_json::json;

    fn runtime() -> Runtime {
        let site = layer("site", |base| {
            let backend = PropertySet::new()
                .with(PropertyDescriptor::new("host", Shape::String))
                .unwrap()
                .with(PropertyDescriptor::new("port", Shape::Integer).with_default(json!(80)))
                .unwrap();
            base.property(PropertyDescriptor::new("backend", Shape::Object).main_key("host").nested(backend))?
                .property(
                    PropertyDescriptor::new("replicas", Shape::Integer).validate_with(Validator::range(1.0, 10.0)),
                )
        });
        let mut catalog = Catalog::new();
        catalog.register_layer("acme/site", site).unwrap();
        Runtime::new(catalog)
    }

    #[test]
    fn nested_shorthand_becomes_a_child_instance() {
        let runtime = runtime();
        let site = runtime
            .load(&json!({"$id": "acme/site", "$implementation": "acme/site", "backend": "10.0.0.1"}))
            .unwrap();
        let backend = site.child("backend").expect("backend child");
        assert_eq!(backend.get("host"), Some(json!("10.0.0.1")));
        assert_eq!(backend.get("port"), Some(json!(80)));
        assert!(Arc::ptr_eq(&backend.root(), &site));
    }

    #[test]
    fn serialized_document_loads_back_to_the_same_document() {
        let runtime = runtime();
        let first = runtime
            .load(&json!({
                "$id": "acme/site",
                "$implementation": "acme/site",
                "backend": {"host": "10.0.0.1", "port": 8080},
                "replicas": 3,
            }))
            .unwrap();
        let document = first.to_document(&SerializeOptions::default());
        let second = runtime.load(&document).unwrap();
        assert_eq!(second.to_document(&SerializeOptions::default()), document);
    }

    #[test]
    fn invalid_attribute_is_a_configuration_error() {
        let runtime = runtime();
        let err = runtime
            .load(&json!({"$implementation": "acme/site", "replicas": 50}))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(ref m) if m.contains("replicas")));
    }

    #[test]
    fn types_are_composed_once_per_chain() {
        let runtime = runtime();
        runtime.load(&json!({"$implementation": "acme/site"})).unwrap();
        runtime.load(&json!({"$implementation": "acme/site"})).unwrap();
        assert_eq!(runtime.type_cache().len(), 1);
    }

    #[test]
    fn url_implementation_loads_as_hosted() {
        let runtime = runtime();
        let remote = runtime
            .load(&json!({"$id": "acme/remote", "$implementation": "http://127.0.0.1:9/rpc"}))
            .unwrap();
        assert!(remote.is_hosted());
    }
}
