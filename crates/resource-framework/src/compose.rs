//! # Composition Engine
//!
//! Builds a [`ResourceType`] by folding an ordered list of [`Layer`]s over the core
//! implementation. All checks happen here, once, so a type that composes successfully
//! never fails for structural reasons at invocation time.
//!
//! ## Checks
//!
//! After every layer is applied the engine verifies that:
//!
//! - the layer returned an extension of the implementation it was given (its lineage
//!   is intact), not a freshly built one;
//! - every required core capability (`get`, `set`, `describe`) is still present.
//!
//! A violation is a [`FrameworkError::Configuration`] naming the offending layer.
//!
//! ## Architecture Note
//!
//! Composed types are immutable and shared through `Arc`. The [`TypeCache`] memoizes
//! them per extension chain; it is owned by whoever creates it (normally a
//! [`Runtime`](crate::runtime::Runtime)), never process-global.

use crate::definition::{ImplementationRef, ResourceDefinition};
use crate::error::FrameworkError;
use crate::layer::{method, Implementation, Layer, Method};
use crate::property::PropertySet;
use crate::registry::SerializeOptions;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

pub const CORE_LAYER: &str = "core";
pub const REQUIRED_CAPABILITIES: [&str; 3] = ["get", "set", "describe"];

pub fn is_core_method(name: &str) -> bool {
    REQUIRED_CAPABILITIES.contains(&name)
}

/// The innermost implementation every resource type starts from.
pub fn core() -> Result<Implementation, FrameworkError> {
    let base = Implementation::default().entering(CORE_LAYER);
    let base = base
        .define(
            "get",
            method(|inv| async move {
                let key = inv.require_str("key")?;
                Ok(inv.this.get(key).unwrap_or(Value::Null))
            }),
        )?
        .define(
            "set",
            method(|inv| async move {
                let key = inv.require_str("key")?.to_string();
                let value = inv.argument("value").cloned().unwrap_or(Value::Null);
                inv.this.set(&key, value)?;
                Ok(Value::Null)
            }),
        )?
        .expose(
            "describe",
            method(|inv| async move { Ok(inv.this.to_document(&SerializeOptions::publishing())) }),
        )?;
    Ok(base.finish())
}

/// A composed, immutable resource type.
#[derive(Clone)]
pub struct ResourceType {
    implementation: Implementation,
}

impl ResourceType {
    /// Applied layers, innermost first, starting with `core`.
    pub fn layers(&self) -> &[String] {
        self.implementation.lineage()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.implementation.method(name)
    }

    pub fn properties(&self) -> &PropertySet {
        self.implementation.properties()
    }

    /// Names of the publicly invocable methods.
    pub fn allow_list(&self) -> BTreeSet<String> {
        self.implementation
            .methods()
            .filter(|(_, m)| m.is_public())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl std::fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceType")
            .field("layers", &self.layers())
            .field("allow_list", &self.allow_list())
            .finish()
    }
}

/// Composes `layers` over the core implementation, innermost first.
pub fn compose(layers: &[Arc<dyn Layer>]) -> Result<ResourceType, FrameworkError> {
    let mut current = core()?;
    for layer in layers {
        let name = layer.name();
        if name.is_empty() {
            return Err(FrameworkError::configuration("layers must have a non-empty name"));
        }
        let expected: Vec<String> = current.lineage().to_vec();
        let next = layer
            .apply(current.entering(name))
            .map_err(|e| FrameworkError::configuration(format!("layer {name:?} failed to apply: {e}")))?;
        if next.lineage() != expected.as_slice() || next.applying() != Some(name) {
            return Err(FrameworkError::configuration(format!(
                "layer {name:?} did not extend the implementation it was given"
            )));
        }
        for required in REQUIRED_CAPABILITIES {
            if next.method(required).is_none() {
                return Err(FrameworkError::configuration(format!(
                    "layer {name:?} removed the required capability {required:?}"
                )));
            }
        }
        debug!(layer = name, "Layer applied");
        current = next.finish();
    }
    Ok(ResourceType {
        implementation: current,
    })
}

/// The layers an extension chain resolves to, plus the hosted endpoint if any.
#[derive(Clone)]
pub struct ResolvedChain {
    pub layers: Vec<(String, Arc<dyn Layer>)>,
    pub hosted: Option<String>,
}

impl std::fmt::Debug for ResolvedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedChain")
            .field("layers", &self.key())
            .field("hosted", &self.hosted)
            .finish()
    }
}

impl ResolvedChain {
    /// Cache key: the layer references joined innermost first.
    pub fn key(&self) -> String {
        let refs: Vec<&str> = self.layers.iter().map(|(r, _)| r.as_str()).collect();
        refs.join(">")
    }
}

/// Registered layers and base definitions, addressed by reference.
#[derive(Default)]
pub struct Catalog {
    layers: HashMap<String, Arc<dyn Layer>>,
    definitions: HashMap<String, ResourceDefinition>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_layer(&mut self, reference: impl Into<String>, layer: Arc<dyn Layer>) -> Result<(), FrameworkError> {
        let reference = reference.into();
        if self.layers.contains_key(&reference) {
            return Err(FrameworkError::configuration(format!("layer {reference:?} is registered twice")));
        }
        self.layers.insert(reference, layer);
        Ok(())
    }

    /// Registers a definition other definitions can `$extend`.
    pub fn register_definition(&mut self, definition: ResourceDefinition) -> Result<(), FrameworkError> {
        let id = definition
            .metadata
            .id
            .clone()
            .ok_or_else(|| FrameworkError::configuration("base definitions need an $id"))?;
        if self.definitions.contains_key(&id) {
            return Err(FrameworkError::configuration(format!("definition {id:?} is registered twice")));
        }
        self.definitions.insert(id, definition);
        Ok(())
    }

    pub fn layer(&self, reference: &str) -> Option<Arc<dyn Layer>> {
        self.layers.get(reference).cloned()
    }

    pub fn definition(&self, id: &str) -> Option<&ResourceDefinition> {
        self.definitions.get(id)
    }

    /// Follows `$extend` to the root, then lists implementation layers innermost first.
    pub fn resolve_chain(&self, definition: &ResourceDefinition) -> Result<ResolvedChain, FrameworkError> {
        let mut visited: Vec<String> = definition.metadata.id.iter().cloned().collect();
        let mut lineage = vec![definition];
        let mut current = definition;
        while let Some(base) = &current.metadata.extend {
            if visited.contains(base) {
                return Err(FrameworkError::configuration(format!(
                    "extension cycle through {base:?} ({})",
                    visited.join(" -> ")
                )));
            }
            visited.push(base.clone());
            current = self.definition(base).ok_or_else(|| {
                FrameworkError::configuration(format!(
                    "{} extends unknown definition {base:?}",
                    current.label()
                ))
            })?;
            lineage.push(current);
        }

        let mut chain = ResolvedChain {
            layers: Vec::new(),
            hosted: None,
        };
        for def in lineage.iter().rev() {
            match &def.metadata.implementation {
                Some(ImplementationRef::Layer(reference)) => {
                    let layer = self.layer(reference).ok_or_else(|| {
                        FrameworkError::configuration(format!(
                            "{} references unknown implementation {reference:?}",
                            def.label()
                        ))
                    })?;
                    chain.layers.push((reference.clone(), layer));
                }
                Some(ImplementationRef::Hosted(endpoint)) => chain.hosted = Some(endpoint.clone()),
                None => {}
            }
        }
        Ok(chain)
    }
}

/// Bounded cache of composed types keyed by extension chain.
pub struct TypeCache {
    entries: Mutex<LruCache<String, Arc<ResourceType>>>,
}

impl TypeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached type for `chain`, composing it on a miss.
    pub fn get_or_compose(&self, chain: &ResolvedChain) -> Result<Arc<ResourceType>, FrameworkError> {
        let key = chain.key();
        if let Some(hit) = self.entries.lock().get(&key) {
            return Ok(hit.clone());
        }
        let layers: Vec<Arc<dyn Layer>> = chain.layers.iter().map(|(_, l)| l.clone()).collect();
        let composed = Arc::new(compose(&layers)?);
        debug!(chain = %key, "Composed resource type");
        self.entries.lock().put(key, composed.clone());
        Ok(composed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for TypeCache {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::layer;
    use crate::property::{PropertyDescriptor, Shape};
    use serde_json::json;

    fn noop(name: &str) -> Arc<dyn Layer> {
        layer(name, Ok)
    }

    #[test]
    fn core_type_exposes_only_describe() {
        let rtype = compose(&[]).unwrap();
        assert_eq!(rtype.layers(), ["core"]);
        assert_eq!(rtype.allow_list().into_iter().collect::<Vec<_>>(), vec!["describe"]);
        assert!(rtype.method("get").is_some());
    }

    #[test]
    fn layer_that_drops_its_base_is_rejected() {
        let rogue = layer("rogue", |_base| Ok(Implementation::default().entering("rogue")));
        let err = compose(&[rogue]).unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(ref m) if m.contains("rogue")));
    }

    #[test]
    fn redefining_an_inherited_method_is_rejected() {
        let clash = layer("clash", |base| {
            base.expose("describe", method(|_| async { Ok(json!(null)) }))
        });
        let err = compose(&[clash]).unwrap_err();
        assert!(err.to_string().contains("already defined by layer \"core\""));
    }

    #[test]
    fn overriding_a_missing_method_is_rejected() {
        let lonely = layer("lonely", |base| {
            base.override_method("hello", |inherited| {
                method(move |inv| inherited.call(inv))
            })
        });
        assert!(compose(&[lonely]).is_err());
    }

    #[test]
    fn duplicate_property_names_the_layer() {
        let a = layer("a", |base| base.property(PropertyDescriptor::new("name", Shape::String)));
        let b = layer("b", |base| base.property(PropertyDescriptor::new("name", Shape::String)));
        let err = compose(&[a, b]).unwrap_err();
        assert!(err.to_string().contains("layer \"b\""));
    }

    #[test]
    fn catalog_detects_extension_cycles() {
        let mut catalog = Catalog::new();
        catalog
            .register_definition(ResourceDefinition::from_value(&json!({"$id": "acme/a", "$extend": "acme/b"})).unwrap())
            .unwrap();
        catalog
            .register_definition(ResourceDefinition::from_value(&json!({"$id": "acme/b", "$extend": "acme/a"})).unwrap())
            .unwrap();
        let start = catalog.definition("acme/a").unwrap().clone();
        let err = catalog.resolve_chain(&start).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn catalog_orders_layers_innermost_first() {
        let mut catalog = Catalog::new();
        catalog.register_layer("acme/base", noop("base")).unwrap();
        catalog.register_layer("acme/top", noop("top")).unwrap();
        catalog
            .register_definition(
                ResourceDefinition::from_value(&json!({"$id": "acme/base", "$implementation": "acme/base"})).unwrap(),
            )
            .unwrap();
        let leaf = ResourceDefinition::from_value(&json!({
            "$extend": "acme/base",
            "$implementation": "acme/top",
        }))
        .unwrap();
        let chain = catalog.resolve_chain(&leaf).unwrap();
        assert_eq!(chain.key(), "acme/base>acme/top");
        assert!(chain.hosted.is_none());
    }

    #[test]
    fn unknown_implementation_is_a_configuration_error() {
        let catalog = Catalog::new();
        let leaf = ResourceDefinition::from_value(&json!({"$implementation": "acme/missing"})).unwrap();
        assert!(matches!(
            catalog.resolve_chain(&leaf),
            Err(FrameworkError::Configuration(_))
        ));
    }

    #[test]
    fn type_cache_reuses_composed_types() {
        let cache = TypeCache::new(2);
        let chain = ResolvedChain {
            layers: vec![("acme/x".into(), noop("x"))],
            hosted: None,
        };
        let first = cache.get_or_compose(&chain).unwrap();
        let second = cache.get_or_compose(&chain).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
