//! # Resource Instances
//!
//! A [`ResourceInstance`] is a live resource: a composed [`ResourceType`], the
//! metadata it was loaded with and its attribute values. Nested sub-resources are
//! child instances owned by their parent; a child only keeps a weak back-reference,
//! so a tree is dropped as a whole when its root goes away.
//!
//! ## Events
//!
//! Listeners registered with [`ResourceInstance::on`] are notified synchronously:
//!
//! - `changed` after a successful [`ResourceInstance::set`];
//! - `saved` after [`ResourceInstance::save`] wrote the document.

use crate::compose::{is_core_method, ResourceType};
use crate::definition::{self, Metadata};
use crate::error::FrameworkError;
use crate::invoker::{Environment, Invoker};
use crate::layer::Invocation;
use crate::property::{validate, PropertySet};
use crate::registry::{self, SerializeOptions};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

pub const CHANGED_EVENT: &str = "changed";
pub const SAVED_EVENT: &str = "saved";

/// Something that happened to a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub name: String,
    pub resource: String,
    pub key: Option<String>,
    pub value: Option<Value>,
}

pub type Listener = Arc<dyn Fn(&ResourceEvent) + Send + Sync>;

/// A stored attribute: a plain value or an owned child resource.
#[derive(Clone)]
pub enum Slot {
    Value(Value),
    Child(Arc<ResourceInstance>),
}

pub struct ResourceInstance {
    metadata: Metadata,
    resource_type: Arc<ResourceType>,
    properties: PropertySet,
    slots: RwLock<IndexMap<String, Slot>>,
    parent: OnceLock<Weak<ResourceInstance>>,
    listeners: RwLock<Vec<(String, Listener)>>,
    remote: Option<Arc<dyn Invoker>>,
    this: Weak<ResourceInstance>,
}

impl ResourceInstance {
    /// Creates an empty instance. `properties` overrides the type's descriptors,
    /// which nested sub-resources use to carry their parent's nested declarations.
    pub fn new(
        resource_type: Arc<ResourceType>,
        metadata: Metadata,
        properties: Option<PropertySet>,
        remote: Option<Arc<dyn Invoker>>,
    ) -> Arc<Self> {
        let properties = properties.unwrap_or_else(|| resource_type.properties().clone());
        Arc::new_cyclic(|this| Self {
            metadata,
            resource_type,
            properties,
            slots: RwLock::new(IndexMap::new()),
            parent: OnceLock::new(),
            listeners: RwLock::new(Vec::new()),
            remote,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.metadata.id.as_deref()
    }

    pub fn label(&self) -> String {
        self.id().unwrap_or("<anonymous>").to_string()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn is_hosted(&self) -> bool {
        self.remote.is_some()
    }

    /// Current value of `key`: the stored value, a child's document, or the default.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.slots.read().get(key) {
            Some(Slot::Value(v)) => return Some(v.clone()),
            Some(Slot::Child(child)) => return Some(child.to_document(&SerializeOptions::default())),
            None => {}
        }
        self.properties.get(key).and_then(|d| d.default.clone())
    }

    /// Validates and stores a value. `Null` unsets the attribute.
    pub fn set(&self, key: &str, value: Value) -> Result<(), FrameworkError> {
        if definition::is_reserved(key) {
            return Err(FrameworkError::client(format!("{key:?} is reserved and cannot be set")));
        }
        if value.is_null() {
            self.slots.write().shift_remove(key);
        } else {
            if let Some(descriptor) = self.properties.get(key) {
                validate(&value, descriptor)?;
            }
            self.slots.write().insert(key.to_string(), Slot::Value(value.clone()));
        }
        self.emit(&ResourceEvent {
            name: CHANGED_EVENT.to_string(),
            resource: self.label(),
            key: Some(key.to_string()),
            value: Some(value),
        });
        Ok(())
    }

    pub fn child(&self, key: &str) -> Option<Arc<ResourceInstance>> {
        match self.slots.read().get(key) {
            Some(Slot::Child(child)) => Some(child.clone()),
            _ => None,
        }
    }

    /// Snapshot of the stored attributes in declaration order.
    pub fn slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .read()
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect()
    }

    /// Makes `child` the sub-resource stored under `key`.
    pub fn attach_child(&self, key: &str, child: Arc<ResourceInstance>) -> Result<(), FrameworkError> {
        if definition::is_reserved(key) {
            return Err(FrameworkError::configuration(format!("{key:?} is reserved")));
        }
        let mut ancestor = self.this.upgrade();
        while let Some(node) = ancestor {
            if Arc::ptr_eq(&node, &child) {
                return Err(FrameworkError::configuration(format!(
                    "attaching {} under {key:?} would create a cycle",
                    child.label()
                )));
            }
            ancestor = node.parent();
        }
        child
            .parent
            .set(self.this.clone())
            .map_err(|_| FrameworkError::configuration(format!("{} already has a parent", child.label())))?;
        self.slots.write().insert(key.to_string(), Slot::Child(child));
        Ok(())
    }

    pub fn parent(&self) -> Option<Arc<ResourceInstance>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    pub fn root(self: &Arc<Self>) -> Arc<ResourceInstance> {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    pub fn on(&self, event: impl Into<String>, listener: impl Fn(&ResourceEvent) + Send + Sync + 'static) {
        self.listeners.write().push((event.into(), Arc::new(listener)));
    }

    pub fn emit(&self, event: &ResourceEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(name, _)| *name == event.name)
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Runs a method. Hosted resources forward everything but the core capabilities.
    pub async fn invoke(
        self: &Arc<Self>,
        name: &str,
        arguments: Value,
        environment: &Environment,
    ) -> Result<Value, FrameworkError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => arguments,
            _ => return Err(FrameworkError::client("arguments must be a JSON object")),
        };
        if let Some(remote) = &self.remote {
            if !is_core_method(name) {
                debug!(resource = %self.label(), method = name, "Forwarding to hosted implementation");
                return remote.invoke(name, arguments, environment).await;
            }
        }
        let method = self
            .resource_type
            .method(name)
            .cloned()
            .ok_or_else(|| FrameworkError::client(format!("{} has no method {name:?}", self.label())))?;
        debug!(resource = %self.label(), method = name, layer = method.owner(), "Invoking");
        method
            .call(Invocation {
                this: self.clone(),
                arguments,
                environment: environment.clone(),
            })
            .await
    }

    pub fn to_document(&self, options: &SerializeOptions) -> Value {
        registry::serialize(self, options)
    }

    /// Writes the full local document (transient values included).
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), FrameworkError> {
        let path = path.as_ref();
        definition::save_document(path, &self.to_document(&SerializeOptions::default())).await?;
        self.emit(&ResourceEvent {
            name: SAVED_EVENT.to_string(),
            resource: self.label(),
            key: None,
            value: Some(Value::String(path.display().to_string())),
        });
        Ok(())
    }
}

impl std::fmt::Debug for ResourceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInstance")
            .field("id", &self.metadata.id)
            .field("layers", &self.resource_type.layers())
            .field("hosted", &self.is_hosted())
            .finish()
    }
}

#[async_trait]
impl Invoker for Arc<ResourceInstance> {
    fn label(&self) -> String {
        ResourceInstance::label(self)
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        environment: &Environment,
    ) -> Result<Value, FrameworkError> {
        ResourceInstance::invoke(self, name, arguments, environment).await
    }
}
