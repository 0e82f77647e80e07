//! # Layers
//!
//! A layer is a pure transform from a base [`Implementation`] to an extended one.
//! Layers add methods, declare properties and override inherited methods. An override
//! receives the inherited [`Method`] explicitly, so a "super call" always resolves to
//! exactly the next layer inward.
//!
//! ```rust
//! use resource_framework::layer::{layer, method};
//! use serde_json::json;
//!
//! let greet = layer("greet", |base| {
//!     base.expose("hello", method(|_inv| async { Ok(json!("Hello, World!")) }))
//! });
//!
//! let shout = layer("shout", |base| {
//!     base.override_method("hello", |inherited| {
//!         method(move |inv| {
//!             let inherited = inherited.clone();
//!             async move {
//!                 let text = inherited.call(inv).await?;
//!                 Ok(json!(text.as_str().unwrap_or_default().to_uppercase()))
//!             }
//!         })
//!     })
//! });
//! # let _ = (greet, shout);
//! ```

use crate::error::FrameworkError;
use crate::instance::ResourceInstance;
use crate::invoker::Environment;
use crate::property::{PropertyDescriptor, PropertySet};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type MethodFuture = BoxFuture<'static, Result<Value, FrameworkError>>;
type MethodFn = dyn Fn(Invocation) -> MethodFuture + Send + Sync;

/// Everything a method body sees.
#[derive(Clone)]
pub struct Invocation {
    pub this: Arc<ResourceInstance>,
    pub arguments: Value,
    pub environment: Environment,
}

impl Invocation {
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    /// A required string argument; a missing or mistyped one is the caller's fault.
    pub fn require_str(&self, key: &str) -> Result<&str, FrameworkError> {
        self.argument(key)
            .and_then(Value::as_str)
            .ok_or_else(|| FrameworkError::client(format!("argument {key:?} must be a string")))
    }
}

/// The body of a method, before it is attached to a layer.
#[derive(Clone)]
pub struct MethodBody(Arc<MethodFn>);

/// Wraps an async closure as a method body.
pub fn method<F, Fut>(f: F) -> MethodBody
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FrameworkError>> + Send + 'static,
{
    let body: Arc<MethodFn> = Arc::new(move |inv: Invocation| -> MethodFuture { Box::pin(f(inv)) });
    MethodBody(body)
}

/// A method as installed in an implementation.
#[derive(Clone)]
pub struct Method {
    body: Arc<MethodFn>,
    owner: Arc<str>,
    public: bool,
}

impl Method {
    pub fn call(&self, invocation: Invocation) -> MethodFuture {
        (self.body)(invocation)
    }

    /// Name of the layer that installed this method body.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_public(&self) -> bool {
        self.public
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("owner", &self.owner)
            .field("public", &self.public)
            .finish()
    }
}

/// The method table and property declarations a layer transforms.
#[derive(Clone, Default)]
pub struct Implementation {
    methods: IndexMap<String, Method>,
    properties: PropertySet,
    lineage: Vec<String>,
    applying: Option<Arc<str>>,
}

impl Implementation {
    /// Adds a private method. Redefining an inherited method must go through
    /// [`Implementation::override_method`].
    pub fn define(self, name: &str, body: MethodBody) -> Result<Self, FrameworkError> {
        self.install(name, body, false)
    }

    /// Adds a publicly invocable method.
    pub fn expose(self, name: &str, body: MethodBody) -> Result<Self, FrameworkError> {
        self.install(name, body, true)
    }

    /// Replaces an inherited method. `wrap` receives the inherited method.
    pub fn override_method(
        mut self,
        name: &str,
        wrap: impl FnOnce(Method) -> MethodBody,
    ) -> Result<Self, FrameworkError> {
        let owner = self.owner()?;
        let inherited = self.methods.get(name).cloned().ok_or_else(|| {
            FrameworkError::configuration(format!("cannot override {name:?}: no inherited method"))
        })?;
        let public = inherited.public;
        let MethodBody(body) = wrap(inherited);
        self.methods.insert(name.to_string(), Method { body, owner, public });
        Ok(self)
    }

    pub fn property(mut self, descriptor: PropertyDescriptor) -> Result<Self, FrameworkError> {
        self.properties.insert(descriptor)?;
        Ok(self)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = (&String, &Method)> {
        self.methods.iter()
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Names of the layers applied so far, innermost first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    fn install(mut self, name: &str, body: MethodBody, public: bool) -> Result<Self, FrameworkError> {
        let owner = self.owner()?;
        if let Some(existing) = self.methods.get(name) {
            return Err(FrameworkError::configuration(format!(
                "method {name:?} is already defined by layer {:?}; override it instead",
                existing.owner()
            )));
        }
        let MethodBody(body) = body;
        self.methods.insert(name.to_string(), Method { body, owner, public });
        Ok(self)
    }

    fn owner(&self) -> Result<Arc<str>, FrameworkError> {
        self.applying
            .clone()
            .ok_or_else(|| FrameworkError::configuration("implementations can only be changed by a layer"))
    }

    pub(crate) fn entering(mut self, layer: &str) -> Self {
        self.applying = Some(Arc::from(layer));
        self
    }

    pub(crate) fn applying(&self) -> Option<&str> {
        self.applying.as_deref()
    }

    pub(crate) fn finish(mut self) -> Self {
        if let Some(name) = self.applying.take() {
            self.lineage.push(name.to_string());
        }
        self
    }
}

/// A transform from a base implementation to an extended one.
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, base: Implementation) -> Result<Implementation, FrameworkError>;
}

/// A layer backed by a closure.
pub struct FnLayer<F> {
    name: String,
    transform: F,
}

impl<F> Layer for FnLayer<F>
where
    F: Fn(Implementation) -> Result<Implementation, FrameworkError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, base: Implementation) -> Result<Implementation, FrameworkError> {
        (self.transform)(base)
    }
}

pub fn layer<F>(name: impl Into<String>, transform: F) -> Arc<dyn Layer>
where
    F: Fn(Implementation) -> Result<Implementation, FrameworkError> + Send + Sync + 'static,
{
    Arc::new(FnLayer {
        name: name.into(),
        transform,
    })
}
