//! # Hello Layers
//!
//! The smallest useful resource: a greeter with one validated property.
//!
//! | Layer | Adds |
//! |-------|------|
//! | `hello` | `name` (default `World`, 1..=32 chars), public `hello`, private `secret` |
//! | `uppercase` | overrides `hello`, shouting whatever the inherited body returns |
//!
//! Layers are combined through definitions, never by editing each other:
//!
//! ```text
//! sample/hello      = core + hello
//! sample/loud-hello = core + hello + uppercase
//! ```

use resource_framework::{layer, method, Layer, PropertyDescriptor, Shape, Validator};
use serde_json::{json, Value};
use std::sync::Arc;

pub const HELLO_LAYER: &str = "hello";
pub const UPPERCASE_LAYER: &str = "uppercase";

pub const HELLO: &str = "sample/hello";
pub const LOUD_HELLO: &str = "sample/loud-hello";

pub fn hello_layer() -> Arc<dyn Layer> {
    layer(HELLO_LAYER, |base| {
        base.property(
            PropertyDescriptor::new("name", Shape::String)
                .with_default(json!("World"))
                .validate_with(Validator::length(1, 32)),
        )?
        .expose(
            "hello",
            method(|inv| async move {
                let name = inv.this.get("name").unwrap_or_default();
                Ok(json!(greeting(&name)))
            }),
        )?
        // Reachable from other layers, never through the gateway.
        .define(
            "secret",
            method(|inv| async move { Ok(json!(format!("{} keeps no secrets", inv.this.label()))) }),
        )
    })
}

pub fn uppercase_layer() -> Arc<dyn Layer> {
    layer(UPPERCASE_LAYER, |base| {
        base.override_method("hello", |inherited| {
            method(move |inv| {
                let greeting = inherited.call(inv);
                async move {
                    let greeting = greeting.await?;
                    Ok(json!(greeting.as_str().unwrap_or_default().to_uppercase()))
                }
            })
        })
    })
}

fn greeting(name: &Value) -> String {
    format!("Hello, {}!", name.as_str().unwrap_or("World"))
}

/// Base definitions registered in the sample catalog.
pub fn definitions() -> Vec<Value> {
    vec![
        json!({"$id": HELLO, "$implementation": HELLO_LAYER}),
        json!({"$id": LOUD_HELLO, "$extend": HELLO, "$implementation": UPPERCASE_LAYER}),
    ]
}
