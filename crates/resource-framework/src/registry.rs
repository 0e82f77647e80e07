//! # Attribute Registry
//!
//! Converts between the shorthand forms authors write and the canonical form the
//! framework stores, and back again.
//!
//! ## Operations
//!
//! - [`normalize`]: expands shorthands. A bare scalar given for a property with a
//!   main key becomes `{main_key: scalar}`; a single value given for an array-shaped
//!   property becomes a one-element array. Nested properties are normalized
//!   recursively. Normalizing canonical input is a no-op.
//! - [`serialize`]: produces a document from a live instance. Values equal to their
//!   default are left out, transient values are dropped when publishing, and an
//!   object holding nothing but its main key collapses back to the bare scalar.
//! - [`validate`]: re-exported from [`crate::property`].
//!
//! Loading what `serialize` produced yields an instance that serializes to the same
//! document.

use crate::definition::is_reserved;
use crate::error::FrameworkError;
use crate::instance::{ResourceInstance, Slot};
use crate::property::{PropertyDescriptor, PropertySet, Shape};
use serde_json::{Map, Value};

pub use crate::property::validate;

/// Output mode for [`serialize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Drop values marked transient.
    pub publishing: bool,
    /// Keep values equal to their default.
    pub include_defaults: bool,
}

impl SerializeOptions {
    pub fn publishing() -> Self {
        Self {
            publishing: true,
            include_defaults: false,
        }
    }
}

/// Expands shorthand attribute forms into canonical form.
pub fn normalize(raw: &Value, properties: &PropertySet) -> Result<Value, FrameworkError> {
    let Value::Object(fields) = raw else {
        return Err(FrameworkError::configuration("only JSON objects can be normalized"));
    };
    let mut out = Map::new();
    for (key, value) in fields {
        let normalized = match properties.get(key) {
            Some(descriptor) if !is_reserved(key) => normalize_value(value, descriptor)?,
            _ => value.clone(),
        };
        out.insert(key.clone(), normalized);
    }
    Ok(Value::Object(out))
}

fn normalize_value(value: &Value, descriptor: &PropertyDescriptor) -> Result<Value, FrameworkError> {
    let mut value = value.clone();
    if let Some(main_key) = &descriptor.main_key {
        if !value.is_object() && !value.is_null() {
            let mut expanded = Map::new();
            expanded.insert(main_key.clone(), value);
            value = Value::Object(expanded);
        }
    }
    if descriptor.shape == Shape::Array && !value.is_array() && !value.is_null() {
        value = Value::Array(vec![value]);
    }
    if let (Some(nested), true) = (&descriptor.nested, value.is_object()) {
        value = normalize(&value, nested)
            .map_err(|e| FrameworkError::configuration(format!("in {:?}: {e}", descriptor.name)))?;
    }
    Ok(value)
}

/// Produces the document for `instance`.
pub fn serialize(instance: &ResourceInstance, options: &SerializeOptions) -> Value {
    let mut out = Map::new();
    instance.metadata().write_into(&mut out);
    let properties = instance.properties();
    for (key, slot) in instance.slots() {
        let descriptor = properties.get(&key);
        if options.publishing && descriptor.is_some_and(|d| d.transient) {
            continue;
        }
        let value = match slot {
            Slot::Value(v) => v,
            Slot::Child(child) => serialize(&child, options),
        };
        let Some(descriptor) = descriptor else {
            out.insert(key, value);
            continue;
        };
        if !options.include_defaults && descriptor.default.as_ref() == Some(&value) {
            continue;
        }
        let value = collapse(descriptor, value);
        let value = match &descriptor.serializer {
            Some(serializer) => serializer.apply(&value),
            None => value,
        };
        out.insert(key, value);
    }
    Value::Object(out)
}

fn collapse(descriptor: &PropertyDescriptor, value: Value) -> Value {
    let Some(main_key) = &descriptor.main_key else {
        return value;
    };
    match value {
        Value::Object(mut fields) if fields.len() == 1 => match fields.remove(main_key.as_str()) {
            Some(inner) if !inner.is_object() && !inner.is_null() => inner,
            Some(inner) => {
                fields.insert(main_key.clone(), inner);
                Value::Object(fields)
            }
            None => Value::Object(fields),
        },
        other => other,
    }
}
