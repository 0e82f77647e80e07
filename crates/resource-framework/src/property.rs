//! # Property Descriptors
//!
//! A property is a named, independently typed and validated member of a resource.
//! Layers declare their properties with [`PropertyDescriptor`]s; the registry uses
//! them to expand shorthand forms, skip defaults on output and reject bad values.
//!
//! ```rust
//! use resource_framework::property::{validate, PropertyDescriptor, Shape, Validator};
//! use serde_json::json;
//!
//! let name = PropertyDescriptor::new("name", Shape::String)
//!     .validate_with(Validator::length(1, 32));
//!
//! assert!(validate(&json!("World"), &name).is_ok());
//! assert!(validate(&json!(""), &name).is_err());
//! ```

use crate::error::FrameworkError;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A value failed the rules of its descriptor.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Prefixes the path with the enclosing property name.
    pub fn within(mut self, parent: &str) -> Self {
        self.path = format!("{parent}.{}", self.path);
        self
    }
}

/// The declared JSON shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// A nested resource definition.
    Resource,
}

impl Shape {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Shape::Any => true,
            Shape::String => value.is_string(),
            Shape::Number => value.is_number(),
            Shape::Integer => value.is_i64() || value.is_u64(),
            Shape::Boolean => value.is_boolean(),
            Shape::Array => value.is_array(),
            Shape::Object | Shape::Resource => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Shape::Any => "any value",
            Shape::String => "a string",
            Shape::Number => "a number",
            Shape::Integer => "an integer",
            Shape::Boolean => "a boolean",
            Shape::Array => "an array",
            Shape::Object => "an object",
            Shape::Resource => "a resource definition",
        }
    }
}

/// Allowed character sets for string values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Charset {
    Alphanumeric,
    /// Lowercase letters, digits, `-` and `.`.
    Hostname,
    /// Letters, digits, `-` and `_`.
    Identifier,
    Custom(String),
}

impl Charset {
    fn allows(&self, c: char) -> bool {
        match self {
            Charset::Alphanumeric => c.is_ascii_alphanumeric(),
            Charset::Hostname => c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.',
            Charset::Identifier => c.is_ascii_alphanumeric() || c == '-' || c == '_',
            Charset::Custom(allowed) => allowed.contains(c),
        }
    }
}

/// A descriptor-specific validation rule.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Character count for strings, element count for arrays.
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
    Charset(Charset),
    Pattern(Regex),
    SemVer,
    OneOf(Vec<Value>),
}

impl Validator {
    pub fn length(min: usize, max: usize) -> Self {
        Validator::Length {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn range(min: f64, max: f64) -> Self {
        Validator::Range {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Compiles a pattern validator. An invalid pattern is a configuration error.
    pub fn pattern(pattern: &str) -> Result<Self, FrameworkError> {
        Regex::new(pattern)
            .map(Validator::Pattern)
            .map_err(|e| FrameworkError::configuration(format!("invalid pattern {pattern:?}: {e}")))
    }

    fn check(&self, path: &str, value: &Value) -> Result<(), ValidationError> {
        match self {
            Validator::Length { min, max } => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    _ => return Ok(()),
                };
                if let Some(min) = min {
                    if len < *min {
                        return Err(ValidationError::new(path, format!("must have a length of at least {min}")));
                    }
                }
                if let Some(max) = max {
                    if len > *max {
                        return Err(ValidationError::new(path, format!("must have a length of at most {max}")));
                    }
                }
                Ok(())
            }
            Validator::Range { min, max } => {
                let Some(n) = value.as_f64() else { return Ok(()) };
                if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                    return Err(ValidationError::new(
                        path,
                        format!(
                            "must be between {} and {}",
                            min.map_or("-inf".to_string(), |v| v.to_string()),
                            max.map_or("+inf".to_string(), |v| v.to_string())
                        ),
                    ));
                }
                Ok(())
            }
            Validator::Charset(charset) => {
                let Some(s) = value.as_str() else { return Ok(()) };
                match s.chars().find(|c| !charset.allows(*c)) {
                    Some(bad) => Err(ValidationError::new(path, format!("contains a disallowed character {bad:?}"))),
                    None => Ok(()),
                }
            }
            Validator::Pattern(regex) => {
                let Some(s) = value.as_str() else { return Ok(()) };
                if regex.is_match(s) {
                    Ok(())
                } else {
                    Err(ValidationError::new(path, format!("must match {}", regex.as_str())))
                }
            }
            Validator::SemVer => {
                let Some(s) = value.as_str() else {
                    return Err(ValidationError::new(path, "must be a version string"));
                };
                semver::Version::parse(s)
                    .map(|_| ())
                    .map_err(|e| ValidationError::new(path, format!("is not a valid semantic version ({e})")))
            }
            Validator::OneOf(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(ValidationError::new(path, format!("must be one of {}", Value::Array(allowed.clone()))))
                }
            }
        }
    }
}

/// Custom output transform applied by `serialize`.
#[derive(Clone)]
pub struct ValueSerializer(Arc<dyn Fn(&Value) -> Value + Send + Sync>);

impl ValueSerializer {
    pub fn new(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: &Value) -> Value {
        (self.0)(value)
    }
}

impl fmt::Debug for ValueSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueSerializer(..)")
    }
}

/// Per-attribute metadata.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub shape: Shape,
    pub default: Option<Value>,
    pub validators: Vec<Validator>,
    /// Key a bare scalar stands in for (`"x"` means `{main_key: "x"}`).
    pub main_key: Option<String>,
    /// Descriptors of a nested sub-resource.
    pub nested: Option<PropertySet>,
    /// Local-only value, elided when publishing.
    pub transient: bool,
    pub serializer: Option<ValueSerializer>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            default: None,
            validators: Vec::new(),
            main_key: None,
            nested: None,
            transient: false,
            serializer: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn validate_with(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn main_key(mut self, key: impl Into<String>) -> Self {
        self.main_key = Some(key.into());
        self
    }

    pub fn nested(mut self, properties: PropertySet) -> Self {
        self.shape = Shape::Resource;
        self.nested = Some(properties);
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn serialize_with(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.serializer = Some(ValueSerializer::new(f));
        self
    }

    pub fn is_nested(&self) -> bool {
        self.shape == Shape::Resource
    }
}

/// Ordered, uniquely keyed collection of descriptors.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    entries: IndexMap<String, PropertyDescriptor>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor. Declaring the same key twice is a configuration error.
    pub fn insert(&mut self, descriptor: PropertyDescriptor) -> Result<(), FrameworkError> {
        if crate::definition::is_reserved(&descriptor.name) {
            return Err(FrameworkError::configuration(format!(
                "property {:?} uses the reserved marker prefix",
                descriptor.name
            )));
        }
        if self.entries.contains_key(&descriptor.name) {
            return Err(FrameworkError::configuration(format!(
                "property {:?} is declared twice",
                descriptor.name
            )));
        }
        self.entries.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn with(mut self, descriptor: PropertyDescriptor) -> Result<Self, FrameworkError> {
        self.insert(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks `value` against the shape and validators of `descriptor`.
pub fn validate(value: &Value, descriptor: &PropertyDescriptor) -> Result<(), ValidationError> {
    let path = descriptor.name.as_str();
    if !descriptor.shape.accepts(value) {
        return Err(ValidationError::new(path, format!("must be {}", descriptor.shape.describe())));
    }
    for validator in &descriptor.validators {
        validator.check(path, value)?;
    }
    if let (Some(nested), Value::Object(fields)) = (&descriptor.nested, value) {
        for (key, field) in fields {
            if let Some(inner) = nested.get(key) {
                validate(field, inner).map_err(|e| e.within(path))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shape_mismatch_is_reported() {
        let memory = PropertyDescriptor::new("memorySize", Shape::Integer);
        let err = validate(&json!("lots"), &memory).unwrap_err();
        assert_eq!(err.path, "memorySize");
        assert_eq!(err.message, "must be an integer");
    }

    #[test]
    fn length_and_range_bounds() {
        let name = PropertyDescriptor::new("name", Shape::String).validate_with(Validator::length(2, 4));
        assert!(validate(&json!("ab"), &name).is_ok());
        assert!(validate(&json!("a"), &name).is_err());
        assert!(validate(&json!("abcde"), &name).is_err());

        let memory = PropertyDescriptor::new("memorySize", Shape::Integer)
            .validate_with(Validator::range(128.0, 10240.0));
        assert!(validate(&json!(256), &memory).is_ok());
        let err = validate(&json!(64), &memory).unwrap_err();
        assert!(err.message.contains("between 128 and 10240"));
    }

    #[test]
    fn charset_rejects_first_bad_character() {
        let host = PropertyDescriptor::new("domainName", Shape::String)
            .validate_with(Validator::Charset(Charset::Hostname));
        assert!(validate(&json!("api.acme.dev"), &host).is_ok());
        let err = validate(&json!("API.acme.dev"), &host).unwrap_err();
        assert!(err.message.contains("'A'"));
    }

    #[test]
    fn semver_syntax() {
        let version = PropertyDescriptor::new("version", Shape::String).validate_with(Validator::SemVer);
        assert!(validate(&json!("1.2.3-beta.1"), &version).is_ok());
        assert!(validate(&json!("1.2"), &version).is_err());
    }

    #[test]
    fn nested_errors_carry_the_full_path() {
        let role = PropertySet::new()
            .with(PropertyDescriptor::new("name", Shape::String).validate_with(Validator::length(1, 64)))
            .unwrap();
        let descriptor = PropertyDescriptor::new("role", Shape::Object).nested(role);
        let err = validate(&json!({"name": ""}), &descriptor).unwrap_err();
        assert_eq!(err.path, "role.name");
    }

    #[test]
    fn duplicate_and_reserved_keys_are_configuration_errors() {
        let mut set = PropertySet::new();
        set.insert(PropertyDescriptor::new("name", Shape::String)).unwrap();
        assert!(matches!(
            set.insert(PropertyDescriptor::new("name", Shape::String)),
            Err(FrameworkError::Configuration(_))
        ));
        assert!(matches!(
            set.insert(PropertyDescriptor::new("$id", Shape::String)),
            Err(FrameworkError::Configuration(_))
        ));
    }

    #[test]
    fn invalid_pattern_fails_fast() {
        assert!(Validator::pattern("[a-z").is_err());
        let slug = PropertyDescriptor::new("slug", Shape::String)
            .validate_with(Validator::pattern("^[a-z]+$").unwrap());
        assert!(validate(&json!("hello"), &slug).is_ok());
        assert!(validate(&json!("Hello"), &slug).is_err());
    }
}
