//! # Resource Definitions
//!
//! A resource definition is a JSON document with ordered keys. Keys starting with the
//! reserved marker (`$`) carry framework metadata; every other key is a user attribute.
//! At load time the document is split into two disjoint, typed parts:
//!
//! - [`Metadata`]: identifier, version, base-type reference, implementation reference,
//!   description.
//! - `attributes`: an ordered map of [`Attribute`]s, each either a plain value or a
//!   nested [`ResourceDefinition`].
//!
//! ```json
//! {
//!   "$id": "acme/greeter",
//!   "$version": "1.0.0",
//!   "$extend": "acme/hello",
//!   "name": "Ada"
//! }
//! ```

use crate::error::FrameworkError;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::path::Path;

pub const RESERVED_PREFIX: char = '$';
pub const ID_KEY: &str = "$id";
pub const VERSION_KEY: &str = "$version";
pub const EXTEND_KEY: &str = "$extend";
pub const IMPLEMENTATION_KEY: &str = "$implementation";
pub const DESCRIPTION_KEY: &str = "$description";

const MAX_SEGMENT_LEN: usize = 64;

pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Where the implementation of a resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImplementationRef {
    /// A layer registered in the catalog under this name.
    Layer(String),
    /// A hosted process reachable over RPC at this endpoint.
    Hosted(String),
}

impl ImplementationRef {
    pub fn parse(reference: &str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            ImplementationRef::Hosted(reference.to_string())
        } else {
            ImplementationRef::Layer(reference.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImplementationRef::Layer(s) | ImplementationRef::Hosted(s) => s,
        }
    }
}

/// Framework-reserved part of a definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub id: Option<String>,
    pub version: Option<semver::Version>,
    pub extend: Option<String>,
    pub implementation: Option<ImplementationRef>,
    pub description: Option<String>,
}

impl Metadata {
    pub fn is_hosted(&self) -> bool {
        matches!(self.implementation, Some(ImplementationRef::Hosted(_)))
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), FrameworkError> {
        let text = value
            .as_str()
            .ok_or_else(|| FrameworkError::configuration(format!("{key} must be a string")))?;
        match key {
            ID_KEY => {
                validate_identifier(text)?;
                self.id = Some(text.to_string());
            }
            VERSION_KEY => {
                let version = semver::Version::parse(text).map_err(|e| {
                    FrameworkError::configuration(format!("{VERSION_KEY} {text:?} is not a semantic version: {e}"))
                })?;
                self.version = Some(version);
            }
            EXTEND_KEY => {
                validate_identifier(text)?;
                self.extend = Some(text.to_string());
            }
            IMPLEMENTATION_KEY => {
                if text.is_empty() {
                    return Err(FrameworkError::configuration(format!("{IMPLEMENTATION_KEY} is empty")));
                }
                self.implementation = Some(ImplementationRef::parse(text));
            }
            DESCRIPTION_KEY => self.description = Some(text.to_string()),
            other => {
                return Err(FrameworkError::configuration(format!("unknown reserved key {other:?}")));
            }
        }
        Ok(())
    }

    pub(crate) fn write_into(&self, out: &mut Map<String, Value>) {
        if let Some(id) = &self.id {
            out.insert(ID_KEY.into(), Value::String(id.clone()));
        }
        if let Some(version) = &self.version {
            out.insert(VERSION_KEY.into(), Value::String(version.to_string()));
        }
        if let Some(extend) = &self.extend {
            out.insert(EXTEND_KEY.into(), Value::String(extend.clone()));
        }
        if let Some(implementation) = &self.implementation {
            out.insert(IMPLEMENTATION_KEY.into(), Value::String(implementation.as_str().to_string()));
        }
        if let Some(description) = &self.description {
            out.insert(DESCRIPTION_KEY.into(), Value::String(description.clone()));
        }
    }
}

/// A user attribute: plain value or nested sub-resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Value(Value),
    Nested(Box<ResourceDefinition>),
}

impl Attribute {
    pub fn to_value(&self) -> Value {
        match self {
            Attribute::Value(v) => v.clone(),
            Attribute::Nested(definition) => definition.to_value(),
        }
    }
}

/// A loaded definition, split into metadata and attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDefinition {
    pub metadata: Metadata,
    pub attributes: IndexMap<String, Attribute>,
}

impl ResourceDefinition {
    /// Splits a document into metadata and attributes.
    ///
    /// An object attribute carrying at least one reserved key is a nested definition.
    pub fn from_value(document: &Value) -> Result<Self, FrameworkError> {
        let Value::Object(fields) = document else {
            return Err(FrameworkError::configuration("a resource definition must be a JSON object"));
        };
        let mut definition = ResourceDefinition::default();
        for (key, value) in fields {
            if is_reserved(key) {
                definition.metadata.set(key, value)?;
                continue;
            }
            let attribute = match value {
                Value::Object(inner) if inner.keys().any(|k| is_reserved(k)) => {
                    let nested = ResourceDefinition::from_value(value)
                        .map_err(|e| FrameworkError::configuration(format!("in attribute {key:?}: {e}")))?;
                    Attribute::Nested(Box::new(nested))
                }
                other => Attribute::Value(other.clone()),
            };
            definition.attributes.insert(key.clone(), attribute);
        }
        Ok(definition)
    }

    pub fn from_json_str(text: &str) -> Result<Self, FrameworkError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| FrameworkError::configuration(format!("invalid JSON document: {e}")))?;
        Self::from_value(&document)
    }

    /// Metadata keys first, in canonical order, then attributes in declaration order.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        self.metadata.write_into(&mut out);
        for (key, attribute) in &self.attributes {
            out.insert(key.clone(), attribute.to_value());
        }
        Value::Object(out)
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn label(&self) -> &str {
        self.metadata.id.as_deref().unwrap_or("<anonymous>")
    }
}

/// `scope/name`, each segment lowercase alphanumerics and inner hyphens.
pub fn validate_identifier(id: &str) -> Result<(), FrameworkError> {
    let invalid = |why: &str| FrameworkError::configuration(format!("invalid identifier {id:?}: {why}"));
    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() != 2 {
        return Err(invalid("expected the form scope/name"));
    }
    for segment in segments {
        if segment.is_empty() || segment.len() > MAX_SEGMENT_LEN {
            return Err(invalid("segments must be 1 to 64 characters long"));
        }
        if segment.starts_with('-') || segment.ends_with('-') {
            return Err(invalid("segments cannot start or end with a hyphen"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid("only lowercase letters, digits and hyphens are allowed"));
        }
    }
    Ok(())
}

/// Reads a persisted resource document.
pub async fn load_document(path: impl AsRef<Path>) -> Result<Value, FrameworkError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FrameworkError::client(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| FrameworkError::configuration(format!("{} is not valid JSON: {e}", path.display())))
}

/// Writes a resource document as pretty JSON with a trailing newline.
pub async fn save_document(path: impl AsRef<Path>, document: &Value) -> Result<(), FrameworkError> {
    let path = path.as_ref();
    let mut text = serde_json::to_string_pretty(document)
        .map_err(|e| FrameworkError::server(format!("cannot encode document: {e}")))?;
    text.push('\n');
    tokio::fs::write(path, text)
        .await
        .map_err(|e| FrameworkError::server(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_reserved_keys_from_attributes() {
        let definition = ResourceDefinition::from_value(&json!({
            "$id": "acme/hello",
            "$version": "1.0.0",
            "$description": "Says hello",
            "name": "World",
            "$implementation": "acme/hello-impl",
        }))
        .unwrap();

        assert_eq!(definition.metadata.id.as_deref(), Some("acme/hello"));
        assert_eq!(definition.metadata.version, Some(semver::Version::new(1, 0, 0)));
        assert_eq!(
            definition.metadata.implementation,
            Some(ImplementationRef::Layer("acme/hello-impl".into()))
        );
        assert_eq!(definition.attributes.len(), 1);
        assert_eq!(definition.attribute("name"), Some(&Attribute::Value(json!("World"))));
    }

    #[test]
    fn unknown_reserved_key_is_rejected() {
        let err = ResourceDefinition::from_value(&json!({"$owner": "me"})).unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(ref m) if m.contains("$owner")));
    }

    #[test]
    fn url_implementation_marks_resource_hosted() {
        let definition = ResourceDefinition::from_value(&json!({
            "$id": "acme/remote",
            "$implementation": "https://hosted.acme.dev/rpc",
        }))
        .unwrap();
        assert!(definition.metadata.is_hosted());
    }

    #[test]
    fn nested_definitions_are_detected_by_reserved_keys() {
        let definition = ResourceDefinition::from_value(&json!({
            "$id": "acme/site",
            "backend": {"$extend": "acme/hello", "name": "Ada"},
            "tags": {"env": "prod"},
        }))
        .unwrap();
        match definition.attribute("backend") {
            Some(Attribute::Nested(inner)) => {
                assert_eq!(inner.metadata.extend.as_deref(), Some("acme/hello"));
            }
            other => panic!("expected nested definition, got {other:?}"),
        }
        assert!(matches!(definition.attribute("tags"), Some(Attribute::Value(_))));
    }

    #[test]
    fn to_value_puts_metadata_first() {
        let definition = ResourceDefinition::from_value(&json!({
            "name": "World",
            "$version": "0.1.0",
            "$id": "acme/hello",
        }))
        .unwrap();
        let keys: Vec<String> = definition.to_value().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["$id", "$version", "name"]);
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("acme/hello-world").is_ok());
        assert!(validate_identifier("acme").is_err());
        assert!(validate_identifier("acme/Hello").is_err());
        assert!(validate_identifier("acme/-hello").is_err());
        assert!(validate_identifier("a/b/c").is_err());
        assert!(validate_identifier(&format!("acme/{}", "x".repeat(65))).is_err());
    }

    #[test]
    fn bad_version_is_a_configuration_error() {
        let err = ResourceDefinition::from_value(&json!({"$version": "one"})).unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }

    #[tokio::test]
    async fn documents_survive_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resource.json");
        let document = json!({"$id": "acme/hello", "name": "World"});
        save_document(&path, &document).await.unwrap();
        assert_eq!(load_document(&path).await.unwrap(), document);
    }
}
