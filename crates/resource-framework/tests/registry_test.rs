use parking_lot::Mutex;
use resource_framework::instance::{CHANGED_EVENT, SAVED_EVENT};
use resource_framework::property::{Charset, PropertySet};
use resource_framework::registry::SerializeOptions;
use resource_framework::{layer, Catalog, Environment, FrameworkError, PropertyDescriptor, Runtime, Shape, Validator};
use serde_json::{json, Value};
use std::sync::Arc;

// --- Test Fixture ---

fn runtime() -> Runtime {
    let site = layer("site", |base| {
        let backend = PropertySet::new()
            .with(PropertyDescriptor::new("host", Shape::String).validate_with(Validator::Charset(Charset::Hostname)))?
            .with(PropertyDescriptor::new("port", Shape::Integer).with_default(json!(80)))?;
        base.property(PropertyDescriptor::new("backend", Shape::Object).main_key("host").nested(backend))?
            .property(PropertyDescriptor::new("tags", Shape::Array))?
            .property(PropertyDescriptor::new("token", Shape::String).transient())?
            .property(
                PropertyDescriptor::new("replicas", Shape::Integer)
                    .with_default(json!(1))
                    .validate_with(Validator::range(1.0, 10.0)),
            )
    });
    let mut catalog = Catalog::new();
    catalog.register_layer("acme/site", site).unwrap();
    Runtime::new(catalog)
}

fn document() -> Value {
    json!({
        "$id": "acme/site",
        "$version": "0.3.0",
        "$implementation": "acme/site",
        "backend": "origin.acme.dev",
        "tags": "blue",
        "token": "s3cret",
        "replicas": 3,
    })
}

// --- Persistence ---

#[tokio::test]
async fn test_saved_document_loads_back_identically() {
    let runtime = runtime();
    let site = runtime.load(&document()).unwrap();
    let saved = Arc::new(Mutex::new(Vec::new()));
    let sink = saved.clone();
    site.on(SAVED_EVENT, move |event| sink.lock().push(event.value.clone()));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.json");
    site.save(&path).await.unwrap();
    assert_eq!(saved.lock().len(), 1);

    let reloaded = runtime.load_file(&path).await.unwrap();
    let options = SerializeOptions::default();
    assert_eq!(reloaded.to_document(&options), site.to_document(&options));
    assert_eq!(reloaded.metadata(), site.metadata());
}

#[tokio::test]
async fn test_shorthands_are_expanded_then_collapsed() {
    let runtime = runtime();
    let site = runtime.load(&document()).unwrap();

    let backend = site.child("backend").unwrap();
    assert_eq!(backend.get("host"), Some(json!("origin.acme.dev")));
    assert_eq!(backend.get("port"), Some(json!(80)));
    assert_eq!(site.get("tags"), Some(json!(["blue"])));

    let published = site.to_document(&SerializeOptions::publishing());
    assert_eq!(
        published,
        json!({
            "$id": "acme/site",
            "$version": "0.3.0",
            "$implementation": "acme/site",
            "backend": "origin.acme.dev",
            "tags": ["blue"],
            "replicas": 3,
        })
    );
}

#[tokio::test]
async fn test_describe_never_reveals_transient_values() {
    let runtime = runtime();
    let site = runtime.load(&document()).unwrap();
    let described = site.invoke("describe", json!({}), &Environment::new()).await.unwrap();
    assert!(described.get("token").is_none());
    assert_eq!(site.get("token"), Some(json!("s3cret")));
}

#[tokio::test]
async fn test_include_defaults_lists_every_stored_value() {
    let runtime = runtime();
    let site = runtime
        .load(&json!({"$implementation": "acme/site", "backend": {"host": "origin.acme.dev", "port": 80}, "replicas": 1}))
        .unwrap();

    let minimal = site.to_document(&SerializeOptions::default());
    assert_eq!(minimal, json!({"$implementation": "acme/site", "backend": "origin.acme.dev"}));

    let full = site.to_document(&SerializeOptions {
        publishing: false,
        include_defaults: true,
    });
    assert_eq!(full["replicas"], json!(1));
    assert_eq!(full["backend"], json!({"host": "origin.acme.dev", "port": 80}));
}

// --- Events & Errors ---

#[tokio::test]
async fn test_changes_are_announced_to_listeners() {
    let runtime = runtime();
    let site = runtime.load(&document()).unwrap();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    site.on(CHANGED_EVENT, move |event| sink.lock().push(event.key.clone()));

    site.set("replicas", json!(5)).unwrap();
    assert!(site.set("replicas", json!(50)).is_err());
    site.set("tags", Value::Null).unwrap();

    assert_eq!(
        *changes.lock(),
        vec![Some("replicas".to_string()), Some("tags".to_string())]
    );
    assert_eq!(site.get("tags"), None);
}

#[tokio::test]
async fn test_missing_file_is_reported_to_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let err = runtime().load_file(dir.path().join("absent.json")).await.unwrap_err();
    assert!(matches!(err, FrameworkError::Client(_)), "{err:?}");
}

#[test]
fn test_nested_validation_names_the_attribute() {
    let err = runtime()
        .load(&json!({"$implementation": "acme/site", "backend": "not a hostname!"}))
        .unwrap_err();
    assert!(matches!(err, FrameworkError::Configuration(ref m) if m.contains("host")), "{err:?}");
}
