//! # Cloud Layer
//!
//! A layer that makes a resource deployable. It declares the function settings as
//! validated properties and exposes a public `deploy` method that converges the cloud
//! infrastructure to the resource's current attributes through a [`DeploySession`].
//!
//! | Attribute | Shape | Default | Rule |
//! |-----------|-------|---------|------|
//! | `memorySize` | integer | 128 | 128..=10240 MB |
//! | `timeout` | integer | 30 | 1..=900 s |
//! | `runtime` | string | `provided.al2023` | |
//! | `handler` | string | `bootstrap` | |
//! | `codeDigest` | string | | |
//! | `policies` | array | basic execution policy | |
//! | `environment` | object | | string values |
//! | `domainName` | string | | hostname characters |

use super::capabilities::{FunctionSpec, RoleSpec};
use super::error::DeployError;
use super::plan::DesiredState;
use super::session::DeploySession;
use crate::instance::ResourceInstance;
use crate::layer::{layer, method, Layer};
use crate::property::{Charset, PropertyDescriptor, Shape, Validator};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CLOUD_LAYER: &str = "cloud";
/// The public method that converges the infrastructure.
pub const DEPLOY_METHOD: &str = "deploy";
pub const BASIC_EXECUTION_POLICY: &str = "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";
const TRUSTED_SERVICE: &str = "lambda.amazonaws.com";

pub fn cloud_layer(session: Arc<DeploySession>) -> Arc<dyn Layer> {
    layer(CLOUD_LAYER, move |base| {
        let session = session.clone();
        base.property(
            PropertyDescriptor::new("memorySize", Shape::Integer)
                .with_default(json!(128))
                .validate_with(Validator::range(128.0, 10240.0)),
        )?
        .property(
            PropertyDescriptor::new("timeout", Shape::Integer)
                .with_default(json!(30))
                .validate_with(Validator::range(1.0, 900.0)),
        )?
        .property(PropertyDescriptor::new("runtime", Shape::String).with_default(json!("provided.al2023")))?
        .property(PropertyDescriptor::new("handler", Shape::String).with_default(json!("bootstrap")))?
        .property(PropertyDescriptor::new("codeDigest", Shape::String).validate_with(Validator::length(1, 128)))?
        .property(PropertyDescriptor::new("policies", Shape::Array).with_default(json!([BASIC_EXECUTION_POLICY])))?
        .property(PropertyDescriptor::new("environment", Shape::Object))?
        .property(
            PropertyDescriptor::new("domainName", Shape::String)
                .validate_with(Validator::length(1, 253))
                .validate_with(Validator::Charset(Charset::Hostname)),
        )?
        .expose(
            DEPLOY_METHOD,
            method(move |inv| {
                let session = session.clone();
                async move {
                    let desired = desired_state(&inv.this)?;
                    let report = session.deploy(desired).await?;
                    Ok(report.to_json())
                }
            }),
        )
    })
}

/// Derives what the infrastructure should look like from the resource's attributes.
pub fn desired_state(instance: &ResourceInstance) -> Result<DesiredState, DeployError> {
    let id = instance
        .id()
        .ok_or_else(|| DeployError::InvalidDesiredState("deployable resources need an $id".into()))?;
    let name = id.replace('/', "-");

    let policies = match instance.get("policies") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|p| {
                p.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| DeployError::InvalidDesiredState("policies must be strings".into()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => vec![BASIC_EXECUTION_POLICY.to_string()],
    };
    let environment = match instance.get("environment") {
        Some(Value::Object(vars)) => vars
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k.clone(), s.clone()),
                other => (k.clone(), other.to_string()),
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    let code_digest = match instance.get("codeDigest") {
        Some(Value::String(digest)) => digest,
        _ => instance
            .metadata()
            .version
            .as_ref()
            .map(|v| format!("version:{v}"))
            .unwrap_or_else(|| "unversioned".to_string()),
    };

    Ok(DesiredState {
        identity: id.to_string(),
        role: RoleSpec {
            name: format!("{name}-role"),
            trusted_service: TRUSTED_SERVICE.to_string(),
            policies,
        },
        function: FunctionSpec {
            name: name.clone(),
            runtime: string_attr(instance, "runtime")?,
            handler: string_attr(instance, "handler")?,
            memory_mb: integer_attr(instance, "memorySize")?,
            timeout_secs: integer_attr(instance, "timeout")?,
            code_digest,
            environment,
        },
        api_name: name,
        domain: instance.get("domainName").and_then(|v| v.as_str().map(str::to_string)),
    })
}

fn string_attr(instance: &ResourceInstance, key: &str) -> Result<String, DeployError> {
    instance
        .get(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| DeployError::InvalidDesiredState(format!("{key} must be a string")))
}

fn integer_attr(instance: &ResourceInstance, key: &str) -> Result<u32, DeployError> {
    instance
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| DeployError::InvalidDesiredState(format!("{key} must be a positive integer")))
}
