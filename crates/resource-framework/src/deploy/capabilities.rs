//! # Cloud Capabilities
//!
//! The narrow collaborator interfaces the deployment steps are written against. Each
//! trait groups one cloud concern; a real provider, or [`MockCloud`](crate::mock::MockCloud)
//! in tests, implements them.
//!
//! Lookups (`get_*`, `find_*`, `describe_*`, `is_propagated`) never mutate remote
//! state. Everything else does.

use super::error::CloudError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSpec {
    pub name: String,
    /// Service principal allowed to assume the role.
    pub trusted_service: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleState {
    pub name: String,
    pub arn: String,
    pub policies: Vec<String>,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn get_role(&self, name: &str) -> Result<Option<RoleState>, CloudError>;
    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleState, CloudError>;
    async fn attach_policy(&self, role: &str, policy: &str) -> Result<(), CloudError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub code_digest: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FunctionStatus {
    Pending,
    Active,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionState {
    pub name: String,
    pub arn: String,
    pub role_arn: String,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub code_digest: String,
    pub environment: BTreeMap<String, String>,
    pub status: FunctionStatus,
}

impl FunctionState {
    /// Describes how the deployed function differs from `spec`, if it does.
    pub fn drift(&self, spec: &FunctionSpec, role_arn: &str) -> Option<String> {
        let mut changed = Vec::new();
        if self.role_arn != role_arn {
            changed.push("role");
        }
        if self.runtime != spec.runtime {
            changed.push("runtime");
        }
        if self.handler != spec.handler {
            changed.push("handler");
        }
        if self.memory_mb != spec.memory_mb {
            changed.push("memory");
        }
        if self.timeout_secs != spec.timeout_secs {
            changed.push("timeout");
        }
        if self.code_digest != spec.code_digest {
            changed.push("code");
        }
        if self.environment != spec.environment {
            changed.push("environment");
        }
        if changed.is_empty() {
            None
        } else {
            Some(format!("{} changed", changed.join(", ")))
        }
    }
}

#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn get_function(&self, name: &str) -> Result<Option<FunctionState>, CloudError>;
    async fn create_function(&self, spec: &FunctionSpec, role_arn: &str) -> Result<FunctionState, CloudError>;
    async fn update_function(&self, spec: &FunctionSpec, role_arn: &str) -> Result<FunctionState, CloudError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordKind {
    Cname,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub name: String,
    pub kind: RecordKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CertificateStatus {
    PendingValidation,
    Issued,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateState {
    pub arn: String,
    pub domain: String,
    pub status: CertificateStatus,
    /// DNS record proving control of the domain.
    pub validation_record: Option<DnsRecord>,
}

#[async_trait]
pub trait CertificateService: Send + Sync {
    /// Most recent usable certificate for `domain`.
    async fn find_certificate(&self, domain: &str) -> Result<Option<CertificateState>, CloudError>;
    async fn request_certificate(&self, domain: &str) -> Result<CertificateState, CloudError>;
    async fn describe_certificate(&self, arn: &str) -> Result<CertificateState, CloudError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiSpec {
    pub name: String,
    pub function_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiState {
    pub id: String,
    pub name: String,
    pub function_arn: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainState {
    pub name: String,
    pub certificate_arn: String,
    /// Hostname the domain's DNS record must point at.
    pub target: String,
    pub api_id: Option<String>,
}

#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn get_api(&self, name: &str) -> Result<Option<ApiState>, CloudError>;
    async fn create_api(&self, spec: &ApiSpec) -> Result<ApiState, CloudError>;
    async fn update_api(&self, id: &str, spec: &ApiSpec) -> Result<ApiState, CloudError>;
    async fn get_domain(&self, name: &str) -> Result<Option<DomainState>, CloudError>;
    async fn create_domain(&self, name: &str, certificate_arn: &str) -> Result<DomainState, CloudError>;
    async fn map_domain(&self, name: &str, api_id: &str) -> Result<DomainState, CloudError>;
    /// Rebinds an existing domain to another certificate.
    async fn update_domain_certificate(&self, name: &str, certificate_arn: &str) -> Result<DomainState, CloudError>;
}

#[async_trait]
pub trait DnsService: Send + Sync {
    async fn get_record(&self, name: &str) -> Result<Option<DnsRecord>, CloudError>;
    async fn upsert_record(&self, record: &DnsRecord) -> Result<(), CloudError>;
    async fn is_propagated(&self, record: &DnsRecord) -> Result<bool, CloudError>;
}

/// The full set of collaborators a deployment needs.
#[derive(Clone)]
pub struct Capabilities {
    pub identity: Arc<dyn IdentityService>,
    pub compute: Arc<dyn ComputeService>,
    pub certificates: Arc<dyn CertificateService>,
    pub routing: Arc<dyn RoutingService>,
    pub dns: Arc<dyn DnsService>,
}

impl Capabilities {
    /// Uses one provider for every concern.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: IdentityService + ComputeService + CertificateService + RoutingService + DnsService + 'static,
    {
        Self {
            identity: provider.clone(),
            compute: provider.clone(),
            certificates: provider.clone(),
            routing: provider.clone(),
            dns: provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> FunctionSpec {
        FunctionSpec {
            name: "acme-greeter".into(),
            runtime: "provided.al2023".into(),
            handler: "bootstrap".into(),
            memory_mb: 128,
            timeout_secs: 30,
            code_digest: "sha256:abc".into(),
            environment: BTreeMap::new(),
        }
    }

    fn state(spec: &FunctionSpec) -> FunctionState {
        FunctionState {
            name: spec.name.clone(),
            arn: "arn:fn".into(),
            role_arn: "arn:role".into(),
            runtime: spec.runtime.clone(),
            handler: spec.handler.clone(),
            memory_mb: spec.memory_mb,
            timeout_secs: spec.timeout_secs,
            code_digest: spec.code_digest.clone(),
            environment: spec.environment.clone(),
            status: FunctionStatus::Active,
        }
    }

    #[test]
    fn matching_function_has_no_drift() {
        let spec = spec();
        assert_eq!(state(&spec).drift(&spec, "arn:role"), None);
    }

    #[test]
    fn drift_lists_every_changed_field() {
        let spec = spec();
        let mut deployed = state(&spec);
        deployed.memory_mb = 256;
        deployed.code_digest = "sha256:old".into();
        assert_eq!(deployed.drift(&spec, "arn:role").as_deref(), Some("memory, code changed"));
        assert!(deployed.drift(&spec, "arn:other").unwrap().starts_with("role"));
    }
}
