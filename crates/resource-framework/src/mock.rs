//! # Mock Cloud & Testing Guide
//!
//! [`MockCloud`] implements every capability trait in memory. It keeps enough state to
//! behave like a real provider (resources exist after they are created, certificates
//! need their validation record before they issue, DNS takes a while to propagate)
//! and records every call so tests can assert what a deployment actually did.
//!
//! ## When to use MockCloud vs a scripted step
//!
//! | Feature | MockCloud | Hand-written `PlanStep` |
//! |---------|-----------|-------------------------|
//! | **State** | Real convergence, so re-runs are observable | None |
//! | **Idempotence checks** | `mutations()` after a second run | Not applicable |
//! | **Error Injection** | `inject` / `inject_always` per operation | Whatever the step returns |
//! | **Use Case** | Orchestrator and session behaviour | Plan ordering edge cases |
//!
//! ## Testing Failure Scenarios
//!
//! ```rust
//! use resource_framework::deploy::CloudError;
//! use resource_framework::mock::{MockCloud, ops};
//!
//! let cloud = MockCloud::new();
//! // The next certificate request is refused by the provider
//! cloud.inject(ops::REQUEST_CERTIFICATE, CloudError::Service("limit exceeded".into()));
//! // Every role lookup is throttled
//! cloud.inject_always(ops::GET_ROLE, CloudError::Throttled("slow down".into()));
//! assert!(cloud.calls().is_empty());
//! ```

use crate::deploy::capabilities::{
    ApiSpec, ApiState, CertificateService, CertificateState, CertificateStatus, ComputeService, DnsRecord,
    DnsService, DomainState, FunctionSpec, FunctionState, FunctionStatus, IdentityService, RecordKind, RoleSpec,
    RoleState, RoutingService,
};
use crate::deploy::CloudError;
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};

/// Operation names used for call recording and failure injection.
pub mod ops {
    pub const GET_ROLE: &str = "identity.get_role";
    pub const CREATE_ROLE: &str = "identity.create_role";
    pub const ATTACH_POLICY: &str = "identity.attach_policy";
    pub const GET_FUNCTION: &str = "compute.get_function";
    pub const CREATE_FUNCTION: &str = "compute.create_function";
    pub const UPDATE_FUNCTION: &str = "compute.update_function";
    pub const FIND_CERTIFICATE: &str = "certificates.find_certificate";
    pub const REQUEST_CERTIFICATE: &str = "certificates.request_certificate";
    pub const DESCRIBE_CERTIFICATE: &str = "certificates.describe_certificate";
    pub const GET_API: &str = "routing.get_api";
    pub const CREATE_API: &str = "routing.create_api";
    pub const UPDATE_API: &str = "routing.update_api";
    pub const GET_DOMAIN: &str = "routing.get_domain";
    pub const CREATE_DOMAIN: &str = "routing.create_domain";
    pub const MAP_DOMAIN: &str = "routing.map_domain";
    pub const UPDATE_DOMAIN_CERTIFICATE: &str = "routing.update_domain_certificate";
    pub const GET_RECORD: &str = "dns.get_record";
    pub const UPSERT_RECORD: &str = "dns.upsert_record";
    pub const IS_PROPAGATED: &str = "dns.is_propagated";

    pub const MUTATING: [&str; 11] = [
        CREATE_ROLE,
        ATTACH_POLICY,
        CREATE_FUNCTION,
        UPDATE_FUNCTION,
        REQUEST_CERTIFICATE,
        CREATE_API,
        UPDATE_API,
        CREATE_DOMAIN,
        MAP_DOMAIN,
        UPDATE_DOMAIN_CERTIFICATE,
        UPSERT_RECORD,
    ];
}

/// How many readiness checks each kind of resource stays pending for.
#[derive(Debug, Clone, Copy)]
pub struct MockLatency {
    pub function_polls: u32,
    pub certificate_polls: u32,
    pub dns_polls: u32,
}

impl Default for MockLatency {
    fn default() -> Self {
        Self {
            function_polls: 1,
            certificate_polls: 2,
            dns_polls: 1,
        }
    }
}

#[derive(Default)]
struct MockState {
    roles: HashMap<String, RoleState>,
    functions: HashMap<String, (FunctionState, u32)>,
    certificates: Vec<(CertificateState, u32)>,
    apis: HashMap<String, ApiState>,
    domains: HashMap<String, DomainState>,
    records: HashMap<String, (DnsRecord, u32)>,
    calls: Vec<String>,
    injected: HashMap<String, VecDeque<CloudError>>,
    always: HashMap<String, CloudError>,
    seq: u32,
}

impl MockState {
    fn next_id(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Default)]
pub struct MockCloud {
    state: Mutex<MockState>,
    latency: MockLatency,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: MockLatency) -> Self {
        Self {
            state: Mutex::default(),
            latency,
        }
    }

    /// Fails the next call to `operation` with `error`. Queued errors are used in order.
    pub fn inject(&self, operation: &str, error: CloudError) {
        self.state
            .lock()
            .injected
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fails every call to `operation` with `error`.
    pub fn inject_always(&self, operation: &str, error: CloudError) {
        self.state.lock().always.insert(operation.to_string(), error);
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Recorded calls that change remote state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| ops::MUTATING.contains(&c.as_str()))
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Verifies that every injected one-shot failure was consumed.
    pub fn verify(&self) {
        let state = self.state.lock();
        let pending: Vec<&String> = state
            .injected
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(op, _)| op)
            .collect();
        assert!(pending.is_empty(), "Unconsumed injected failures: {pending:?}");
    }

    /// Changes a deployed function behind the orchestrator's back.
    pub fn tamper_function(&self, name: &str, change: impl FnOnce(&mut FunctionState)) {
        if let Some((function, _)) = self.state.lock().functions.get_mut(name) {
            change(function);
        }
    }

    pub fn delete_record(&self, name: &str) {
        self.state.lock().records.remove(name);
    }

    /// Marks the newest certificate for `domain` as failed, as a revocation would.
    pub fn revoke_certificate(&self, domain: &str, reason: &str) {
        let mut state = self.state.lock();
        if let Some((certificate, _)) = state.certificates.iter_mut().rev().find(|(c, _)| c.domain == domain) {
            certificate.status = CertificateStatus::Failed(reason.to_string());
        }
    }

    pub fn domain(&self, name: &str) -> Option<DomainState> {
        self.state.lock().domains.get(name).cloned()
    }

    pub fn function(&self, name: &str) -> Option<FunctionState> {
        self.state.lock().functions.get(name).map(|(f, _)| f.clone())
    }

    pub fn record(&self, name: &str) -> Option<DnsRecord> {
        self.state.lock().records.get(name).map(|(r, _)| r.clone())
    }

    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, MockState>, CloudError> {
        let mut state = self.state.lock();
        state.calls.push(operation.to_string());
        if let Some(error) = state.injected.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some(error) = state.always.get(operation) {
            return Err(error.clone());
        }
        Ok(state)
    }
}

#[async_trait]
impl IdentityService for MockCloud {
    async fn get_role(&self, name: &str) -> Result<Option<RoleState>, CloudError> {
        let state = self.enter(ops::GET_ROLE)?;
        Ok(state.roles.get(name).cloned())
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleState, CloudError> {
        let mut state = self.enter(ops::CREATE_ROLE)?;
        if state.roles.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(format!("role {}", spec.name)));
        }
        let role = RoleState {
            name: spec.name.clone(),
            arn: format!("arn:aws:iam::000000000000:role/{}", spec.name),
            policies: Vec::new(),
        };
        state.roles.insert(spec.name.clone(), role.clone());
        Ok(role)
    }

    async fn attach_policy(&self, role: &str, policy: &str) -> Result<(), CloudError> {
        let mut state = self.enter(ops::ATTACH_POLICY)?;
        let role = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::NotFound(format!("role {role}")))?;
        if !role.policies.iter().any(|p| p == policy) {
            role.policies.push(policy.to_string());
        }
        Ok(())
    }
}

fn function_state(spec: &FunctionSpec, role_arn: &str) -> FunctionState {
    FunctionState {
        name: spec.name.clone(),
        arn: format!("arn:aws:lambda:us-east-1:000000000000:function:{}", spec.name),
        role_arn: role_arn.to_string(),
        runtime: spec.runtime.clone(),
        handler: spec.handler.clone(),
        memory_mb: spec.memory_mb,
        timeout_secs: spec.timeout_secs,
        code_digest: spec.code_digest.clone(),
        environment: spec.environment.clone(),
        status: FunctionStatus::Pending,
    }
}

#[async_trait]
impl ComputeService for MockCloud {
    async fn get_function(&self, name: &str) -> Result<Option<FunctionState>, CloudError> {
        let mut state = self.enter(ops::GET_FUNCTION)?;
        let Some((function, pending)) = state.functions.get_mut(name) else {
            return Ok(None);
        };
        if function.status == FunctionStatus::Pending {
            if *pending > 0 {
                *pending -= 1;
            } else {
                function.status = FunctionStatus::Active;
            }
        }
        Ok(Some(function.clone()))
    }

    async fn create_function(&self, spec: &FunctionSpec, role_arn: &str) -> Result<FunctionState, CloudError> {
        let mut state = self.enter(ops::CREATE_FUNCTION)?;
        if state.functions.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(format!("function {}", spec.name)));
        }
        let function = function_state(spec, role_arn);
        state
            .functions
            .insert(spec.name.clone(), (function.clone(), self.latency.function_polls));
        Ok(function)
    }

    async fn update_function(&self, spec: &FunctionSpec, role_arn: &str) -> Result<FunctionState, CloudError> {
        let mut state = self.enter(ops::UPDATE_FUNCTION)?;
        if !state.functions.contains_key(&spec.name) {
            return Err(CloudError::NotFound(format!("function {}", spec.name)));
        }
        let function = function_state(spec, role_arn);
        state
            .functions
            .insert(spec.name.clone(), (function.clone(), self.latency.function_polls));
        Ok(function)
    }
}

#[async_trait]
impl CertificateService for MockCloud {
    async fn find_certificate(&self, domain: &str) -> Result<Option<CertificateState>, CloudError> {
        let state = self.enter(ops::FIND_CERTIFICATE)?;
        Ok(state
            .certificates
            .iter()
            .rev()
            .find(|(c, _)| c.domain == domain)
            .map(|(c, _)| c.clone()))
    }

    async fn request_certificate(&self, domain: &str) -> Result<CertificateState, CloudError> {
        let mut state = self.enter(ops::REQUEST_CERTIFICATE)?;
        let id = state.next_id();
        let certificate = CertificateState {
            arn: format!("arn:aws:acm:us-east-1:000000000000:certificate/{id:08}"),
            domain: domain.to_string(),
            status: CertificateStatus::PendingValidation,
            validation_record: Some(DnsRecord {
                name: format!("_validation.{domain}"),
                kind: RecordKind::Cname,
                value: format!("{id:08}.validations.example.net"),
            }),
        };
        state
            .certificates
            .push((certificate.clone(), self.latency.certificate_polls));
        Ok(certificate)
    }

    async fn describe_certificate(&self, arn: &str) -> Result<CertificateState, CloudError> {
        let mut state = self.enter(ops::DESCRIBE_CERTIFICATE)?;
        let index = state
            .certificates
            .iter()
            .position(|(c, _)| c.arn == arn)
            .ok_or_else(|| CloudError::NotFound(format!("certificate {arn}")))?;
        let validated = {
            let (certificate, _) = &state.certificates[index];
            match &certificate.validation_record {
                Some(record) => state.records.get(&record.name).map(|(r, _)| r) == Some(record),
                None => true,
            }
        };
        let (certificate, pending) = &mut state.certificates[index];
        if certificate.status == CertificateStatus::PendingValidation && validated {
            if *pending > 0 {
                *pending -= 1;
            } else {
                certificate.status = CertificateStatus::Issued;
            }
        }
        Ok(certificate.clone())
    }
}

#[async_trait]
impl RoutingService for MockCloud {
    async fn get_api(&self, name: &str) -> Result<Option<ApiState>, CloudError> {
        let state = self.enter(ops::GET_API)?;
        Ok(state.apis.get(name).cloned())
    }

    async fn create_api(&self, spec: &ApiSpec) -> Result<ApiState, CloudError> {
        let mut state = self.enter(ops::CREATE_API)?;
        if state.apis.contains_key(&spec.name) {
            return Err(CloudError::AlreadyExists(format!("API {}", spec.name)));
        }
        let id = format!("api{:06}", state.next_id());
        let api = ApiState {
            endpoint: format!("https://{id}.execute-api.us-east-1.example.com"),
            id,
            name: spec.name.clone(),
            function_arn: spec.function_arn.clone(),
        };
        state.apis.insert(spec.name.clone(), api.clone());
        Ok(api)
    }

    async fn update_api(&self, id: &str, spec: &ApiSpec) -> Result<ApiState, CloudError> {
        let mut state = self.enter(ops::UPDATE_API)?;
        let api = state
            .apis
            .values_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| CloudError::NotFound(format!("API {id}")))?;
        api.function_arn = spec.function_arn.clone();
        Ok(api.clone())
    }

    async fn get_domain(&self, name: &str) -> Result<Option<DomainState>, CloudError> {
        let state = self.enter(ops::GET_DOMAIN)?;
        Ok(state.domains.get(name).cloned())
    }

    async fn create_domain(&self, name: &str, certificate_arn: &str) -> Result<DomainState, CloudError> {
        let mut state = self.enter(ops::CREATE_DOMAIN)?;
        if state.domains.contains_key(name) {
            return Err(CloudError::AlreadyExists(format!("domain {name}")));
        }
        ensure_issued(&state, certificate_arn)?;
        let id = state.next_id();
        let domain = DomainState {
            name: name.to_string(),
            certificate_arn: certificate_arn.to_string(),
            target: format!("d-{id:06}.execute-api.us-east-1.example.com"),
            api_id: None,
        };
        state.domains.insert(name.to_string(), domain.clone());
        Ok(domain)
    }

    async fn map_domain(&self, name: &str, api_id: &str) -> Result<DomainState, CloudError> {
        let mut state = self.enter(ops::MAP_DOMAIN)?;
        let domain = state
            .domains
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("domain {name}")))?;
        domain.api_id = Some(api_id.to_string());
        Ok(domain.clone())
    }

    async fn update_domain_certificate(&self, name: &str, certificate_arn: &str) -> Result<DomainState, CloudError> {
        let mut state = self.enter(ops::UPDATE_DOMAIN_CERTIFICATE)?;
        ensure_issued(&state, certificate_arn)?;
        let domain = state
            .domains
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("domain {name}")))?;
        domain.certificate_arn = certificate_arn.to_string();
        Ok(domain.clone())
    }
}

fn ensure_issued(state: &MockState, certificate_arn: &str) -> Result<(), CloudError> {
    let issued = state
        .certificates
        .iter()
        .any(|(c, _)| c.arn == certificate_arn && c.status == CertificateStatus::Issued);
    if issued {
        Ok(())
    } else {
        Err(CloudError::Service(format!("certificate {certificate_arn} is not issued")))
    }
}

#[async_trait]
impl DnsService for MockCloud {
    async fn get_record(&self, name: &str) -> Result<Option<DnsRecord>, CloudError> {
        let state = self.enter(ops::GET_RECORD)?;
        Ok(state.records.get(name).map(|(r, _)| r.clone()))
    }

    async fn upsert_record(&self, record: &DnsRecord) -> Result<(), CloudError> {
        let mut state = self.enter(ops::UPSERT_RECORD)?;
        state
            .records
            .insert(record.name.clone(), (record.clone(), self.latency.dns_polls));
        Ok(())
    }

    async fn is_propagated(&self, record: &DnsRecord) -> Result<bool, CloudError> {
        let mut state = self.enter(ops::IS_PROPAGATED)?;
        match state.records.get_mut(&record.name) {
            Some((current, pending)) if current == record => {
                if *pending > 0 {
                    *pending -= 1;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            _ => Ok(false),
        }
    }
}
