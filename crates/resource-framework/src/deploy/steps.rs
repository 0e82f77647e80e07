//! The five standard deployment steps.
//!
//! Every step is an idempotent ensure: a second run against converged infrastructure
//! only performs lookups. Creates that race with an existing resource fall back to
//! an update.

use super::capabilities::{
    ApiSpec, Capabilities, CertificateService, CertificateStatus, ComputeService, DnsRecord, DnsService,
    FunctionStatus, IdentityService, RecordKind, RoutingService,
};
use super::error::CloudError;
use super::plan::{DesiredState, Observed, Outputs, PlanStep, Stage, StepAction};
use super::poll::{retry_transient, PollConfig, PollOutcome, RetryPolicy};
use crate::config::DeployConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// The standard five steps, wired to `capabilities`.
pub fn standard_steps(capabilities: &Capabilities, config: &DeployConfig) -> Vec<Arc<dyn PlanStep>> {
    vec![
        Arc::new(EnsureRole {
            identity: capabilities.identity.clone(),
            retry: config.retry.clone(),
        }),
        Arc::new(EnsureCompute {
            compute: capabilities.compute.clone(),
            retry: config.retry.clone(),
            wait: config.compute_wait.clone(),
        }),
        Arc::new(EnsureCertificate {
            certificates: capabilities.certificates.clone(),
            dns: capabilities.dns.clone(),
            retry: config.retry.clone(),
            wait: config.certificate_wait.clone(),
        }),
        Arc::new(ConfigureRouting {
            routing: capabilities.routing.clone(),
            retry: config.retry.clone(),
        }),
        Arc::new(ConfigureDomain {
            routing: capabilities.routing.clone(),
            dns: capabilities.dns.clone(),
            retry: config.retry.clone(),
            wait: config.dns_wait.clone(),
        }),
    ]
}

pub struct EnsureRole {
    identity: Arc<dyn IdentityService>,
    retry: RetryPolicy,
}

#[async_trait]
impl PlanStep for EnsureRole {
    fn stage(&self) -> Stage {
        Stage::EnsureRole
    }

    async fn check(&self, desired: &DesiredState, outputs: &mut Outputs) -> Result<Observed, CloudError> {
        let name = desired.role.name.as_str();
        let Some(role) = retry_transient(&self.retry, "get_role", || self.identity.get_role(name)).await? else {
            return Ok(Observed::Missing);
        };
        outputs.role_arn = Some(role.arn.clone());
        let missing: Vec<&str> = desired
            .role
            .policies
            .iter()
            .filter(|p| !role.policies.contains(p))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(Observed::UpToDate)
        } else {
            Ok(Observed::Drifted(format!("missing policies {}", missing.join(", "))))
        }
    }

    async fn apply(
        &self,
        observed: &Observed,
        desired: &DesiredState,
        outputs: &mut Outputs,
    ) -> Result<StepAction, CloudError> {
        let spec = &desired.role;
        let (role, action) = match observed {
            Observed::Missing => {
                match retry_transient(&self.retry, "create_role", || self.identity.create_role(spec)).await {
                    Ok(role) => (role, StepAction::Created),
                    Err(CloudError::AlreadyExists(_)) => {
                        let role = retry_transient(&self.retry, "get_role", || self.identity.get_role(&spec.name))
                            .await?
                            .ok_or_else(|| CloudError::NotFound(format!("role {}", spec.name)))?;
                        (role, StepAction::Updated)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {
                let role = retry_transient(&self.retry, "get_role", || self.identity.get_role(&spec.name))
                    .await?
                    .ok_or_else(|| CloudError::NotFound(format!("role {}", spec.name)))?;
                (role, StepAction::Updated)
            }
        };
        for policy in spec.policies.iter().filter(|p| !role.policies.contains(p)) {
            retry_transient(&self.retry, "attach_policy", || self.identity.attach_policy(&spec.name, policy)).await?;
        }
        outputs.role_arn = Some(role.arn);
        Ok(action)
    }
}

pub struct EnsureCompute {
    compute: Arc<dyn ComputeService>,
    retry: RetryPolicy,
    wait: PollConfig,
}

#[async_trait]
impl PlanStep for EnsureCompute {
    fn stage(&self) -> Stage {
        Stage::EnsureCompute
    }

    async fn check(&self, desired: &DesiredState, outputs: &mut Outputs) -> Result<Observed, CloudError> {
        let role_arn = Outputs::require(&outputs.role_arn, "role ARN")?.to_string();
        let name = desired.function.name.as_str();
        let Some(function) = retry_transient(&self.retry, "get_function", || self.compute.get_function(name)).await?
        else {
            return Ok(Observed::Missing);
        };
        outputs.function_arn = Some(function.arn.clone());
        if let FunctionStatus::Failed(reason) = &function.status {
            return Ok(Observed::Drifted(format!("function is failed: {reason}")));
        }
        Ok(match function.drift(&desired.function, &role_arn) {
            Some(reason) => Observed::Drifted(reason),
            None => Observed::UpToDate,
        })
    }

    async fn apply(
        &self,
        observed: &Observed,
        desired: &DesiredState,
        outputs: &mut Outputs,
    ) -> Result<StepAction, CloudError> {
        let role_arn = Outputs::require(&outputs.role_arn, "role ARN")?.to_string();
        let spec = &desired.function;
        let update = || self.compute.update_function(spec, &role_arn);
        let (function, action) = match observed {
            Observed::Missing => {
                match retry_transient(&self.retry, "create_function", || self.compute.create_function(spec, &role_arn))
                    .await
                {
                    Ok(function) => (function, StepAction::Created),
                    Err(CloudError::AlreadyExists(_)) => {
                        (retry_transient(&self.retry, "update_function", update).await?, StepAction::Updated)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => (retry_transient(&self.retry, "update_function", update).await?, StepAction::Updated),
        };
        outputs.function_arn = Some(function.arn);
        Ok(action)
    }

    fn wait(&self) -> Option<&PollConfig> {
        Some(&self.wait)
    }

    async fn poll(&self, desired: &DesiredState, _outputs: &Outputs) -> Result<PollOutcome, CloudError> {
        Ok(match self.compute.get_function(&desired.function.name).await? {
            None => PollOutcome::NotReadyYet("function not visible yet".into()),
            Some(function) => match function.status {
                FunctionStatus::Active => PollOutcome::Ready,
                FunctionStatus::Pending => PollOutcome::NotReadyYet("function pending".into()),
                FunctionStatus::Failed(reason) => PollOutcome::Failed(reason),
            },
        })
    }
}

pub struct EnsureCertificate {
    certificates: Arc<dyn CertificateService>,
    dns: Arc<dyn DnsService>,
    retry: RetryPolicy,
    wait: PollConfig,
}

impl EnsureCertificate {
    async fn record_in_place(&self, record: &DnsRecord) -> Result<bool, CloudError> {
        let current = retry_transient(&self.retry, "get_record", || self.dns.get_record(&record.name)).await?;
        Ok(current.as_ref() == Some(record))
    }
}

#[async_trait]
impl PlanStep for EnsureCertificate {
    fn stage(&self) -> Stage {
        Stage::EnsureCertificate
    }

    async fn check(&self, desired: &DesiredState, outputs: &mut Outputs) -> Result<Observed, CloudError> {
        let Some(domain) = desired.domain.as_deref() else {
            return Ok(Observed::NotApplicable);
        };
        let Some(certificate) =
            retry_transient(&self.retry, "find_certificate", || self.certificates.find_certificate(domain)).await?
        else {
            return Ok(Observed::Missing);
        };
        outputs.certificate_arn = Some(certificate.arn.clone());
        match (&certificate.status, &certificate.validation_record) {
            (CertificateStatus::Issued, _) => Ok(Observed::UpToDate),
            (CertificateStatus::Failed(reason), _) => Ok(Observed::Drifted(format!("certificate failed: {reason}"))),
            (CertificateStatus::PendingValidation, Some(record)) => {
                if self.record_in_place(record).await? {
                    Ok(Observed::UpToDate)
                } else {
                    Ok(Observed::Drifted("validation record missing".into()))
                }
            }
            (CertificateStatus::PendingValidation, None) => Ok(Observed::UpToDate),
        }
    }

    async fn apply(
        &self,
        _observed: &Observed,
        desired: &DesiredState,
        outputs: &mut Outputs,
    ) -> Result<StepAction, CloudError> {
        let Some(domain) = desired.domain.as_deref() else {
            return Ok(StepAction::Skipped);
        };
        let existing =
            retry_transient(&self.retry, "find_certificate", || self.certificates.find_certificate(domain)).await?;
        let (certificate, mut action) = match existing {
            Some(c) if !matches!(c.status, CertificateStatus::Failed(_)) => (c, StepAction::Unchanged),
            _ => {
                let requested = retry_transient(&self.retry, "request_certificate", || {
                    self.certificates.request_certificate(domain)
                })
                .await?;
                (requested, StepAction::Created)
            }
        };
        if let Some(record) = &certificate.validation_record {
            if !self.record_in_place(record).await? {
                retry_transient(&self.retry, "upsert_record", || self.dns.upsert_record(record)).await?;
                if action == StepAction::Unchanged {
                    action = StepAction::Updated;
                }
            }
        }
        outputs.certificate_arn = Some(certificate.arn);
        Ok(action)
    }

    fn wait(&self) -> Option<&PollConfig> {
        Some(&self.wait)
    }

    async fn poll(&self, _desired: &DesiredState, outputs: &Outputs) -> Result<PollOutcome, CloudError> {
        let Some(arn) = outputs.certificate_arn.as_deref() else {
            return Ok(PollOutcome::Ready);
        };
        Ok(match self.certificates.describe_certificate(arn).await?.status {
            CertificateStatus::Issued => PollOutcome::Ready,
            CertificateStatus::PendingValidation => PollOutcome::NotReadyYet("certificate pending validation".into()),
            CertificateStatus::Failed(reason) => PollOutcome::Failed(reason),
        })
    }
}

pub struct ConfigureRouting {
    routing: Arc<dyn RoutingService>,
    retry: RetryPolicy,
}

#[async_trait]
impl PlanStep for ConfigureRouting {
    fn stage(&self) -> Stage {
        Stage::ConfigureRouting
    }

    async fn check(&self, desired: &DesiredState, outputs: &mut Outputs) -> Result<Observed, CloudError> {
        let function_arn = Outputs::require(&outputs.function_arn, "function ARN")?.to_string();
        let name = desired.api_name.as_str();
        let Some(api) = retry_transient(&self.retry, "get_api", || self.routing.get_api(name)).await? else {
            return Ok(Observed::Missing);
        };
        outputs.api_id = Some(api.id.clone());
        outputs.api_endpoint = Some(api.endpoint.clone());
        if api.function_arn == function_arn {
            Ok(Observed::UpToDate)
        } else {
            Ok(Observed::Drifted("API routes to a different function".into()))
        }
    }

    async fn apply(
        &self,
        observed: &Observed,
        desired: &DesiredState,
        outputs: &mut Outputs,
    ) -> Result<StepAction, CloudError> {
        let spec = ApiSpec {
            name: desired.api_name.clone(),
            function_arn: Outputs::require(&outputs.function_arn, "function ARN")?.to_string(),
        };
        let created = match observed {
            Observed::Missing => match retry_transient(&self.retry, "create_api", || self.routing.create_api(&spec)).await {
                Ok(api) => Some(api),
                Err(CloudError::AlreadyExists(_)) => None,
                Err(e) => return Err(e),
            },
            _ => None,
        };
        let (api, action) = match created {
            Some(api) => (api, StepAction::Created),
            None => {
                let existing = retry_transient(&self.retry, "get_api", || self.routing.get_api(&spec.name))
                    .await?
                    .ok_or_else(|| CloudError::NotFound(format!("API {}", spec.name)))?;
                let updated =
                    retry_transient(&self.retry, "update_api", || self.routing.update_api(&existing.id, &spec)).await?;
                (updated, StepAction::Updated)
            }
        };
        outputs.api_id = Some(api.id);
        outputs.api_endpoint = Some(api.endpoint);
        Ok(action)
    }
}

pub struct ConfigureDomain {
    routing: Arc<dyn RoutingService>,
    dns: Arc<dyn DnsService>,
    retry: RetryPolicy,
    wait: PollConfig,
}

impl ConfigureDomain {
    fn alias(domain: &str, target: &str) -> DnsRecord {
        DnsRecord {
            name: domain.to_string(),
            kind: RecordKind::Cname,
            value: target.to_string(),
        }
    }
}

#[async_trait]
impl PlanStep for ConfigureDomain {
    fn stage(&self) -> Stage {
        Stage::ConfigureDomain
    }

    async fn check(&self, desired: &DesiredState, outputs: &mut Outputs) -> Result<Observed, CloudError> {
        let Some(domain) = desired.domain.as_deref() else {
            return Ok(Observed::NotApplicable);
        };
        let api_id = Outputs::require(&outputs.api_id, "API id")?.to_string();
        let Some(state) = retry_transient(&self.retry, "get_domain", || self.routing.get_domain(domain)).await? else {
            return Ok(Observed::Missing);
        };
        outputs.domain_target = Some(state.target.clone());
        if state.api_id.as_deref() != Some(api_id.as_str()) {
            return Ok(Observed::Drifted("domain is not mapped to the API".into()));
        }
        if let Some(certificate_arn) = outputs.certificate_arn.as_deref() {
            if state.certificate_arn != certificate_arn {
                return Ok(Observed::Drifted("domain serves a replaced certificate".into()));
            }
        }
        let alias = Self::alias(domain, &state.target);
        let record = retry_transient(&self.retry, "get_record", || self.dns.get_record(domain)).await?;
        if record.as_ref() == Some(&alias) {
            Ok(Observed::UpToDate)
        } else {
            Ok(Observed::Drifted("alias record missing".into()))
        }
    }

    async fn apply(
        &self,
        observed: &Observed,
        desired: &DesiredState,
        outputs: &mut Outputs,
    ) -> Result<StepAction, CloudError> {
        let Some(domain) = desired.domain.as_deref() else {
            return Ok(StepAction::Skipped);
        };
        let api_id = Outputs::require(&outputs.api_id, "API id")?.to_string();
        let certificate_arn = Outputs::require(&outputs.certificate_arn, "certificate ARN")?.to_string();

        let mut action = StepAction::Updated;
        let mut state = match observed {
            Observed::Missing => {
                match retry_transient(&self.retry, "create_domain", || {
                    self.routing.create_domain(domain, &certificate_arn)
                })
                .await
                {
                    Ok(state) => {
                        action = StepAction::Created;
                        Some(state)
                    }
                    Err(CloudError::AlreadyExists(_)) => None,
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };
        if state.is_none() {
            state = retry_transient(&self.retry, "get_domain", || self.routing.get_domain(domain)).await?;
        }
        let mut state = state.ok_or_else(|| CloudError::NotFound(format!("domain {domain}")))?;
        if state.certificate_arn != certificate_arn {
            info!(%domain, from = %state.certificate_arn, to = %certificate_arn, "Rebinding domain certificate");
            state = retry_transient(&self.retry, "update_domain_certificate", || {
                self.routing.update_domain_certificate(domain, &certificate_arn)
            })
            .await?;
        }
        if state.api_id.as_deref() != Some(api_id.as_str()) {
            state = retry_transient(&self.retry, "map_domain", || self.routing.map_domain(domain, &api_id)).await?;
        }
        let alias = Self::alias(domain, &state.target);
        let record = retry_transient(&self.retry, "get_record", || self.dns.get_record(domain)).await?;
        if record.as_ref() != Some(&alias) {
            retry_transient(&self.retry, "upsert_record", || self.dns.upsert_record(&alias)).await?;
        }
        info!(%domain, target = %state.target, "Domain routed");
        outputs.domain_target = Some(state.target);
        Ok(action)
    }

    fn wait(&self) -> Option<&PollConfig> {
        Some(&self.wait)
    }

    async fn poll(&self, desired: &DesiredState, outputs: &Outputs) -> Result<PollOutcome, CloudError> {
        let (Some(domain), Some(target)) = (desired.domain.as_deref(), outputs.domain_target.as_deref()) else {
            return Ok(PollOutcome::Ready);
        };
        if self.dns.is_propagated(&Self::alias(domain, target)).await? {
            Ok(PollOutcome::Ready)
        } else {
            Ok(PollOutcome::NotReadyYet("alias record propagating".into()))
        }
    }
}
