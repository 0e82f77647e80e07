//! # Deployment Plan
//!
//! A deployment is a fixed, ordered list of [`PlanStep`]s. Each step owns one piece of
//! cloud infrastructure and follows the same cycle:
//!
//! 1. **check**: look the resource up and compare it with the desired state;
//! 2. **apply**: create it when missing, update it when drifted, do nothing otherwise;
//! 3. **wait**: poll until the cloud reports it ready, when the step has a wait.
//!
//! Steps pass what later steps need (ARNs, ids, hostnames) through [`Outputs`].
//!
//! ## State machine
//!
//! ```text
//! NotStarted -> EnsureRole -> EnsureCompute -> EnsureCertificate
//!            -> ConfigureRouting -> ConfigureDomain -> Done
//! ```
//!
//! Any step may end in `Failed(step, cause)`. There are no back-edges.

use super::capabilities::{FunctionSpec, RoleSpec};
use super::error::CloudError;
use super::poll::{PollConfig, PollOutcome};
use crate::error::FrameworkError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    EnsureRole,
    EnsureCompute,
    EnsureCertificate,
    ConfigureRouting,
    ConfigureDomain,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::EnsureRole,
        Stage::EnsureCompute,
        Stage::EnsureCertificate,
        Stage::ConfigureRouting,
        Stage::ConfigureDomain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::EnsureRole => "EnsureRole",
            Stage::EnsureCompute => "EnsureCompute",
            Stage::EnsureCertificate => "EnsureCertificate",
            Stage::ConfigureRouting => "ConfigureRouting",
            Stage::ConfigureDomain => "ConfigureDomain",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeployState {
    NotStarted,
    Running(Stage),
    Done,
    Failed { stage: Stage, cause: String },
}

impl DeployState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Done | DeployState::Failed { .. })
    }
}

/// What a step found when it looked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    UpToDate,
    Missing,
    Drifted(String),
    /// The desired state does not ask for this piece.
    NotApplicable,
}

/// What a step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepAction {
    Unchanged,
    Created,
    Updated,
    Skipped,
}

/// Values produced by earlier steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub role_arn: Option<String>,
    pub function_arn: Option<String>,
    pub certificate_arn: Option<String>,
    pub api_id: Option<String>,
    pub api_endpoint: Option<String>,
    pub domain_target: Option<String>,
}

impl Outputs {
    pub(crate) fn require<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, CloudError> {
        value
            .as_deref()
            .ok_or_else(|| CloudError::Service(format!("{what} is not available yet")))
    }
}

/// Everything a deployment should converge to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    /// Deployment identity; at most one deployment per identity runs at a time.
    pub identity: String,
    pub role: RoleSpec,
    pub function: FunctionSpec,
    pub api_name: String,
    pub domain: Option<String>,
}

/// One infrastructure concern of a deployment.
#[async_trait]
pub trait PlanStep: Send + Sync {
    fn stage(&self) -> Stage;

    /// Looks the resource up. Never mutates remote state.
    async fn check(&self, desired: &DesiredState, outputs: &mut Outputs) -> Result<Observed, CloudError>;

    /// Converges a missing or drifted resource.
    async fn apply(
        &self,
        observed: &Observed,
        desired: &DesiredState,
        outputs: &mut Outputs,
    ) -> Result<StepAction, CloudError>;

    /// How long to wait for readiness after `apply`, if at all.
    fn wait(&self) -> Option<&PollConfig> {
        None
    }

    async fn poll(&self, _desired: &DesiredState, _outputs: &Outputs) -> Result<PollOutcome, CloudError> {
        Ok(PollOutcome::Ready)
    }
}

/// The ordered steps of a deployment.
pub struct DeploymentPlan {
    steps: Vec<Arc<dyn PlanStep>>,
}

impl DeploymentPlan {
    /// Builds a plan. Steps must follow the stage order without repeats.
    pub fn new(steps: Vec<Arc<dyn PlanStep>>) -> Result<Self, FrameworkError> {
        for pair in steps.windows(2) {
            if pair[0].stage() >= pair[1].stage() {
                return Err(FrameworkError::configuration(format!(
                    "{} cannot run after {}",
                    pair[1].stage(),
                    pair[0].stage()
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Arc<dyn PlanStep>] {
        &self.steps
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.steps.iter().map(|s| s.stage()).collect()
    }
}
