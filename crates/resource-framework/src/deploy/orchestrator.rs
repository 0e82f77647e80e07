//! # Orchestrator
//!
//! Runs a [`DeploymentPlan`] against a [`DesiredState`], one step at a time.
//!
//! - **Fail-fast**: the first step that fails ends the run. Later steps are never
//!   attempted and earlier steps are not rolled back.
//! - **Progress**: a [`ProgressReporter`] hears about every completed step and gets
//!   exactly one final success or failure notification per deployment.
//! - **Cancellation**: checked between steps and during waits. A cancelled run stops
//!   after the in-flight call settles.

use super::error::{CloudError, DeployError};
use super::plan::{DeployState, DeploymentPlan, DesiredState, Observed, Outputs, PlanStep, Stage, StepAction};
use super::poll::{poll_until_ready, PollError};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub action: StepAction,
    /// Drift or absence that triggered an apply.
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

/// Outcome of a successful deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployReport {
    pub identity: String,
    pub state: DeployState,
    pub stages: Vec<StageReport>,
    pub outputs: Outputs,
}

impl DeployReport {
    /// True when no step had to change anything.
    pub fn is_noop(&self) -> bool {
        self.stages
            .iter()
            .all(|s| matches!(s.action, StepAction::Unchanged | StepAction::Skipped))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Around hook for deployments.
pub trait ProgressReporter: Send + Sync {
    fn started(&self, _identity: &str) {}

    fn stage_completed(&self, _identity: &str, _report: &StageReport) {}

    /// Called exactly once per deployment, whatever the outcome.
    fn finished(&self, identity: &str, outcome: &Result<DeployReport, DeployError>);
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn started(&self, identity: &str) {
        info!(%identity, "Deployment started");
    }

    fn stage_completed(&self, identity: &str, report: &StageReport) {
        info!(%identity, stage = %report.stage, action = ?report.action, elapsed_ms = report.elapsed_ms, "Step completed");
    }

    fn finished(&self, identity: &str, outcome: &Result<DeployReport, DeployError>) {
        match outcome {
            Ok(report) => info!(%identity, changed = !report.is_noop(), "Deployment succeeded"),
            Err(e) => error!(%identity, error = %e, "Deployment failed"),
        }
    }
}

enum StepFailure {
    Cloud(CloudError),
    Cancelled,
}

pub struct Orchestrator {
    plan: DeploymentPlan,
}

impl Orchestrator {
    pub fn new(plan: DeploymentPlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    /// Runs every step in order, stopping at the first failure.
    pub async fn execute(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<DeployReport, DeployError> {
        let mut state = DeployState::NotStarted;
        let mut outputs = Outputs::default();
        let mut stages = Vec::with_capacity(self.plan.steps().len());
        info!(identity = %desired.identity, state = ?state, steps = ?self.plan.stages(), "Deployment planned");

        for step in self.plan.steps() {
            let stage = step.stage();
            if cancel.is_cancelled() {
                warn!(identity = %desired.identity, %stage, "Deployment cancelled");
                return Err(DeployError::Cancelled(stage));
            }
            state = DeployState::Running(stage);
            info!(identity = %desired.identity, state = ?state, "Entering step");

            match self.run_step(step.as_ref(), desired, &mut outputs, cancel).await {
                Ok(report) => {
                    reporter.stage_completed(&desired.identity, &report);
                    stages.push(report);
                }
                Err(StepFailure::Cloud(source)) => {
                    state = DeployState::Failed {
                        stage,
                        cause: source.to_string(),
                    };
                    error!(identity = %desired.identity, state = ?state, "Step failed; stopping");
                    return Err(DeployError::StepFailed { stage, source });
                }
                Err(StepFailure::Cancelled) => return Err(DeployError::Cancelled(stage)),
            }
        }

        Ok(DeployReport {
            identity: desired.identity.clone(),
            state: DeployState::Done,
            stages,
            outputs,
        })
    }

    async fn run_step(
        &self,
        step: &dyn PlanStep,
        desired: &DesiredState,
        outputs: &mut Outputs,
        cancel: &CancellationToken,
    ) -> Result<StageReport, StepFailure> {
        let started = Instant::now();
        let stage = step.stage();
        let observed = step.check(desired, outputs).await.map_err(StepFailure::Cloud)?;
        let (action, reason) = match &observed {
            Observed::NotApplicable => (StepAction::Skipped, None),
            Observed::UpToDate => (StepAction::Unchanged, None),
            Observed::Missing | Observed::Drifted(_) => {
                let reason = match &observed {
                    Observed::Drifted(why) => why.clone(),
                    _ => "missing".to_string(),
                };
                info!(%stage, %reason, "Converging");
                let action = step
                    .apply(&observed, desired, outputs)
                    .await
                    .map_err(StepFailure::Cloud)?;
                (action, Some(reason))
            }
        };

        if action != StepAction::Skipped {
            if let Some(wait) = step.wait() {
                let snapshot = outputs.clone();
                poll_until_ready(stage.name(), wait, cancel, || step.poll(desired, &snapshot))
                    .await
                    .map_err(|e| match e {
                        PollError::Cloud(e) => StepFailure::Cloud(e),
                        PollError::Cancelled => StepFailure::Cancelled,
                    })?;
            }
        }

        Ok(StageReport {
            stage,
            action,
            reason,
            elapsed_ms: duration_ms(started.elapsed()),
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
