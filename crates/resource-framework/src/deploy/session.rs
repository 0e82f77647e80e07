//! # Deploy Session
//!
//! A [`DeploySession`] bundles everything a deployment needs: the cloud capabilities,
//! the deploy configuration, the progress reporter and the single-flight coordinator.
//! Any state that outlives one deployment lives here and nowhere else, so two
//! sessions never share caches or in-flight bookkeeping.

use super::capabilities::Capabilities;
use super::error::DeployError;
use super::orchestrator::{DeployReport, Orchestrator, ProgressReporter, StageReport, TracingReporter};
use super::plan::{DeploymentPlan, DesiredState, Stage};
use super::steps::standard_steps;
use crate::config::DeployConfig;
use crate::error::FrameworkError;
use crate::flight::{FlightActor, FlightClient, FlightError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct DeploySession {
    config: DeployConfig,
    orchestrator: Orchestrator,
    reporter: Arc<dyn ProgressReporter>,
    flights: FlightClient,
    flight_task: JoinHandle<()>,
}

impl DeploySession {
    /// Creates a session running the standard plan. Must be called inside a Tokio runtime.
    pub fn new(capabilities: Capabilities, config: DeployConfig) -> Result<Self, FrameworkError> {
        let plan = DeploymentPlan::new(standard_steps(&capabilities, &config))?;
        Ok(Self::with_plan(plan, config))
    }

    pub fn with_plan(plan: DeploymentPlan, config: DeployConfig) -> Self {
        let (actor, flights) = FlightActor::new();
        let flight_task = tokio::spawn(actor.run());
        Self {
            config,
            orchestrator: Orchestrator::new(plan),
            reporter: Arc::new(TracingReporter),
            flights,
            flight_task,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub async fn deploy(&self, desired: DesiredState) -> Result<DeployReport, DeployError> {
        self.deploy_with_cancel(desired, CancellationToken::new()).await
    }

    /// Runs one deployment of `desired`, notifying the reporter exactly once at the end.
    ///
    /// Dropping the returned future part way through still reports the deployment as
    /// cancelled, naming the first stage that had not completed.
    pub async fn deploy_with_cancel(
        &self,
        desired: DesiredState,
        cancel: CancellationToken,
    ) -> Result<DeployReport, DeployError> {
        self.reporter.started(&desired.identity);
        let guard = FinishGuard::new(self.reporter.as_ref(), &desired.identity, self.orchestrator.plan().stages());
        let outcome = self.run_exclusive(&desired, &cancel, &guard).await;
        guard.finish(&outcome);
        outcome
    }

    async fn run_exclusive(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<DeployReport, DeployError> {
        let _permit = self
            .flights
            .acquire(&desired.identity, self.config.flight)
            .await
            .map_err(|e| match e {
                FlightError::InProgress(key) => DeployError::InProgress(key),
                FlightError::Closed | FlightError::Dropped => DeployError::Coordinator,
            })?;
        self.orchestrator
            .execute(desired, cancel, reporter)
            .await
    }

    /// Identities with a deployment currently running.
    pub async fn in_flight(&self) -> Vec<String> {
        self.flights.in_flight().await.unwrap_or_default()
    }
}

/// Forwards step progress and owes the reporter one `finished` call until disarmed.
struct FinishGuard<'a> {
    reporter: &'a dyn ProgressReporter,
    identity: &'a str,
    stages: Vec<Stage>,
    completed: AtomicUsize,
    armed: bool,
}

impl<'a> FinishGuard<'a> {
    fn new(reporter: &'a dyn ProgressReporter, identity: &'a str, stages: Vec<Stage>) -> Self {
        Self {
            reporter,
            identity,
            stages,
            completed: AtomicUsize::new(0),
            armed: true,
        }
    }

    fn finish(mut self, outcome: &Result<DeployReport, DeployError>) {
        self.armed = false;
        self.reporter.finished(self.identity, outcome);
    }

    fn interrupted_stage(&self) -> Stage {
        let completed = self.completed.load(Ordering::Acquire);
        self.stages
            .get(completed)
            .or(self.stages.last())
            .copied()
            .unwrap_or(Stage::EnsureRole)
    }
}

impl ProgressReporter for FinishGuard<'_> {
    fn stage_completed(&self, identity: &str, report: &StageReport) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.reporter.stage_completed(identity, report);
    }

    fn finished(&self, identity: &str, outcome: &Result<DeployReport, DeployError>) {
        self.reporter.finished(identity, outcome);
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let stage = self.interrupted_stage();
            warn!(identity = %self.identity, %stage, "Deployment abandoned by its caller");
            self.reporter.finished(self.identity, &Err(DeployError::Cancelled(stage)));
        }
    }
}

impl Drop for DeploySession {
    fn drop(&mut self) {
        self.flight_task.abort();
    }
}
