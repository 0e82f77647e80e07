//! # Deployment Orchestration
//!
//! Converges cloud infrastructure (identity role, compute function, TLS certificate,
//! API routing, custom domain) to a [`DesiredState`] through a fixed sequence of
//! idempotent steps.
//!
//! - [`capabilities`]: collaborator traits the steps call.
//! - [`plan`] and [`steps`]: the step contract and the five standard steps.
//! - [`poll`]: readiness polling with bounded backoff, and transient retries.
//! - [`orchestrator`]: fail-fast execution and progress reporting.
//! - [`session`]: per-session state, including single-flight per identity.
//! - [`cloud`]: the layer exposing `deploy` as a resource method.

pub mod capabilities;
pub mod cloud;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod poll;
pub mod session;
pub mod steps;

pub use capabilities::Capabilities;
pub use cloud::{cloud_layer, desired_state, CLOUD_LAYER, DEPLOY_METHOD};
pub use error::{CloudError, DeployError};
pub use orchestrator::{DeployReport, Orchestrator, ProgressReporter, StageReport, TracingReporter};
pub use plan::{DeployState, DeploymentPlan, DesiredState, Outputs, PlanStep, Stage, StepAction};
pub use poll::{poll_until_ready, retry_transient, retry_while, PollConfig, PollOutcome, RetryPolicy};
pub use session::DeploySession;
