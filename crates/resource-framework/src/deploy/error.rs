use super::plan::Stage;
use crate::error::FrameworkError;
use std::time::Duration;

/// Failures reported by cloud collaborators.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CloudError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("{0}")]
    Service(String),
}

impl CloudError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Throttled(_))
    }
}

/// Why a deployment did not reach `Done`.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DeployError {
    #[error("deployment failed at {stage}: {source}")]
    StepFailed { stage: Stage, source: CloudError },

    #[error("a deployment of {0} is already in progress")]
    InProgress(String),

    #[error("deployment cancelled before {0} completed")]
    Cancelled(Stage),

    #[error("invalid desired state: {0}")]
    InvalidDesiredState(String),

    #[error("deployment coordinator unavailable")]
    Coordinator,
}

impl DeployError {
    /// The step that was running when the deployment stopped.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DeployError::StepFailed { stage, .. } | DeployError::Cancelled(stage) => Some(*stage),
            _ => None,
        }
    }
}

impl From<DeployError> for FrameworkError {
    fn from(e: DeployError) -> Self {
        match e {
            DeployError::InProgress(_) | DeployError::InvalidDesiredState(_) => FrameworkError::Client(e.to_string()),
            DeployError::StepFailed { .. } | DeployError::Cancelled(_) | DeployError::Coordinator => {
                FrameworkError::Server(e.to_string())
            }
        }
    }
}
