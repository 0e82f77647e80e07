//! Typed view of the report returned by the `deploy` method.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeploySummary {
    pub identity: String,
    pub stages: Vec<StageSummary>,
    pub outputs: DeployOutputs,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub action: String,
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeployOutputs {
    pub role_arn: Option<String>,
    pub function_arn: Option<String>,
    pub certificate_arn: Option<String>,
    pub api_endpoint: Option<String>,
    pub domain_target: Option<String>,
}

impl DeploySummary {
    /// True when every stage found the infrastructure already in place.
    pub fn is_noop(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.action == "Unchanged" || s.action == "Skipped")
    }

    pub fn changed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.action == "Created" || s.action == "Updated")
            .map(|s| s.stage.as_str())
            .collect()
    }
}
