//! # Configuration
//!
//! Settings are layered with `figment`, later layers winning:
//!
//! 1. [`Default`] values;
//! 2. an optional JSON file, where every field is optional;
//! 3. `RESOURCE_*` environment variables, with `__` separating nested keys.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RESOURCE_HOST__BIND` | `host.bind` |
//! | `RESOURCE_RPC__TIMEOUT` | `rpc.timeout` (ms) |
//! | `RESOURCE_RPC__RETRY__MAX_ATTEMPTS` | `rpc.retry.max_attempts` |
//! | `RESOURCE_TYPE_CACHE_CAPACITY` | `type_cache_capacity` |
//! | `RESOURCE_DEPLOY__FLIGHT` | `deploy.flight` (`reject` or `wait`) |
//! | `RESOURCE_DEPLOY__CERTIFICATE_WAIT__TIMEOUT` | `deploy.certificate_wait.timeout` (ms) |
//! | `RESOURCE_DEPLOY__RETRY__MAX_ATTEMPTS` | `deploy.retry.max_attempts` |

use crate::deploy::poll::{PollConfig, RetryPolicy};
use crate::error::FrameworkError;
use crate::flight::FlightPolicy;
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "RESOURCE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub host: HostConfig,
    pub rpc: RpcConfig,
    pub deploy: DeployConfig,
    pub type_cache_capacity: usize,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            rpc: RpcConfig::default(),
            deploy: DeployConfig::default(),
            type_cache_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bind: SocketAddr,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Retries of calls that could not reach their endpoint.
    pub retry: RetryPolicy,
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_secs(2),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub compute_wait: PollConfig,
    pub certificate_wait: PollConfig,
    pub dns_wait: PollConfig,
    pub retry: RetryPolicy,
    pub flight: FlightPolicy,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            compute_wait: PollConfig::with_timeout(Duration::from_secs(5 * 60)),
            certificate_wait: PollConfig::with_timeout(Duration::from_secs(30 * 60)),
            dns_wait: PollConfig::with_timeout(Duration::from_secs(30 * 60)),
            retry: RetryPolicy::default(),
            flight: FlightPolicy::Reject,
        }
    }
}

impl FrameworkConfig {
    /// The layered sources: defaults, then `file` when given, then the environment.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Json::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// How long a remote `deploy` call may take: every wait at its limit, plus the
    /// ordinary call timeout for the work around them.
    pub fn deploy_call_timeout(&self) -> Duration {
        let deploy = &self.deploy;
        self.rpc.timeout + deploy.compute_wait.timeout + deploy.certificate_wait.timeout + deploy.dns_wait.timeout
    }

    pub fn load(file: Option<&Path>) -> Result<Self, FrameworkError> {
        extract(Self::figment(file))
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, FrameworkError> {
        Self::load(None)
    }

    /// Defaults overridden by a JSON document. The environment is not consulted.
    pub fn from_json_str(text: &str) -> Result<Self, FrameworkError> {
        extract(Figment::from(Serialized::defaults(Self::default())).merge(Json::string(text)))
    }
}

fn extract(figment: Figment) -> Result<FrameworkConfig, FrameworkError> {
    figment
        .extract()
        .map_err(|e| FrameworkError::configuration(format!("invalid configuration: {e}")))
}

/// Serializes a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
