//! Calling side of the RPC boundary.

use super::envelope::{InvokeParams, RpcRequest, RpcResponse};
use super::host::ResourceHost;
use crate::config::FrameworkConfig;
use crate::deploy::poll::{retry_while, RetryPolicy};
use crate::deploy::DEPLOY_METHOD;
use crate::error::FrameworkError;
use crate::invoker::{Environment, Invoker};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delivers a request envelope to an endpoint and returns the response envelope.
///
/// Failing to reach the endpoint at all is [`FrameworkError::Transient`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// `timeout` replaces the transport's own limit for this request.
    async fn send(
        &self,
        endpoint: &str,
        request: &RpcRequest,
        timeout: Option<Duration>,
    ) -> Result<RpcResponse, FrameworkError>;
}

/// JSON over HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, FrameworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FrameworkError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &RpcRequest,
        timeout: Option<Duration>,
    ) -> Result<RpcResponse, FrameworkError> {
        let mut builder = self.client.post(endpoint).json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| FrameworkError::Transient(format!("cannot reach {endpoint}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FrameworkError::server(format!("{endpoint} answered HTTP {status}")));
        }
        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| FrameworkError::server(format!("invalid response from {endpoint}: {e}")))
    }
}

/// Delivers requests to an in-process host, round-tripping through the wire format.
pub struct LoopbackTransport {
    host: Arc<ResourceHost>,
}

impl LoopbackTransport {
    pub fn new(host: Arc<ResourceHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(
        &self,
        _endpoint: &str,
        request: &RpcRequest,
        _timeout: Option<Duration>,
    ) -> Result<RpcResponse, FrameworkError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| FrameworkError::server(format!("cannot encode request: {e}")))?;
        let response = self.host.handle_bytes(&body).await;
        let encoded = serde_json::to_vec(&response)
            .map_err(|e| FrameworkError::server(format!("cannot encode response: {e}")))?;
        serde_json::from_slice(&encoded).map_err(|e| FrameworkError::server(format!("invalid response: {e}")))
    }
}

/// How a [`RemoteResource`] places its calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPolicy {
    /// Retries of calls that could not reach the endpoint.
    pub retry: RetryPolicy,
    /// Per-method replacements of the transport timeout.
    pub timeouts: HashMap<String, Duration>,
}

impl CallPolicy {
    /// Retries from `rpc.retry`; `deploy` may run as long as all of its waits.
    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self {
            retry: config.rpc.retry.clone(),
            timeouts: HashMap::from([(DEPLOY_METHOD.to_string(), config.deploy_call_timeout())]),
        }
    }

    pub fn with_timeout(mut self, method: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(method.into(), timeout);
        self
    }

    pub fn timeout_for(&self, method: &str) -> Option<Duration> {
        self.timeouts.get(method).copied()
    }
}

/// A resource whose implementation lives behind an RPC endpoint.
pub struct RemoteResource {
    endpoint: String,
    transport: Arc<dyn Transport>,
    policy: CallPolicy,
    next_id: AtomicU64,
}

impl RemoteResource {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            policy: CallPolicy::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }
}

#[async_trait]
impl Invoker for RemoteResource {
    fn label(&self) -> String {
        self.endpoint.clone()
    }

    #[tracing::instrument(skip(self, arguments, environment), fields(endpoint = %self.endpoint))]
    async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        environment: &Environment,
    ) -> Result<Value, FrameworkError> {
        let params = InvokeParams {
            name: name.to_string(),
            arguments,
            environment: environment.clone(),
        };
        let timeout = self.policy.timeout_for(name);
        let (params, endpoint, transport, next_id) = (&params, &self.endpoint, &self.transport, &self.next_id);
        let response = retry_while(
            &self.policy.retry,
            name,
            |e: &FrameworkError| matches!(e, FrameworkError::Transient(_)),
            move || async move {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let request = RpcRequest::invoke(id, params)?;
                debug!(id, "Sending request");
                transport.send(endpoint, &request, timeout).await
            },
        )
        .await
        .map_err(FrameworkError::promote)?;
        response.into_result().map_err(|e| e.into_framework_error(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose;
    use crate::definition::Metadata;
    use crate::instance::ResourceInstance;
    use crate::layer::{layer, method};
    use crate::rpc::host::InstanceBundle;
    use serde_json::json;

    fn remote() -> RemoteResource {
        let echo = layer("echo", |base| {
            base.expose(
                "echo",
                method(|inv| async move {
                    let stage = inv.environment.get("STAGE").unwrap_or("dev").to_string();
                    Ok(json!({"arguments": inv.arguments, "stage": stage}))
                }),
            )
        });
        let rtype = Arc::new(compose(&[echo]).unwrap());
        let host = Arc::new(ResourceHost::new(InstanceBundle(ResourceInstance::new(
            rtype,
            Metadata::default(),
            None,
            None,
        ))));
        RemoteResource::new("loopback://echo", Arc::new(LoopbackTransport::new(host)))
    }

    /// Fails the first `failures` sends as unreachable, then delegates.
    struct Flaky {
        inner: Arc<dyn Transport>,
        failures: u32,
        sends: AtomicU64,
        timeouts: parking_lot::Mutex<Vec<Option<Duration>>>,
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn send(
            &self,
            endpoint: &str,
            request: &RpcRequest,
            timeout: Option<Duration>,
        ) -> Result<RpcResponse, FrameworkError> {
            self.timeouts.lock().push(timeout);
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < u64::from(self.failures) {
                return Err(FrameworkError::Transient(format!("cannot reach {endpoint}")));
            }
            self.inner.send(endpoint, request, timeout).await
        }
    }

    fn flaky(failures: u32, max_attempts: u32) -> (RemoteResource, Arc<Flaky>) {
        let loopback = remote();
        let transport = Arc::new(Flaky {
            inner: loopback.transport.clone(),
            failures,
            sends: AtomicU64::new(0),
            timeouts: parking_lot::Mutex::new(Vec::new()),
        });
        let policy = CallPolicy {
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            timeouts: HashMap::new(),
        }
        .with_timeout("echo", Duration::from_secs(90));
        let resource = RemoteResource::new("loopback://echo", transport.clone()).with_policy(policy);
        (resource, transport)
    }

    #[tokio::test]
    async fn arguments_and_environment_travel_to_the_host() {
        let result = remote()
            .invoke("echo", json!({"n": 1}), &Environment::new().with("STAGE", "prod"))
            .await
            .unwrap();
        assert_eq!(result, json!({"arguments": {"n": 1}, "stage": "prod"}));
    }

    #[tokio::test]
    async fn rejected_names_surface_as_method_not_allowed() {
        let err = remote().invoke("get", json!({"key": "x"}), &Environment::default()).await.unwrap_err();
        assert_eq!(err, FrameworkError::MethodNotAllowed("get".into()));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retried_until_it_answers() {
        let (resource, transport) = flaky(2, 3);
        let result = resource.invoke("echo", json!({"n": 2}), &Environment::default()).await.unwrap();
        assert_eq!(result["arguments"], json!({"n": 2}));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_promoted_to_server_errors() {
        let (resource, transport) = flaky(10, 3);
        let err = resource.invoke("echo", json!({}), &Environment::default()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::Server(ref m) if m.contains("retries exhausted")), "{err:?}");
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_method_timeout_reaches_the_transport() {
        let (resource, transport) = flaky(0, 1);
        resource.invoke("echo", json!({}), &Environment::default()).await.unwrap();
        let _ = resource.invoke("missing", json!({}), &Environment::default()).await;
        assert_eq!(*transport.timeouts.lock(), vec![Some(Duration::from_secs(90)), None]);
    }

    #[test]
    fn configured_policy_gives_deploy_the_longest_timeout() {
        let config = FrameworkConfig::default();
        let policy = CallPolicy::from_config(&config);
        assert_eq!(policy.timeout_for(DEPLOY_METHOD), Some(config.deploy_call_timeout()));
        assert_eq!(policy.timeout_for("hello"), None);
        assert_eq!(policy.retry, config.rpc.retry);
    }
}
