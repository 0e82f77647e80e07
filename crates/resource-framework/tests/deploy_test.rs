use parking_lot::Mutex;
use resource_framework::config::DeployConfig;
use resource_framework::deploy::capabilities::{FunctionSpec, RoleSpec};
use resource_framework::deploy::cloud::BASIC_EXECUTION_POLICY;
use resource_framework::deploy::{
    cloud_layer, Capabilities, CloudError, DeployError, DeployReport, DeploySession, DesiredState, PollConfig,
    ProgressReporter, RetryPolicy, Stage, StageReport, StepAction,
};
use resource_framework::flight::FlightPolicy;
use resource_framework::mock::{ops, MockCloud, MockLatency};
use resource_framework::{Catalog, Environment, FrameworkError, Runtime};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// --- Test Fixture ---

const IDENTITY: &str = "acme/greeter";
const FUNCTION: &str = "acme-greeter";

fn wait(timeout_ms: u64) -> PollConfig {
    PollConfig {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        multiplier: 2.0,
        timeout: Duration::from_millis(timeout_ms),
    }
}

fn config() -> DeployConfig {
    DeployConfig {
        compute_wait: wait(2_000),
        certificate_wait: wait(2_000),
        dns_wait: wait(2_000),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        flight: FlightPolicy::Reject,
    }
}

fn desired(domain: Option<&str>) -> DesiredState {
    DesiredState {
        identity: IDENTITY.to_string(),
        role: RoleSpec {
            name: format!("{FUNCTION}-role"),
            trusted_service: "lambda.amazonaws.com".to_string(),
            policies: vec![BASIC_EXECUTION_POLICY.to_string()],
        },
        function: FunctionSpec {
            name: FUNCTION.to_string(),
            runtime: "provided.al2023".to_string(),
            handler: "bootstrap".to_string(),
            memory_mb: 128,
            timeout_secs: 30,
            code_digest: "sha256:0f1e2d".to_string(),
            environment: BTreeMap::new(),
        },
        api_name: FUNCTION.to_string(),
        domain: domain.map(str::to_string),
    }
}

/// Counts the around-hook notifications.
#[derive(Default)]
struct RecordingReporter {
    started: AtomicUsize,
    stages: Mutex<Vec<Stage>>,
    finished: Mutex<Vec<Result<bool, DeployError>>>,
}

impl ProgressReporter for RecordingReporter {
    fn started(&self, _identity: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn stage_completed(&self, _identity: &str, report: &StageReport) {
        self.stages.lock().push(report.stage);
    }

    fn finished(&self, _identity: &str, outcome: &Result<DeployReport, DeployError>) {
        self.finished
            .lock()
            .push(outcome.as_ref().map(DeployReport::is_noop).map_err(Clone::clone));
    }
}

struct Harness {
    cloud: Arc<MockCloud>,
    session: Arc<DeploySession>,
    reporter: Arc<RecordingReporter>,
}

fn harness_with(latency: MockLatency, config: DeployConfig) -> Harness {
    let cloud = Arc::new(MockCloud::with_latency(latency));
    let reporter = Arc::new(RecordingReporter::default());
    let session = DeploySession::new(Capabilities::from_provider(cloud.clone()), config)
        .unwrap()
        .with_reporter(reporter.clone());
    Harness {
        cloud,
        session: Arc::new(session),
        reporter,
    }
}

fn harness() -> Harness {
    harness_with(MockLatency::default(), config())
}

fn actions(report: &DeployReport) -> Vec<StepAction> {
    report.stages.iter().map(|s| s.action).collect()
}

async fn wait_until_in_flight(session: &DeploySession) {
    for _ in 0..2_000 {
        if session.in_flight().await.iter().any(|k| k == IDENTITY) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("deployment never started");
}

// --- Convergence ---

#[tokio::test]
async fn test_first_run_creates_everything_and_rerun_changes_nothing() {
    let h = harness();

    let first = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    assert_eq!(
        first.stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
        Stage::ORDER.to_vec()
    );
    assert_eq!(actions(&first), vec![StepAction::Created; 5]);
    assert!(first.outputs.domain_target.is_some());
    assert!(first.outputs.api_endpoint.is_some());
    assert!(!first.is_noop());

    h.cloud.clear_calls();
    let second = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(actions(&second), vec![StepAction::Unchanged; 5]);
    assert!(h.cloud.mutations().is_empty(), "{:?}", h.cloud.mutations());
    assert_eq!(second.outputs, first.outputs);
}

#[tokio::test]
async fn test_drift_is_corrected_with_a_single_update() {
    let h = harness();
    h.session.deploy(desired(None)).await.unwrap();

    h.cloud.tamper_function(FUNCTION, |f| f.memory_mb = 512);
    h.cloud.clear_calls();
    let report = h.session.deploy(desired(None)).await.unwrap();

    let compute = &report.stages[1];
    assert_eq!(compute.stage, Stage::EnsureCompute);
    assert_eq!(compute.action, StepAction::Updated);
    assert!(compute.reason.as_deref().unwrap_or_default().contains("memory"));
    assert_eq!(h.cloud.mutations(), vec![ops::UPDATE_FUNCTION.to_string()]);
    assert_eq!(h.cloud.function(FUNCTION).unwrap().memory_mb, 128);
}

#[tokio::test]
async fn test_without_a_domain_certificate_and_domain_are_skipped() {
    let h = harness();
    let report = h.session.deploy(desired(None)).await.unwrap();
    assert_eq!(
        actions(&report),
        vec![
            StepAction::Created,
            StepAction::Created,
            StepAction::Skipped,
            StepAction::Created,
            StepAction::Skipped,
        ]
    );
    assert_eq!(h.cloud.count(ops::FIND_CERTIFICATE), 0);
    assert_eq!(h.cloud.count(ops::GET_DOMAIN), 0);
}

#[tokio::test]
async fn test_lost_alias_record_is_restored() {
    let h = harness();
    let first = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    assert!(first.outputs.certificate_arn.is_some());

    h.cloud.delete_record("api.acme.dev");
    h.cloud.clear_calls();
    let report = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    assert_eq!(report.stages[4].action, StepAction::Updated);
    assert_eq!(h.cloud.mutations(), vec![ops::UPSERT_RECORD.to_string()]);
}

#[tokio::test]
async fn test_replaced_certificate_is_rebound_to_the_domain() {
    let h = harness();
    let first = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    let original = first.outputs.certificate_arn.clone().unwrap();

    h.cloud.revoke_certificate("api.acme.dev", "revoked by issuer");
    h.cloud.clear_calls();
    let second = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    let replacement = second.outputs.certificate_arn.clone().unwrap();

    assert_ne!(replacement, original);
    assert_eq!(second.stages[2].action, StepAction::Created);
    assert_eq!(second.stages[4].action, StepAction::Updated);
    assert_eq!(h.cloud.domain("api.acme.dev").unwrap().certificate_arn, replacement);
    assert_eq!(h.cloud.count(ops::UPDATE_DOMAIN_CERTIFICATE), 1);
    assert_eq!(h.cloud.count(ops::CREATE_DOMAIN), 0);

    h.cloud.clear_calls();
    let third = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    assert!(third.is_noop(), "{:?}", actions(&third));
    assert!(h.cloud.mutations().is_empty());
}

// --- Failures ---

#[tokio::test]
async fn test_failure_stops_the_run_without_rollback() {
    let h = harness();
    h.cloud
        .inject(ops::REQUEST_CERTIFICATE, CloudError::Service("certificate limit exceeded".into()));

    let err = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap_err();
    assert_eq!(
        err,
        DeployError::StepFailed {
            stage: Stage::EnsureCertificate,
            source: CloudError::Service("certificate limit exceeded".into()),
        }
    );
    assert_eq!(err.stage(), Some(Stage::EnsureCertificate));

    // Earlier steps stay in place, later ones were never attempted.
    assert!(h.cloud.function(FUNCTION).is_some());
    assert_eq!(h.cloud.count(ops::GET_API), 0);
    assert_eq!(h.cloud.count(ops::CREATE_API), 0);
    assert_eq!(*h.reporter.stages.lock(), vec![Stage::EnsureRole, Stage::EnsureCompute]);
    h.cloud.verify();
}

#[tokio::test]
async fn test_throttling_is_retried_with_backoff() {
    let h = harness();
    h.cloud.inject(ops::CREATE_ROLE, CloudError::Throttled("rate exceeded".into()));
    h.cloud.inject(ops::CREATE_ROLE, CloudError::Throttled("rate exceeded".into()));

    let report = h.session.deploy(desired(None)).await.unwrap();
    assert_eq!(report.stages[0].action, StepAction::Created);
    assert_eq!(h.cloud.count(ops::CREATE_ROLE), 3);
    h.cloud.verify();
}

#[tokio::test]
async fn test_persistent_throttling_eventually_fails_the_step() {
    let h = harness();
    h.cloud
        .inject_always(ops::GET_API, CloudError::Throttled("rate exceeded".into()));

    let err = h.session.deploy(desired(None)).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::StepFailed { stage: Stage::ConfigureRouting, source: CloudError::Throttled(_) }
    ));
    assert_eq!(h.cloud.count(ops::GET_API), 3);
}

#[tokio::test]
async fn test_wait_that_never_converges_times_out() {
    let mut config = config();
    config.dns_wait = wait(50);
    let h = harness_with(
        MockLatency {
            dns_polls: 1_000_000,
            ..MockLatency::default()
        },
        config,
    );

    let err = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap_err();
    assert!(
        matches!(
            err,
            DeployError::StepFailed { stage: Stage::ConfigureDomain, source: CloudError::Timeout { .. } }
        ),
        "{err:?}"
    );
}

// --- Around Hook ---

#[tokio::test]
async fn test_every_deployment_notifies_exactly_once() {
    let h = harness();
    h.session.deploy(desired(None)).await.unwrap();
    h.cloud.inject(ops::GET_ROLE, CloudError::Service("boom".into()));
    h.session.deploy(desired(None)).await.unwrap_err();

    assert_eq!(h.reporter.started.load(Ordering::SeqCst), 2);
    let finished = h.reporter.finished.lock();
    assert_eq!(finished.len(), 2);
    assert_eq!(finished[0], Ok(false));
    assert!(matches!(finished[1], Err(DeployError::StepFailed { stage: Stage::EnsureRole, .. })));
}

#[tokio::test]
async fn test_abandoned_deployment_still_notifies_once() {
    let h = harness_with(
        MockLatency {
            certificate_polls: 1_000_000,
            ..MockLatency::default()
        },
        config(),
    );

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        h.session.deploy(desired(Some("api.acme.dev"))),
    )
    .await;
    assert!(abandoned.is_err());

    assert_eq!(h.reporter.started.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.reporter.finished.lock(),
        vec![Err(DeployError::Cancelled(Stage::EnsureCertificate))]
    );
    assert_eq!(*h.reporter.stages.lock(), vec![Stage::EnsureRole, Stage::EnsureCompute]);

    // The dropped run gives its identity back.
    for _ in 0..2_000 {
        if h.session.in_flight().await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("abandoned deployment kept its identity");
}

// --- Cancellation & Single-Flight ---

#[tokio::test]
async fn test_cancellation_stops_a_running_wait() {
    let h = harness_with(
        MockLatency {
            certificate_polls: 1_000_000,
            ..MockLatency::default()
        },
        config(),
    );
    let cancel = CancellationToken::new();
    let session = h.session.clone();
    let token = cancel.clone();
    let running = tokio::spawn(async move { session.deploy_with_cancel(desired(Some("api.acme.dev")), token).await });

    for _ in 0..2_000 {
        if h.cloud.count(ops::DESCRIBE_CERTIFICATE) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cancel.cancel();

    let err = running.await.unwrap().unwrap_err();
    assert_eq!(err, DeployError::Cancelled(Stage::EnsureCertificate));
    assert_eq!(h.cloud.count(ops::CREATE_API), 0);
    assert_eq!(h.reporter.finished.lock().len(), 1);
    assert!(h.session.in_flight().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_deploy_of_the_same_identity_is_rejected() {
    let h = harness_with(
        MockLatency {
            dns_polls: 200,
            ..MockLatency::default()
        },
        config(),
    );
    let session = h.session.clone();
    let first = tokio::spawn(async move { session.deploy(desired(Some("api.acme.dev"))).await });
    wait_until_in_flight(&h.session).await;

    let rejected = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap_err();
    assert_eq!(rejected, DeployError::InProgress(IDENTITY.to_string()));
    assert!(matches!(FrameworkError::from(rejected), FrameworkError::Client(_)));

    assert!(first.await.unwrap().is_ok());
    assert!(h.session.in_flight().await.is_empty());
    assert!(h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap().is_noop());
    assert_eq!(h.reporter.started.load(Ordering::SeqCst), 3);
    assert_eq!(h.reporter.finished.lock().len(), 3);
}

#[tokio::test]
async fn test_waiting_policy_queues_behind_the_running_deploy() {
    let mut config = config();
    config.flight = FlightPolicy::Wait;
    let h = harness_with(
        MockLatency {
            dns_polls: 100,
            ..MockLatency::default()
        },
        config,
    );
    let session = h.session.clone();
    let first = tokio::spawn(async move { session.deploy(desired(Some("api.acme.dev"))).await });
    wait_until_in_flight(&h.session).await;

    let second = h.session.deploy(desired(Some("api.acme.dev"))).await.unwrap();
    let first = first.await.unwrap().unwrap();
    assert!(!first.is_noop());
    assert!(second.is_noop());
    assert_eq!(h.cloud.count(ops::CREATE_FUNCTION), 1);
}

// --- Deployable Resources ---

fn deployable_runtime(session: Arc<DeploySession>) -> Runtime {
    let mut catalog = Catalog::new();
    catalog.register_layer("acme/cloud", cloud_layer(session)).unwrap();
    Runtime::new(catalog)
}

#[tokio::test]
async fn test_resource_deploy_method_converges_its_attributes() {
    let h = harness();
    let runtime = deployable_runtime(h.session.clone());
    let greeter = runtime
        .load(&json!({
            "$id": IDENTITY,
            "$version": "1.2.0",
            "$implementation": "acme/cloud",
            "memorySize": 256,
            "environment": {"GREETING": "hi"},
        }))
        .unwrap();
    assert!(greeter.resource_type().allow_list().contains("deploy"));

    let report = greeter.invoke("deploy", json!({}), &Environment::new()).await.unwrap();
    assert_eq!(report["state"], json!("Done"));
    assert_eq!(report["identity"], json!(IDENTITY));

    let function = h.cloud.function(FUNCTION).unwrap();
    assert_eq!(function.memory_mb, 256);
    assert_eq!(function.code_digest, "version:1.2.0");
    assert_eq!(function.environment.get("GREETING").map(String::as_str), Some("hi"));
}

#[tokio::test]
async fn test_deployable_resources_validate_their_settings() {
    let h = harness();
    let runtime = deployable_runtime(h.session.clone());

    let err = runtime
        .load(&json!({"$id": IDENTITY, "$implementation": "acme/cloud", "memorySize": 64}))
        .unwrap_err();
    assert!(matches!(err, FrameworkError::Configuration(_)));

    let anonymous = runtime.load(&json!({"$implementation": "acme/cloud"})).unwrap();
    let err = anonymous.invoke("deploy", json!({}), &Environment::new()).await.unwrap_err();
    assert!(matches!(err, FrameworkError::Client(_)), "{err:?}");
    assert!(h.cloud.calls().is_empty());
}
