use crate::clients::HelloClient;
use crate::model;
use resource_framework::deploy::{Capabilities, DeploySession};
use resource_framework::mock::MockCloud;
use resource_framework::rpc::{serve, CallPolicy, HttpTransport, InstanceBundle, RemoteResource, ResourceHost};
use resource_framework::{FrameworkConfig, FrameworkError, ResourceInstance, Runtime};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// The runtime orchestrator of the sample application.
///
/// `ResourceSystem` is responsible for:
/// - **Wiring**: catalog, runtime, deploy session and cloud provider
/// - **Hosting**: serving the greeter over JSON-RPC on the configured address
/// - **Lifecycle**: stopping the host gracefully and waiting for it to finish
///
/// # Example
///
/// ```ignore
/// let system = ResourceSystem::start(FrameworkConfig::load(Some(Path::new("resource.json")))?).await?;
///
/// let greeting = system.remote_client.say_hello().await?;
/// let report = system.remote_client.deploy().await?;
///
/// system.shutdown().await?;
/// ```
pub struct ResourceSystem {
    /// Client bound to the in-process greeter instance
    pub local_client: HelloClient,

    /// Client that reaches the greeter through the JSON-RPC gateway
    pub remote_client: HelloClient,

    pub runtime: Arc<Runtime>,
    pub session: Arc<DeploySession>,
    pub cloud: Arc<MockCloud>,
    pub greeter: Arc<ResourceInstance>,

    /// Address the host actually bound (differs from the configured one for port 0)
    pub address: SocketAddr,

    stop: oneshot::Sender<()>,
    server: JoinHandle<Result<(), FrameworkError>>,
}

impl ResourceSystem {
    /// Starts the system against an in-memory cloud.
    pub async fn start(config: FrameworkConfig) -> Result<Self, FrameworkError> {
        Self::start_with_cloud(config, Arc::new(MockCloud::new())).await
    }

    /// Starts the system against `cloud`.
    ///
    /// This method:
    /// 1. Builds the deploy session over the cloud capabilities
    /// 2. Registers the sample layers and loads the greeter document
    /// 3. Binds the host address and spawns the JSON-RPC server
    /// 4. Creates a local and a remote client for the greeter
    pub async fn start_with_cloud(config: FrameworkConfig, cloud: Arc<MockCloud>) -> Result<Self, FrameworkError> {
        // 1. Deployment
        let session = Arc::new(DeploySession::new(
            Capabilities::from_provider(cloud.clone()),
            config.deploy.clone(),
        )?);

        // 2. Composition
        let transport = Arc::new(HttpTransport::new(config.rpc.timeout())?);
        let catalog = model::catalog(session.clone())?;
        let runtime = Arc::new(Runtime::with_config(catalog, &config)?.with_transport(transport.clone()));
        let greeter = runtime.load(&model::greeter_document())?;

        // 3. Hosting
        let listener = TcpListener::bind(config.host.bind)
            .await
            .map_err(|e| FrameworkError::configuration(format!("cannot bind {}: {e}", config.host.bind)))?;
        let address = listener
            .local_addr()
            .map_err(|e| FrameworkError::server(format!("listener has no address: {e}")))?;
        let host = Arc::new(ResourceHost::new(InstanceBundle(greeter.clone())));
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(host, listener, async move {
            let _ = stopped.await;
        }));

        // 4. Clients
        let endpoint = format!("http://{address}/");
        // Deploy calls outlive the ordinary RPC timeout.
        let remote = RemoteResource::new(endpoint, transport).with_policy(CallPolicy::from_config(&config));
        info!(%address, resource = %greeter.label(), "Resource system started");

        Ok(Self {
            local_client: HelloClient::new(Arc::new(greeter.clone())),
            remote_client: HelloClient::new(Arc::new(remote)),
            runtime,
            session,
            cloud,
            greeter,
            address,
            stop,
            server,
        })
    }

    /// Gracefully shuts down the host.
    ///
    /// In-flight requests are allowed to finish. Returns an error if the server
    /// task failed or panicked.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down system...");

        // The receiver is gone only if the server already stopped on its own.
        let _ = self.stop.send(());

        match self.server.await {
            Ok(Ok(())) => {
                info!("System shut down cleanly");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Resource host failed");
                Err(e.to_string())
            }
            Err(e) => {
                error!(error = %e, "Resource host task panicked");
                Err(format!("resource host task failed: {e}"))
            }
        }
    }
}
