//! # Resource Framework Sample
//!
//! A small application built on the resource framework.
//!
//! ## 🚀 Core Components
//!
//! - **[model]**: The `hello` and `uppercase` layers, base definitions and the deployable greeter document.
//! - **[clients]**: [`HelloClient`](resource_sample::clients::HelloClient), a typed wrapper over any `Invoker`.
//! - **[lifecycle]**: [`ResourceSystem`], which wires the runtime, the JSON-RPC host and the deploy session.
//!
//! ## 📚 Quick Start
//!
//! The entry point demonstrates:
//! 1.  Starting the [`ResourceSystem`] from an optional JSON file (first argument)
//!     overridden by `RESOURCE_*` environment settings.
//! 2.  Greeting locally and through the JSON-RPC gateway.
//! 3.  A private method being refused by the gateway.
//! 4.  Deploying the greeter twice; the second run changes nothing.
//!
//! The process exits with a non-zero status when a deployment fails.
//!
//! ## 🧪 Testing
//!
//! See [`resource_framework::mock`] for the in-memory cloud used here and in the tests.

use resource_framework::tracing::setup_tracing;
use resource_framework::FrameworkConfig;
use resource_sample::clients::HelloError;
use resource_sample::lifecycle::ResourceSystem;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    let file = std::env::args_os().nth(1).map(PathBuf::from);
    let mut config = FrameworkConfig::load(file.as_deref()).map_err(|e| e.to_string())?;
    // The in-memory cloud settles within a few polls.
    for wait in [
        &mut config.deploy.compute_wait,
        &mut config.deploy.certificate_wait,
        &mut config.deploy.dns_wait,
    ] {
        wait.initial_interval = Duration::from_millis(200);
    }

    info!(bind = %config.host.bind, "Starting resource system");
    let system = ResourceSystem::start(config).await.map_err(|e| e.to_string())?;

    // Same greeter, two paths
    let span = tracing::info_span!("greeting");
    async {
        let local = system.local_client.say_hello().await.map_err(|e| e.to_string())?;
        info!(greeting = %local, "Local greeting");

        let remote = system.remote_client.say_hello().await.map_err(|e| e.to_string())?;
        info!(greeting = %remote, "Remote greeting");

        match system.remote_client.call("secret", json!({})).await {
            Err(HelloError::NotAllowed(method)) => info!(%method, "Gateway refused private method"),
            Err(e) => warn!(error = %e, "Unexpected failure calling private method"),
            Ok(value) => warn!(%value, "Private method answered remotely"),
        }
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    // Deploy twice; the second run should find everything in place
    let span = tracing::info_span!("deployment");
    let outcome = async {
        let first = system.remote_client.deploy().await?;
        info!(changed = ?first.changed_stages(), endpoint = ?first.outputs.api_endpoint, "First deployment finished");

        let second = system.remote_client.deploy().await?;
        info!(noop = second.is_noop(), "Second deployment finished");
        Ok::<_, HelloError>(first)
    }
    .instrument(span)
    .await;

    // Shutdown system gracefully
    system.shutdown().await?;

    match outcome {
        Ok(report) => {
            info!(identity = %report.identity, "Application completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Deployment failed");
            Err(e.to_string())
        }
    }
}
