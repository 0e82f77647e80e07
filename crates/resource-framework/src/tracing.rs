//! # Tracing Setup
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter filtered by `RUST_LOG`.
//!
//! | `RUST_LOG` | Shows |
//! |------------|-------|
//! | `info` | Composition, RPC dispatch warnings, deployment stage summaries |
//! | `debug` | Every method invocation, poll attempt and flight permit |
//! | `resource_framework::deploy=debug` | Deployment detail only |
//!
//! **With `RUST_LOG=info`**, a first deployment reads:
//!
//! ```text
//! INFO Deployment started identity="acme/greeter"
//! INFO Deployment planned identity="acme/greeter" state=NotStarted steps=[EnsureRole, ..]
//! INFO Converging stage=EnsureRole reason=missing
//! INFO Step completed identity="acme/greeter" stage=EnsureRole action=Created elapsed_ms=3
//! INFO Deployment succeeded identity="acme/greeter" changed=true
//! ```
//!
//! A re-run of the same resource reports `action=Unchanged` for every stage.

/// Initializes structured logging. Panics if a global subscriber is already set.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
