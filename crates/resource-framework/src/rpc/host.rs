//! # Resource Host
//!
//! Serves one loaded resource behind a JSON-RPC 2.0 endpoint exposing a single
//! method, `invoke`, with params `{name, arguments, environment}`.
//!
//! ## Request handling
//!
//! 1. The bundle is loaded on first use and memoized, together with the allow-list of
//!    public methods. Concurrent cold requests share a single load.
//! 2. A name outside the allow-list is answered with `MethodNotAllowed`.
//! 3. The method runs against the loaded instance.
//! 4. Client-caused failures are returned verbatim. Server-caused failures are logged
//!    in full and the caller only sees a generic message.
//!
//! Every response travels with HTTP status 200; the outcome lives in the envelope.

use super::envelope::{
    InvokeParams, RpcError, RpcRequest, RpcResponse, CLIENT_ERROR, GENERIC_SERVER_MESSAGE, INVALID_PARAMS,
    INVALID_REQUEST, INVOKE_METHOD, JSONRPC_VERSION, METHOD_NOT_ALLOWED, METHOD_NOT_FOUND, PARSE_ERROR,
    SERVER_ERROR,
};
use crate::error::{ErrorClass, FrameworkError};
use crate::instance::ResourceInstance;
use crate::runtime::Runtime;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Source of the resource a host serves.
#[async_trait]
pub trait Bundle: Send + Sync {
    async fn load(&self) -> Result<Arc<ResourceInstance>, FrameworkError>;
}

/// A definition document loaded through a runtime.
pub struct DocumentBundle {
    runtime: Arc<Runtime>,
    document: Value,
}

impl DocumentBundle {
    pub fn new(runtime: Arc<Runtime>, document: Value) -> Self {
        Self { runtime, document }
    }
}

#[async_trait]
impl Bundle for DocumentBundle {
    async fn load(&self) -> Result<Arc<ResourceInstance>, FrameworkError> {
        self.runtime.load(&self.document)
    }
}

/// An already loaded instance.
pub struct InstanceBundle(pub Arc<ResourceInstance>);

#[async_trait]
impl Bundle for InstanceBundle {
    async fn load(&self) -> Result<Arc<ResourceInstance>, FrameworkError> {
        Ok(self.0.clone())
    }
}

struct Loaded {
    instance: Arc<ResourceInstance>,
    allow_list: BTreeSet<String>,
}

pub struct ResourceHost {
    bundle: Arc<dyn Bundle>,
    loaded: OnceCell<Loaded>,
    loads: AtomicUsize,
}

impl ResourceHost {
    pub fn new(bundle: impl Bundle + 'static) -> Self {
        Self {
            bundle: Arc::new(bundle),
            loaded: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// How many times the bundle has been loaded. At most once after a success.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub async fn allow_list(&self) -> Result<BTreeSet<String>, FrameworkError> {
        Ok(self.loaded().await?.allow_list.clone())
    }

    async fn loaded(&self) -> Result<&Loaded, FrameworkError> {
        self.loaded
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                let instance = self.bundle.load().await?;
                let allow_list = instance.resource_type().allow_list();
                info!(resource = %instance.label(), methods = ?allow_list, "Bundle loaded");
                Ok::<_, FrameworkError>(Loaded { instance, allow_list })
            })
            .await
    }

    /// Decodes and handles one raw request body.
    pub async fn handle_bytes(&self, body: &[u8]) -> RpcResponse {
        let raw: Value = match serde_json::from_slice(body) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Unparseable request");
                return RpcResponse::failure(Value::Null, RpcError::new(PARSE_ERROR, "Parse error"));
            }
        };
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<RpcRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => RpcResponse::failure(id, RpcError::new(INVALID_REQUEST, format!("Invalid request: {e}"))),
        }
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        if request.jsonrpc != JSONRPC_VERSION {
            return RpcResponse::failure(id, RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }
        if request.method != INVOKE_METHOD {
            return RpcResponse::failure(
                id,
                RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", request.method)),
            );
        }
        let params: InvokeParams = match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(e) => return RpcResponse::failure(id, RpcError::new(INVALID_PARAMS, format!("Invalid params: {e}"))),
        };
        match self.dispatch(params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => RpcResponse::failure(id, to_wire_error(e)),
        }
    }

    async fn dispatch(&self, params: InvokeParams) -> Result<Value, FrameworkError> {
        let loaded = self.loaded().await?;
        if !loaded.allow_list.contains(&params.name) {
            warn!(method = %params.name, "Rejected call to a non-public method");
            return Err(FrameworkError::MethodNotAllowed(params.name));
        }
        loaded
            .instance
            .invoke(&params.name, params.arguments, &params.environment)
            .await
    }
}

fn to_wire_error(e: FrameworkError) -> RpcError {
    match (e.class(), &e) {
        (ErrorClass::Client, FrameworkError::MethodNotAllowed(_)) => RpcError::new(METHOD_NOT_ALLOWED, e.to_string()),
        (ErrorClass::Client, _) => RpcError::new(CLIENT_ERROR, e.to_string()),
        (ErrorClass::Server, _) => {
            error!(error = %e, "Invocation failed");
            RpcError::new(SERVER_ERROR, GENERIC_SERVER_MESSAGE)
        }
    }
}

async fn invoke_handler(State(host): State<Arc<ResourceHost>>, body: Bytes) -> Json<RpcResponse> {
    Json(host.handle_bytes(&body).await)
}

pub fn router(host: Arc<ResourceHost>) -> Router {
    Router::new().route("/", post(invoke_handler)).with_state(host)
}

/// Serves `host` on `listener` until `shutdown` resolves.
pub async fn serve(
    host: Arc<ResourceHost>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FrameworkError> {
    let addr = listener
        .local_addr()
        .map_err(|e| FrameworkError::server(format!("listener has no address: {e}")))?;
    info!(%addr, "Resource host listening");
    axum::serve(listener, router(host))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| FrameworkError::server(format!("host stopped: {e}")))
}
