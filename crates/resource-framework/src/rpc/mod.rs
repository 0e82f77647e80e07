//! Remote invocation over JSON-RPC 2.0.

pub mod client;
pub mod envelope;
pub mod host;

pub use client::{CallPolicy, HttpTransport, LoopbackTransport, RemoteResource, Transport};
pub use envelope::{InvokeParams, RpcError, RpcRequest, RpcResponse};
pub use host::{router, serve, Bundle, DocumentBundle, InstanceBundle, ResourceHost};
