//! JSON-RPC 2.0 envelopes for the `invoke` method.

use crate::error::FrameworkError;
use crate::invoker::Environment;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const INVOKE_METHOD: &str = "invoke";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32603;
pub const METHOD_NOT_ALLOWED: i64 = -32001;
pub const CLIENT_ERROR: i64 = -32002;

/// What callers see instead of the details of a server-caused failure.
pub const GENERIC_SERVER_MESSAGE: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn invoke(id: u64, params: &InvokeParams) -> Result<Self, FrameworkError> {
        let params = serde_json::to_value(params)
            .map_err(|e| FrameworkError::server(format!("cannot encode invocation: {e}")))?;
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: INVOKE_METHOD.to_string(),
            params,
            id: Value::from(id),
        })
    }
}

/// Parameters of `invoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    #[serde(default)]
    pub environment: Environment,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Maps a wire error back into the framework taxonomy on the calling side.
    pub fn into_framework_error(self, method: &str) -> FrameworkError {
        match self.code {
            METHOD_NOT_ALLOWED => FrameworkError::MethodNotAllowed(method.to_string()),
            CLIENT_ERROR | INVALID_PARAMS | INVALID_REQUEST | METHOD_NOT_FOUND | PARSE_ERROR => {
                FrameworkError::Client(self.message)
            }
            _ => FrameworkError::Server(self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_request_has_the_documented_shape() {
        let params = InvokeParams {
            name: "hello".into(),
            arguments: json!({}),
            environment: Environment::new().with("STAGE", "prod"),
        };
        let request = RpcRequest::invoke(7, &params).unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "method": "invoke",
                "params": {"name": "hello", "arguments": {}, "environment": {"STAGE": "prod"}},
                "id": 7,
            })
        );
    }

    #[test]
    fn missing_arguments_default_to_an_empty_object() {
        let params: InvokeParams = serde_json::from_value(json!({"name": "hello"})).unwrap();
        assert_eq!(params.arguments, json!({}));
        assert!(params.environment.is_empty());
    }

    #[test]
    fn success_omits_the_error_member() {
        let response = RpcResponse::success(json!(1), json!("HELLO, WORLD!"));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "result": "HELLO, WORLD!", "id": 1})
        );
    }

    #[test]
    fn wire_codes_map_back_to_error_classes() {
        let denied = RpcError::new(METHOD_NOT_ALLOWED, "Method not allowed: secret").into_framework_error("secret");
        assert_eq!(denied, FrameworkError::MethodNotAllowed("secret".into()));
        let client = RpcError::new(CLIENT_ERROR, "name: too short").into_framework_error("rename");
        assert_eq!(client, FrameworkError::Client("name: too short".into()));
        let server = RpcError::new(SERVER_ERROR, GENERIC_SERVER_MESSAGE).into_framework_error("hello");
        assert_eq!(server, FrameworkError::Server(GENERIC_SERVER_MESSAGE.into()));
    }
}
