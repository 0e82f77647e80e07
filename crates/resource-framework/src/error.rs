//! # Framework Errors
//!
//! This module defines the error taxonomy shared by every part of the framework.
//! By centralizing error definitions, we ensure consistent classification across
//! composition, local invocation, the RPC boundary and deployment.
//!
//! ## Classification
//!
//! Every [`FrameworkError`] is either **client-caused** or **server-caused**
//! (see [`ErrorClass`]). The distinction matters at the RPC boundary: client
//! messages are forwarded verbatim, server messages are replaced with a generic
//! text and only logged locally.
//!
//! | Variant | Class | Retried? |
//! |---------|-------|----------|
//! | `Configuration` | Server | never (fatal at composition time) |
//! | `Client` / `Validation` / `MethodNotAllowed` | Client | never |
//! | `Server` | Server | never |
//! | `Transient` | Server | with bounded backoff, then promoted |

use crate::property::ValidationError;

/// Errors that can occur within the resource framework itself.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum FrameworkError {
    /// Malformed definition or invalid extension chain.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller-caused failure. The message is safe to show to the caller.
    #[error("{0}")]
    Client(String),

    /// A value failed its property validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The method exists but is not publicly invocable (or does not exist at all).
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Internal or unexpected failure.
    #[error("Server error: {0}")]
    Server(String),

    /// Rate limiting or eventual consistency. Retried before being promoted.
    #[error("Transient infrastructure error: {0}")]
    Transient(String),
}

/// Which side of the boundary caused an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

impl FrameworkError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Client(_) | Self::Validation(_) | Self::MethodNotAllowed(_) => ErrorClass::Client,
            Self::Configuration(_) | Self::Server(_) | Self::Transient(_) => ErrorClass::Server,
        }
    }

    /// Promotes a transient error that exhausted its retries.
    pub fn promote(self) -> Self {
        match self {
            Self::Transient(msg) => Self::Server(format!("retries exhausted: {msg}")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_splits_client_and_server() {
        assert_eq!(FrameworkError::client("bad").class(), ErrorClass::Client);
        assert_eq!(
            FrameworkError::MethodNotAllowed("secret".into()).class(),
            ErrorClass::Client
        );
        let invalid = ValidationError::new("name", "too short");
        assert_eq!(FrameworkError::from(invalid).class(), ErrorClass::Client);
        assert_eq!(FrameworkError::server("boom").class(), ErrorClass::Server);
        assert_eq!(FrameworkError::configuration("x").class(), ErrorClass::Server);
        assert_eq!(FrameworkError::Transient("slow".into()).class(), ErrorClass::Server);
    }

    #[test]
    fn promote_turns_transient_into_server() {
        let promoted = FrameworkError::Transient("throttled".into()).promote();
        assert!(matches!(promoted, FrameworkError::Server(ref m) if m.contains("throttled")));
        let untouched = FrameworkError::client("bad").promote();
        assert_eq!(untouched, FrameworkError::client("bad"));
    }
}
