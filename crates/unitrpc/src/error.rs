//! # Error Definitions
//!
//! Failures of the wire protocol itself, and the reasons a remote unit can give
//! for refusing or failing a call.

use serde::Deserialize;
use serde::Serialize;

/// Operational failures within the RPC mechanism itself.
#[derive(Debug, Clone)]
pub enum RpcError {
    /// The bytes could not be encoded or were not a valid frame.
    Serialization(String),
    /// The frame decoded, but its structure broke the protocol (e.g. an empty method).
    ProtocolViolation(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// A specialized Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Reasons for an RPC failure (the "Err" side of a Reply).
///
/// These are distinct from `RpcError`; these represent the *remote* unit failing,
/// whereas `RpcError` represents the *protocol* failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The handler panicked while servicing the call.
    Trapped(String),
    /// The method does not exist on the unit.
    MethodNotFound(String),
    /// Arguments provided did not match the method signature.
    BadArguments(String),
    /// A business method was called before `init` completed.
    NotInitialized,
    /// The handler ran and reported a failure.
    Failed(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trapped(msg) => write!(f, "unit trapped: {}", msg),
            Self::MethodNotFound(method) => write!(f, "method '{}' not found", method),
            Self::BadArguments(msg) => write!(f, "bad arguments: {}", msg),
            Self::NotInitialized => write!(f, "unit not initialized"),
            Self::Failed(msg) => write!(f, "call failed: {}", msg),
        }
    }
}
