//! # Error Definitions

use unitrun::manager;
use unitrun::proxy;

#[derive(Debug, Clone)]
pub enum Error {
    /// No healthy optimizer unit could be obtained.
    Worker(manager::Error),
    /// The optimizer call failed.
    Call(proxy::Error),
    /// The request could not be serialized for the wire.
    Encode(String),
    /// The optimizer answered with something that is not a result.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker(e) => write!(f, "Optimizer unavailable: {}", e),
            Self::Call(e) => write!(f, "Optimizer call failed: {}", e),
            Self::Encode(msg) => write!(f, "Failed to encode request: {}", msg),
            Self::Decode(msg) => write!(f, "Failed to decode result: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Worker(e) => Some(e),
            Self::Call(e) => Some(e),
            _ => None,
        }
    }
}

impl From<manager::Error> for Error {
    fn from(e: manager::Error) -> Self {
        Self::Worker(e)
    }
}

impl From<proxy::Error> for Error {
    fn from(e: proxy::Error) -> Self {
        Self::Call(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
