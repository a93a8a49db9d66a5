//! # Frames
//!
//! The two message shapes of the protocol, and their byte encoding.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::FailureReason;
use crate::error::Result;
use crate::error::RpcError;

/// A request to run `method` on the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub seq: u64,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

/// The answer to the call carrying the same `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub seq: u64,
    pub status: Status,
}

/// Outcome of a call as reported by the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok(Value),
    Err(FailureReason),
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Call(CallFrame),
    Reply(ReplyFrame),
}

impl Frame {
    pub fn call(seq: u64, method: impl Into<String>, args: Value) -> Self {
        Self::Call(CallFrame { seq, method: method.into(), args })
    }

    pub fn reply_ok(seq: u64, value: Value) -> Self {
        Self::Reply(ReplyFrame { seq, status: Status::Ok(value) })
    }

    pub fn reply_err(seq: u64, reason: FailureReason) -> Self {
        Self::Reply(ReplyFrame { seq, status: Status::Err(reason) })
    }

    /// The correlation id of this frame.
    pub fn seq(&self) -> u64 {
        match self {
            Self::Call(call) => call.seq,
            Self::Reply(reply) => reply.seq,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a frame, rejecting structurally valid JSON that breaks the protocol.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame: Frame = serde_json::from_slice(bytes)?;
        if let Frame::Call(call) = &frame {
            if call.method.is_empty() {
                return Err(RpcError::ProtocolViolation("Call frame with empty method".into()));
            }
        }
        Ok(frame)
    }
}
