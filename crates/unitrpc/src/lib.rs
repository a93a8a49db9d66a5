//! # UnitRPC
//!
//! The wire protocol spoken between a host and an isolated compute unit.
//!
//! ## Architecture
//!
//! Every interaction is a `Call` frame answered by exactly one `Reply` frame
//! carrying the same sequence number. Frames travel as opaque byte buffers
//! (JSON on the wire), so a unit shares nothing with its host but bytes.
//! Correlation is by `seq`, never by arrival order.

mod error;
mod frame;

#[cfg(test)]
mod tests;

pub use error::FailureReason;
pub use error::Result;
pub use error::RpcError;
pub use frame::CallFrame;
pub use frame::Frame;
pub use frame::ReplyFrame;
pub use frame::Status;

/// Method names every unit must answer, regardless of its business surface.
pub mod method {
    /// Liveness probe; answered with [`super::PONG`].
    pub const PING: &str = "ping";
    /// Idempotent one-time setup.
    pub const INIT: &str = "init";
}

/// The only valid answer to a `ping` call.
pub const PONG: &str = "pong";
