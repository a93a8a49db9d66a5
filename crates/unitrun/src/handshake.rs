//! # Health-check Handshake
//!
//! Proves a freshly created unit is alive and its RPC layer answers before
//! any business call reaches it.
//!
//! The probe listens on all three event classes, sends `ping`, and races the
//! reply against `ping_timeout`. Only a `pong` carrying the ping's own `seq`
//! counts; replies for other sequence numbers are noise. Every failure is
//! terminal, there is no retry inside the handshake. Once the ping succeeds
//! the probe listeners are removed and `init` is awaited under `init_timeout`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use unitrpc::Frame;
use unitrpc::Status;
use unitrpc::method;

use crate::config::UnitConfig;
use crate::proxy;
use crate::proxy::RpcProxy;
use crate::unit::EventKind;
use crate::unit::ListenerGuard;
use crate::unit::UnitEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The unit raised an `error` event, or the ping call itself failed.
    PingFailed(String),
    /// The unit raised a `messageerror` event.
    MessageError(String),
    /// No matching `pong` within the ping timeout.
    TimedOut(Duration),
    InitFailed(String),
    InitTimedOut(Duration),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PingFailed(msg) => write!(f, "ping failed: {}", msg),
            Self::MessageError(msg) => write!(f, "messageerror event: {}", msg),
            Self::TimedOut(after) => write!(f, "ping timed out after {} ms", after.as_millis()),
            Self::InitFailed(msg) => write!(f, "init failed: {}", msg),
            Self::InitTimedOut(after) => write!(f, "init timed out after {} ms", after.as_millis()),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// What the probe listeners observed.
enum Probe {
    Pong(u64),
    Fault(Error),
}

/// Runs the full handshake (ping, then init) against a freshly wrapped unit.
pub async fn run(proxy: &RpcProxy, config: &UnitConfig) -> Result<()> {
    let unit = proxy.unit().id();

    ping(proxy, config.ping_timeout).await?;
    debug!(%unit, "ping answered");

    // init is bounded by init_timeout alone, not by the business-call watchdog
    let init = async {
        match proxy.begin(method::INIT, Value::Null) {
            Ok(call) => call.untimed().wait().await,
            Err(e) => Err(e),
        }
    };

    match tokio::time::timeout(config.init_timeout, init).await {
        Ok(Ok(_)) => {
            debug!(%unit, "unit initialized");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(%unit, error = %e, "init failed");
            Err(Error::InitFailed(e.to_string()))
        }
        Err(_) => {
            warn!(%unit, "init timed out");
            Err(Error::InitTimedOut(config.init_timeout))
        }
    }
}

/// The liveness probe alone.
pub async fn ping(proxy: &RpcProxy, timeout: Duration) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut listeners = ListenerGuard::new(proxy.unit().clone());

    let pongs = tx.clone();
    listeners.listen(EventKind::Message, Arc::new(move |event: &UnitEvent| {
        let UnitEvent::Message(bytes) = event else { return };
        if let Ok(Frame::Reply(reply)) = Frame::decode(bytes) {
            if matches!(&reply.status, Status::Ok(Value::String(s)) if s == unitrpc::PONG) {
                let _ = pongs.send(Probe::Pong(reply.seq));
            }
        }
    }));

    let faults = tx.clone();
    listeners.listen(EventKind::Error, Arc::new(move |event: &UnitEvent| {
        if let UnitEvent::Error(msg) = event {
            let _ = faults.send(Probe::Fault(Error::PingFailed(msg.clone())));
        }
    }));

    let faults = tx;
    listeners.listen(EventKind::MessageError, Arc::new(move |event: &UnitEvent| {
        if let UnitEvent::MessageError(msg) = event {
            let _ = faults.send(Probe::Fault(Error::MessageError(msg.clone())));
        }
    }));

    let call = proxy
        .begin(method::PING, Value::Null)
        .map_err(|e| Error::PingFailed(e.to_string()))?;
    let seq = call.seq();
    let reply = call.wait();
    tokio::pin!(reply);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut reply_done = false;
    loop {
        tokio::select! {
            biased;

            probe = rx.recv() => match probe {
                Some(Probe::Pong(s)) if s == seq => return Ok(()),
                Some(Probe::Pong(s)) => trace!(expected = seq, received = s, "ignoring unmatched pong"),
                Some(Probe::Fault(e)) => return Err(e),
                // the unit dropped our listeners, so it is gone
                None => return Err(Error::PingFailed("unit terminated during handshake".into())),
            },

            result = &mut reply, if !reply_done => {
                reply_done = true;
                match result {
                    Ok(Value::String(s)) if s == unitrpc::PONG => return Ok(()),
                    Ok(other) => return Err(Error::PingFailed(format!("unexpected ping reply {}", other))),
                    Err(proxy::Error::MessageError(msg)) => return Err(Error::MessageError(msg)),
                    // the proxy watchdog is not the handshake's timer; keep waiting for ours
                    Err(proxy::Error::Timeout(_)) => {}
                    Err(e) => return Err(Error::PingFailed(e.to_string())),
                }
            },

            _ = &mut deadline => return Err(Error::TimedOut(timeout)),
        }
    }
}
