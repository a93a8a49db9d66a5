//! # RPC Proxy
//!
//! Turns a unit's raw message channel into ordinary async calls.
//!
//! Each call takes a fresh sequence number and parks a oneshot sender in the
//! pending table before its frame is posted. The proxy's `message` listener
//! routes every reply to the sender registered under the reply's `seq`, so
//! any number of calls may be in flight and complete in any order.
//!
//! ## Invariants
//!
//! - Replies are matched by sequence number, never by arrival order
//! - Replies with an unknown sequence number are dropped
//! - A channel-level `error` or `messageerror` event fails every pending call
//! - A pending entry never outlives the `PendingCall` that owns it

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use unitrpc::FailureReason;
use unitrpc::Frame;
use unitrpc::Status;
use unitrpc::method;

use crate::unit;
use crate::unit::ComputeUnit;
use crate::unit::EventKind;
use crate::unit::ListenerGuard;
use crate::unit::UnitEvent;

/// Errors during remote invocation.
#[derive(Debug, Clone)]
pub enum Error {
    /// The frame could not be encoded.
    Rpc(unitrpc::RpcError),
    /// The unit refused the message (e.g. terminated).
    Unit(unit::Error),
    /// The unit answered with a failure.
    Remote(FailureReason),
    /// The unit raised an `error` event while the call was pending.
    Channel(String),
    /// The unit raised a `messageerror` event while the call was pending.
    MessageError(String),
    /// No reply within the call watchdog.
    Timeout(Duration),
    /// The proxy was closed while the call was pending.
    Closed,
    /// The reply arrived but did not have the expected shape.
    UnexpectedReply(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "RPC protocol error: {}", e),
            Self::Unit(e) => write!(f, "Unit error: {}", e),
            Self::Remote(reason) => write!(f, "Remote failure: {}", reason),
            Self::Channel(msg) => write!(f, "Channel error: {}", msg),
            Self::MessageError(msg) => write!(f, "Message error: {}", msg),
            Self::Timeout(after) => write!(f, "Call timed out after {} ms", after.as_millis()),
            Self::Closed => write!(f, "Proxy closed"),
            Self::UnexpectedReply(msg) => write!(f, "Unexpected reply: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Unit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<unitrpc::RpcError> for Error {
    fn from(e: unitrpc::RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<unit::Error> for Error {
    fn from(e: unit::Error) -> Self {
        Self::Unit(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

type Pending = DashMap<u64, oneshot::Sender<Result<Value>>>;

/// Typed async facade over one unit.
pub struct RpcProxy {
    unit: Arc<dyn ComputeUnit>,
    pending: Arc<Pending>,
    seq_gen: AtomicU64,
    call_timeout: Option<Duration>,
    listeners: Mutex<Option<ListenerGuard>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RpcProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProxy")
            .field("seq_gen", &self.seq_gen)
            .field("call_timeout", &self.call_timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RpcProxy {
    /// Wraps a unit, installing the proxy's reply-routing listeners.
    pub fn wrap(unit: Arc<dyn ComputeUnit>) -> Self {
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let mut guard = ListenerGuard::new(unit.clone());

        let route = pending.clone();
        guard.listen(EventKind::Message, Arc::new(move |event: &UnitEvent| {
            if let UnitEvent::Message(bytes) = event {
                route_reply(&route, bytes);
            }
        }));

        let fail = pending.clone();
        guard.listen(EventKind::Error, Arc::new(move |event: &UnitEvent| {
            if let UnitEvent::Error(msg) = event {
                fail_all(&fail, Error::Channel(msg.clone()));
            }
        }));

        let fail = pending.clone();
        guard.listen(EventKind::MessageError, Arc::new(move |event: &UnitEvent| {
            if let UnitEvent::MessageError(msg) = event {
                fail_all(&fail, Error::MessageError(msg.clone()));
            }
        }));

        Self {
            unit,
            pending,
            seq_gen: AtomicU64::new(1),
            call_timeout: None,
            listeners: Mutex::new(Some(guard)),
            closed: AtomicBool::new(false),
        }
    }

    /// Bounds every call made through [`RpcProxy::call`] and [`PendingCall::wait`].
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn unit(&self) -> &Arc<dyn ComputeUnit> {
        &self.unit
    }

    /// Number of calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Registers a pending reply and posts the call frame.
    ///
    /// The frame is on its way when this returns; the reply is collected with
    /// [`PendingCall::wait`]. Dropping the `PendingCall` abandons the reply.
    pub fn begin(&self, method: &str, args: Value) -> Result<PendingCall> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);

        // the entry is removed on every early return by PendingCall's drop
        let call = PendingCall {
            seq,
            rx,
            pending: self.pending.clone(),
            timeout: self.call_timeout,
        };

        let payload = Frame::call(seq, method, args).encode()?;
        trace!(unit = %self.unit.id(), seq, method, "posting call");
        self.unit.post_message(payload)?;

        Ok(call)
    }

    /// Calls `method` and awaits its reply.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value> {
        self.begin(method, args)?.wait().await
    }

    /// Liveness probe; returns whatever the unit answered.
    pub async fn ping(&self) -> Result<String> {
        match self.call(method::PING, Value::Null).await? {
            Value::String(s) => Ok(s),
            other => Err(Error::UnexpectedReply(format!("ping answered with {}", other))),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.call(method::INIT, Value::Null).await.map(|_| ())
    }

    /// Detaches from the unit and fails every pending call with [`Error::Closed`].
    ///
    /// Does not terminate the unit. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).take();
        fail_all(&self.pending, Error::Closed);
    }
}

impl Drop for RpcProxy {
    fn drop(&mut self) {
        self.close();
    }
}

/// A call that has been posted and is awaiting its reply.
pub struct PendingCall {
    seq: u64,
    rx: oneshot::Receiver<Result<Value>>,
    pending: Arc<Pending>,
    timeout: Option<Duration>,
}

impl PendingCall {
    /// The correlation id the reply will carry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Exempts this call from the proxy's watchdog; the caller bounds it.
    pub fn untimed(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub async fn wait(mut self) -> Result<Value> {
        let rx = &mut self.rx;
        let received = match self.timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(received) => received,
                Err(_) => return Err(Error::Timeout(after)),
            },
            None => rx.await,
        };
        // a dropped sender means the entry was discarded without an answer
        received.unwrap_or(Err(Error::Closed))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

fn route_reply(pending: &Pending, bytes: &[u8]) {
    let reply = match Frame::decode(bytes) {
        Ok(Frame::Reply(reply)) => reply,
        Ok(Frame::Call(call)) => {
            trace!(seq = call.seq, "ignoring call frame from unit");
            return;
        }
        Err(e) => {
            trace!(error = %e, "ignoring undecodable message from unit");
            return;
        }
    };

    let Some((_, tx)) = pending.remove(&reply.seq) else {
        // late, duplicate, or foreign reply
        trace!(seq = reply.seq, "no pending call for reply");
        return;
    };

    let result = match reply.status {
        Status::Ok(value) => Ok(value),
        Status::Err(reason) => Err(Error::Remote(reason)),
    };
    let _ = tx.send(result);
}

fn fail_all(pending: &Pending, error: Error) {
    let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
