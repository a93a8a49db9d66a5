//! # Thread-backed Units
//!
//! Each [`ThreadUnit`] owns one OS thread and the service state living on it.
//! The host reaches the service only through encoded frames; replies come
//! back as `Message` events. A panicking handler is a crash: the unit raises
//! an `Error` event and its thread exits.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use unitrpc::CallFrame;
use unitrpc::FailureReason;
use unitrpc::Frame;
use unitrpc::Status;
use unitrpc::method;

use crate::unit;
use crate::unit::ComputeUnit;
use crate::unit::EventKind;
use crate::unit::Listener;
use crate::unit::ListenerId;
use crate::unit::Listeners;
use crate::unit::UnitEvent;
use crate::unit::UnitFactory;
use crate::unit::UnitId;

/// The remote side of a unit: what runs on the unit's thread.
pub trait UnitService: Send + 'static {
    fn ping(&mut self) -> &'static str {
        unitrpc::PONG
    }

    /// Expensive one-time setup. Called again on every `init` frame, so it
    /// must be idempotent.
    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Handles every method other than `ping` and `init`.
    fn call(&mut self, method: &str, args: Value) -> Result<Value, FailureReason>;
}

/// A unit running a [`UnitService`] on a dedicated thread.
pub struct ThreadUnit {
    id: UnitId,
    inbox: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    listeners: Arc<Listeners>,
    terminated: Arc<AtomicBool>,
}

impl ThreadUnit {
    /// Spawns the unit thread. The service is constructed on that thread, so
    /// a panicking constructor surfaces as an `Error` event, not here.
    pub fn spawn<S, F>(make_service: F) -> unit::Result<Self>
    where
        S: UnitService,
        F: FnOnce() -> S + Send + 'static,
    {
        let id = UnitId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(Listeners::new());
        let terminated = Arc::new(AtomicBool::new(false));

        let host = UnitHost {
            id,
            listeners: listeners.clone(),
            terminated: terminated.clone(),
        };

        std::thread::Builder::new()
            .name(id.to_string())
            .spawn(move || host.run(make_service, rx))
            .map_err(|e| unit::Error::Spawn(e.to_string()))?;

        debug!(unit = %id, "spawned unit thread");

        Ok(Self {
            id,
            inbox: Mutex::new(Some(tx)),
            listeners,
            terminated,
        })
    }
}

impl ComputeUnit for ThreadUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn post_message(&self, payload: Vec<u8>) -> unit::Result<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(unit::Error::Terminated);
        }
        let inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = inbox.as_ref() else {
            return Err(unit::Error::Terminated);
        };
        // the thread drops its receiver when it exits
        tx.send(payload).map_err(|_| unit::Error::Terminated)
    }

    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        // closing the inbox ends the thread's receive loop
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.listeners.clear();
        debug!(unit = %self.id, "terminated unit");
    }
}

impl Drop for ThreadUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// State moved onto the unit thread.
struct UnitHost {
    id: UnitId,
    listeners: Arc<Listeners>,
    terminated: Arc<AtomicBool>,
}

impl UnitHost {
    fn emit(&self, event: UnitEvent) {
        if !self.terminated.load(Ordering::Acquire) {
            self.listeners.emit(&event);
        }
    }

    fn run<S, F>(self, make_service: F, mut rx: mpsc::UnboundedReceiver<Vec<u8>>)
    where
        S: UnitService,
        F: FnOnce() -> S,
    {
        let mut service = match std::panic::catch_unwind(AssertUnwindSafe(make_service)) {
            Ok(service) => service,
            Err(panic) => {
                let msg = panic_message(panic);
                warn!(unit = %self.id, error = %msg, "unit service failed to start");
                self.emit(UnitEvent::Error(msg));
                return;
            }
        };
        let mut initialized = false;

        while let Some(bytes) = rx.blocking_recv() {
            if self.terminated.load(Ordering::Acquire) {
                break;
            }

            let call = match Frame::decode(&bytes) {
                Ok(Frame::Call(call)) => call,
                Ok(Frame::Reply(reply)) => {
                    self.emit(UnitEvent::MessageError(format!(
                        "unit received a Reply frame (seq {})",
                        reply.seq
                    )));
                    continue;
                }
                Err(e) => {
                    self.emit(UnitEvent::MessageError(e.to_string()));
                    continue;
                }
            };

            let seq = call.seq;
            trace!(unit = %self.id, seq, method = %call.method, "dispatching call");

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                dispatch(&mut service, &mut initialized, call)
            }));
            let status = match outcome {
                Ok(status) => status,
                Err(panic) => {
                    let msg = panic_message(panic);
                    warn!(unit = %self.id, seq, error = %msg, "unit crashed");
                    self.emit(UnitEvent::Error(msg));
                    break;
                }
            };

            match Frame::Reply(unitrpc::ReplyFrame { seq, status }).encode() {
                Ok(reply) => self.emit(UnitEvent::Message(reply)),
                Err(e) => self.emit(UnitEvent::MessageError(e.to_string())),
            }
        }

        debug!(unit = %self.id, "unit thread exiting");
    }
}

fn dispatch<S: UnitService>(service: &mut S, initialized: &mut bool, call: CallFrame) -> Status {
    let result = match call.method.as_str() {
        method::PING => Ok(Value::String(service.ping().to_string())),
        method::INIT => match service.init() {
            Ok(()) => {
                *initialized = true;
                Ok(Value::Null)
            }
            Err(e) => Err(FailureReason::Failed(e)),
        },
        _ if !*initialized => Err(FailureReason::NotInitialized),
        other => service.call(other, call.args),
    };

    match result {
        Ok(value) => Status::Ok(value),
        Err(reason) => Status::Err(reason),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}

/// Builds one [`ThreadUnit`] per call, each with a fresh service.
pub struct ThreadUnitFactory<F> {
    make_service: Arc<F>,
}

impl<S, F> ThreadUnitFactory<F>
where
    S: UnitService,
    F: Fn() -> S + Send + Sync + 'static,
{
    pub fn new(make_service: F) -> Self {
        Self { make_service: Arc::new(make_service) }
    }
}

impl<S, F> UnitFactory for ThreadUnitFactory<F>
where
    S: UnitService,
    F: Fn() -> S + Send + Sync + 'static,
{
    fn create_unit(&self) -> unit::Result<Arc<dyn ComputeUnit>> {
        let make_service = self.make_service.clone();
        let unit = ThreadUnit::spawn(move || (*make_service)())?;
        Ok(Arc::new(unit))
    }
}
