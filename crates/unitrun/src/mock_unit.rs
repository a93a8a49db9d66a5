//! Scripted units for testing.
//!
//! A [`MockUnit`] answers frames synchronously from inside `post_message`
//! (or later, on a tokio timer) according to a [`MockScript`], and counts
//! every listener registration, removal and termination so tests can assert
//! on exact lifecycle behaviour. Not intended for production use.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;

use unitrpc::FailureReason;
use unitrpc::Frame;
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

/// How a unit answers `ping`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PingBehavior {
    Pong,
    /// Raise an `error` event instead of answering.
    ErrorEvent,
    /// Raise a `messageerror` event instead of answering.
    MessageErrorEvent,
    /// Never answer.
    Silent,
    /// Answer `pong` under a sequence number nobody is waiting for.
    WrongSeq,
}

/// How a unit answers `init`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitBehavior {
    Ok,
    Fail,
    Silent,
}

/// What a unit does with a business call.
#[derive(Clone, Debug)]
pub enum MockReply {
    Value(Value),
    Fail(FailureReason),
    ErrorEvent(String),
    Silent,
    /// Deliver the inner reply after a delay (requires a tokio runtime).
    After(Duration, Box<MockReply>),
}

/// Business call handler: `(unit index, method, args)`.
pub type Handler = Arc<dyn Fn(usize, &str, &Value) -> MockReply + Send + Sync>;

#[derive(Clone)]
pub struct MockScript {
    pub ping: PingBehavior,
    pub init: InitBehavior,
    pub handler: Handler,
}

impl MockScript {
    /// A unit that passes its handshake and answers calls with `handler`.
    pub fn healthy(handler: impl Fn(usize, &str, &Value) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            ping: PingBehavior::Pong,
            init: InitBehavior::Ok,
            handler: Arc::new(handler),
        }
    }

    /// A unit that passes its handshake and echoes call arguments.
    pub fn echo() -> Self {
        Self::healthy(|_, _, args| MockReply::Value(args.clone()))
    }

    pub fn ping(mut self, ping: PingBehavior) -> Self {
        self.ping = ping;
        self
    }

    pub fn init(mut self, init: InitBehavior) -> Self {
        self.init = init;
        self
    }
}

pub struct MockUnit {
    id: UnitId,
    index: usize,
    script: MockScript,
    listeners: Arc<Listeners>,
    listener_adds: AtomicUsize,
    listener_removes: AtomicUsize,
    terminate_calls: Arc<AtomicUsize>,
    calls: Mutex<Vec<String>>,
}

impl MockUnit {
    pub fn new(index: usize, script: MockScript) -> Self {
        Self {
            id: UnitId::next(),
            index,
            script,
            listeners: Arc::new(Listeners::new()),
            listener_adds: AtomicUsize::new(0),
            listener_removes: AtomicUsize::new(0),
            terminate_calls: Arc::new(AtomicUsize::new(0)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Position of this unit in its factory's creation order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn listener_adds(&self) -> usize {
        self.listener_adds.load(Ordering::SeqCst)
    }

    pub fn listener_removes(&self) -> usize {
        self.listener_removes.load(Ordering::SeqCst)
    }

    /// Listeners currently attached.
    pub fn live_listeners(&self) -> usize {
        self.listeners.len()
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate_calls() > 0
    }

    /// Methods received, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Raises an event as if the unit had produced it.
    pub fn emit(&self, event: UnitEvent) {
        if !self.is_terminated() {
            self.listeners.emit(&event);
        }
    }

    fn reply(&self, frame: Frame) {
        match frame.encode() {
            Ok(bytes) => self.emit(UnitEvent::Message(bytes)),
            Err(e) => self.emit(UnitEvent::MessageError(e.to_string())),
        }
    }

    fn deliver(&self, seq: u64, reply: MockReply) {
        match reply {
            MockReply::Value(value) => self.reply(Frame::reply_ok(seq, value)),
            MockReply::Fail(reason) => self.reply(Frame::reply_err(seq, reason)),
            MockReply::ErrorEvent(msg) => self.emit(UnitEvent::Error(msg)),
            MockReply::Silent => {}
            MockReply::After(delay, inner) => {
                let listeners = self.listeners.clone();
                let terminated = self.terminate_calls.clone();
                let frame = match *inner {
                    MockReply::Value(value) => Frame::reply_ok(seq, value),
                    MockReply::Fail(reason) => Frame::reply_err(seq, reason),
                    _ => return,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if terminated.load(Ordering::SeqCst) > 0 {
                        return;
                    }
                    if let Ok(bytes) = frame.encode() {
                        listeners.emit(&UnitEvent::Message(bytes));
                    }
                });
            }
        }
    }
}

impl ComputeUnit for MockUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn post_message(&self, payload: Vec<u8>) -> unit::Result<()> {
        if self.is_terminated() {
            return Err(unit::Error::Terminated);
        }

        let call = match Frame::decode(&payload) {
            Ok(Frame::Call(call)) => call,
            Ok(Frame::Reply(_)) => {
                self.emit(UnitEvent::MessageError("unexpected reply frame".into()));
                return Ok(());
            }
            Err(e) => {
                self.emit(UnitEvent::MessageError(e.to_string()));
                return Ok(());
            }
        };

        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.method.clone());

        match call.method.as_str() {
            method::PING => match self.script.ping {
                PingBehavior::Pong => self.reply(Frame::reply_ok(call.seq, Value::from(unitrpc::PONG))),
                PingBehavior::ErrorEvent => self.emit(UnitEvent::Error("unit crashed during ping".into())),
                PingBehavior::MessageErrorEvent => {
                    self.emit(UnitEvent::MessageError("ping could not be delivered".into()))
                }
                PingBehavior::Silent => {}
                PingBehavior::WrongSeq => {
                    self.reply(Frame::reply_ok(call.seq + 1000, Value::from(unitrpc::PONG)))
                }
            },
            method::INIT => match self.script.init {
                InitBehavior::Ok => self.reply(Frame::reply_ok(call.seq, Value::Null)),
                InitBehavior::Fail => {
                    self.reply(Frame::reply_err(call.seq, FailureReason::Failed("payload failed to load".into())))
                }
                InitBehavior::Silent => {}
            },
            other => {
                let reply = (self.script.handler)(self.index, other, &call.args);
                self.deliver(call.seq, reply);
            }
        }

        Ok(())
    }

    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.listener_adds.fetch_add(1, Ordering::SeqCst);
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listener_removes.fetch_add(1, Ordering::SeqCst);
        self.listeners.remove(id)
    }

    fn terminate(&self) {
        if self.terminate_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.listeners.clear();
        }
    }
}

/// Builds [`MockUnit`]s from a per-index script and remembers all of them.
pub struct MockFactory {
    script: Box<dyn Fn(usize) -> MockScript + Send + Sync>,
    fail_create: bool,
    units: Mutex<Vec<Arc<MockUnit>>>,
}

impl MockFactory {
    /// `script(i)` decides how the `i`-th created unit (from 0) behaves.
    pub fn new(script: impl Fn(usize) -> MockScript + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            fail_create: false,
            units: Mutex::new(Vec::new()),
        }
    }

    /// Every unit behaves the same.
    pub fn uniform(script: MockScript) -> Self {
        Self::new(move |_| script.clone())
    }

    /// A factory whose units can never be started.
    pub fn failing() -> Self {
        let mut factory = Self::uniform(MockScript::echo());
        factory.fail_create = true;
        factory
    }

    pub fn units(&self) -> Vec<Arc<MockUnit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn created(&self) -> usize {
        self.units.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn unit(&self, index: usize) -> Option<Arc<MockUnit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner).get(index).cloned()
    }
}

impl UnitFactory for MockFactory {
    fn create_unit(&self) -> unit::Result<Arc<dyn ComputeUnit>> {
        if self.fail_create {
            return Err(unit::Error::Spawn("mock factory refuses to start units".into()));
        }
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        let index = units.len();
        let unit = Arc::new(MockUnit::new(index, (self.script)(index)));
        units.push(unit.clone());
        Ok(unit)
    }
}
