//! # Isolated Compute Unit
//!
//! A compute unit is an independently executing context with its own memory.
//! The host can only post byte messages to it and observe the events it
//! raises. Everything above this module (proxy, handshake, manager) is written
//! against the [`ComputeUnit`] trait, so a thread, a process, or a scripted
//! test double are interchangeable.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tracing::trace;

#[derive(Debug, Clone)]
pub enum Error {
    /// The unit could not be started.
    Spawn(String),
    /// The unit was terminated (or exited) and accepts no more messages.
    Terminated,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(msg) => write!(f, "Failed to start unit: {}", msg),
            Self::Terminated => write!(f, "Unit is terminated"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Strong type for unit identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Allocates a process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Classes of events a unit raises on its channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message (usually an encoded reply frame).
    Message,
    /// An execution fault inside the unit.
    Error,
    /// A message that could not be delivered or decoded.
    MessageError,
}

/// An event raised by a unit.
#[derive(Clone, Debug)]
pub enum UnitEvent {
    Message(Vec<u8>),
    Error(String),
    MessageError(String),
}

impl UnitEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::MessageError(_) => EventKind::MessageError,
        }
    }
}

/// Callback invoked for each event of the kind it was registered for.
///
/// Listeners may run on the unit's own thread; they must not block.
pub type Listener = Arc<dyn Fn(&UnitEvent) + Send + Sync>;

/// Handle returned by [`ComputeUnit::add_listener`].
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ListenerId(pub u64);

/// A handle to a running unit.
pub trait ComputeUnit: Send + Sync + 'static {
    fn id(&self) -> UnitId;

    /// Queues a message for the unit. Fails once the unit is terminated.
    fn post_message(&self, payload: Vec<u8>) -> Result<()>;

    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId;

    /// Returns false if the listener was not registered (or already removed).
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Stops the unit. Idempotent, and safe on a unit that never finished starting.
    fn terminate(&self);
}

/// Creates units on demand.
pub trait UnitFactory: Send + Sync + 'static {
    fn create_unit(&self) -> Result<Arc<dyn ComputeUnit>>;
}

struct Entry {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// Listener registry shared by unit implementations.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Entry { id, kind, listener });
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Invokes every listener registered for the event's kind.
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may add or remove listeners themselves.
    pub fn emit(&self, event: &UnitEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.listener.clone())
            .collect();

        trace!(?kind, listeners = matching.len(), "emitting unit event");
        for listener in matching {
            listener(event);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the listeners it registered when dropped.
///
/// Every path out of a scope holding a guard, early return or cancellation
/// included, leaves the unit with no listeners from that scope.
pub struct ListenerGuard {
    unit: Arc<dyn ComputeUnit>,
    ids: Vec<ListenerId>,
}

impl ListenerGuard {
    pub fn new(unit: Arc<dyn ComputeUnit>) -> Self {
        Self { unit, ids: Vec::new() }
    }

    pub fn listen(&mut self, kind: EventKind, listener: Listener) {
        let id = self.unit.add_listener(kind, listener);
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.unit.remove_listener(id);
        }
    }
}
