//! # Worker Manager
//!
//! Owns the unit and proxy for one role and hands out a verified-healthy
//! proxy. The role's state is a single slot:
//!
//! - `Empty`: nothing alive; the next caller starts a creation
//! - `Creating`: one creation is in flight; every caller awaits the same one
//! - `Ready`: the handshake succeeded for the unit held here
//!
//! The slot is only ever replaced as a whole, under a lock that is never held
//! across an await on the unit. Creation runs on its own task so a caller that
//! gives up cannot strand the callers sharing it.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::UnitConfig;
use crate::handshake;
use crate::proxy::RpcProxy;
use crate::unit;
use crate::unit::ComputeUnit;
use crate::unit::EventKind;
use crate::unit::ListenerGuard;
use crate::unit::UnitEvent;
use crate::unit::UnitFactory;

#[derive(Debug, Clone)]
pub enum Error {
    /// The factory could not create a unit.
    Create(unit::Error),
    /// The unit was created but failed its handshake.
    Handshake(handshake::Error),
    /// The manager was destroyed while this creation was in flight.
    Superseded,
    /// The creation task itself died.
    Aborted(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create(e) => write!(f, "Unit creation failed: {}", e),
            Self::Handshake(e) => write!(f, "Handshake failed: {}", e),
            Self::Superseded => write!(f, "Unit creation superseded by destroy"),
            Self::Aborted(msg) => write!(f, "Unit creation aborted: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Create(e) => Some(e),
            Self::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

impl From<handshake::Error> for Error {
    fn from(e: handshake::Error) -> Self {
        Self::Handshake(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

type Creation = Shared<BoxFuture<'static, Result<Arc<RpcProxy>>>>;

/// A verified unit and everything attached to it.
struct Live {
    unit: Arc<dyn ComputeUnit>,
    proxy: Arc<RpcProxy>,
    diagnostics: ListenerGuard,
}

impl Live {
    /// Best effort; never fails.
    fn teardown(self) {
        let Live { unit, proxy, diagnostics } = self;
        drop(diagnostics);
        proxy.close();
        unit.terminate();
        debug!(unit = %unit.id(), "unit torn down");
    }
}

enum Slot {
    Empty,
    Creating(Creation),
    Ready(Live),
}

struct State {
    /// Bumped by every destroy; a creation only installs itself if the
    /// generation it started in is still current.
    generation: u64,
    slot: Slot,
}

struct Inner {
    role: String,
    factory: Arc<dyn UnitFactory>,
    config: UnitConfig,
    state: Mutex<State>,
    units_created: AtomicUsize,
}

/// Lifecycle owner of the unit serving one role.
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl WorkerManager {
    pub fn new(role: impl Into<String>, factory: Arc<dyn UnitFactory>, config: UnitConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                role: role.into(),
                factory,
                config,
                state: Mutex::new(State { generation: 0, slot: Slot::Empty }),
                units_created: AtomicUsize::new(0),
            }),
        }
    }

    pub fn role(&self) -> &str {
        &self.inner.role
    }

    pub fn config(&self) -> &UnitConfig {
        &self.inner.config
    }

    /// Units this manager has created over its lifetime.
    pub fn units_created(&self) -> usize {
        self.inner.units_created.load(Ordering::Relaxed)
    }

    /// True once a unit has passed its handshake and not been torn down since.
    pub async fn is_ready(&self) -> bool {
        matches!(self.inner.state.lock().await.slot, Slot::Ready(_))
    }

    /// Returns the healthy proxy for this role, creating and verifying a unit
    /// first if there is none. Concurrent callers share one creation.
    pub async fn get_or_create(&self) -> Result<Arc<RpcProxy>> {
        let creation = {
            let mut state = self.inner.state.lock().await;
            let in_flight = match &state.slot {
                Slot::Ready(live) => return Ok(live.proxy.clone()),
                Slot::Creating(creation) => Some(creation.clone()),
                Slot::Empty => None,
            };

            match in_flight {
                Some(creation) => {
                    trace!(role = %self.inner.role, "joining in-flight creation");
                    creation
                }
                None => {
                    let generation = state.generation;
                    let inner = self.inner.clone();
                    let task = tokio::spawn({
                        let inner = inner.clone();
                        async move { inner.create(generation).await }
                    });
                    let creation = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                // the task never reached its own cleanup
                                warn!(role = %inner.role, error = %e, "creation task died");
                                inner.reset(generation).await;
                                Err(Error::Aborted(e.to_string()))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    state.slot = Slot::Creating(creation.clone());
                    creation
                }
            }
        };

        creation.await
    }

    /// Tears down `proxy`'s unit, but only if it is still the live one.
    ///
    /// A caller whose call failed retires the unit it used; if another caller
    /// already replaced that unit, the replacement is left alone.
    pub async fn discard(&self, proxy: &Arc<RpcProxy>) {
        let retired = {
            let mut state = self.inner.state.lock().await;
            let is_current = matches!(&state.slot, Slot::Ready(live) if Arc::ptr_eq(&live.proxy, proxy));
            if !is_current {
                trace!(role = %self.inner.role, "discarded unit already replaced");
                return;
            }
            state.generation += 1;
            std::mem::replace(&mut state.slot, Slot::Empty)
        };

        if let Slot::Ready(live) = retired {
            warn!(role = %self.inner.role, unit = %live.unit.id(), "discarding failed unit");
            live.teardown();
        }
    }

    /// Tears down whatever this role holds. Always safe, including when empty.
    pub async fn destroy(&self) {
        let previous = {
            let mut state = self.inner.state.lock().await;
            state.generation += 1;
            std::mem::replace(&mut state.slot, Slot::Empty)
        };

        match previous {
            Slot::Ready(live) => {
                info!(role = %self.inner.role, unit = %live.unit.id(), "destroying unit");
                live.teardown();
            }
            // the creation task sees the new generation and cleans up after itself
            Slot::Creating(_) => debug!(role = %self.inner.role, "abandoning in-flight creation"),
            Slot::Empty => {}
        }
    }
}

impl Inner {
    async fn create(self: Arc<Self>, generation: u64) -> Result<Arc<RpcProxy>> {
        let unit = match self.factory.create_unit() {
            Ok(unit) => unit,
            Err(e) => {
                warn!(role = %self.role, error = %e, "unit creation failed");
                self.reset(generation).await;
                return Err(Error::Create(e));
            }
        };
        self.units_created.fetch_add(1, Ordering::Relaxed);
        debug!(role = %self.role, unit = %unit.id(), "created unit");

        let proxy = Arc::new(RpcProxy::wrap(unit.clone()).with_call_timeout(self.config.call_timeout));
        let diagnostics = self.diagnostics(&unit);
        let live = Live { unit, proxy: proxy.clone(), diagnostics };

        if let Err(e) = handshake::run(&proxy, &self.config).await {
            warn!(role = %self.role, unit = %live.unit.id(), error = %e, "handshake failed");
            live.teardown();
            self.reset(generation).await;
            return Err(Error::Handshake(e));
        }

        let mut state = self.state.lock().await;
        if state.generation != generation {
            drop(state);
            debug!(role = %self.role, unit = %live.unit.id(), "creation superseded");
            live.teardown();
            return Err(Error::Superseded);
        }

        info!(role = %self.role, unit = %live.unit.id(), "unit ready");
        state.slot = Slot::Ready(live);
        Ok(proxy)
    }

    /// Clears a failed creation, unless a destroy already moved on from it.
    async fn reset(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation && matches!(state.slot, Slot::Creating(_)) {
            state.slot = Slot::Empty;
        }
    }

    /// Listeners that stay attached for the unit's whole life and only log.
    fn diagnostics(&self, unit: &Arc<dyn ComputeUnit>) -> ListenerGuard {
        let mut guard = ListenerGuard::new(unit.clone());
        let id = unit.id();

        let role = self.role.clone();
        guard.listen(EventKind::Message, Arc::new(move |event: &UnitEvent| {
            if let UnitEvent::Message(bytes) = event {
                trace!(%role, unit = %id, bytes = bytes.len(), "unit message");
            }
        }));

        let role = self.role.clone();
        guard.listen(EventKind::Error, Arc::new(move |event: &UnitEvent| {
            if let UnitEvent::Error(msg) = event {
                warn!(%role, unit = %id, error = %msg, "unit error event");
            }
        }));

        let role = self.role.clone();
        guard.listen(EventKind::MessageError, Arc::new(move |event: &UnitEvent| {
            if let UnitEvent::MessageError(msg) = event {
                warn!(%role, unit = %id, error = %msg, "unit messageerror event");
            }
        }));

        guard
    }
}
