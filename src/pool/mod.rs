// src/pool/mod.rs

//! Engine pool: which registered engines are idle, which are running a task.
//!
//! Invariants:
//! - an eligible engine id is either in the idle queue or in the active map,
//!   never both (except that after shutdown the idle queue only holds the
//!   shutdown sentinel and released engines are dropped);
//! - `shutdown` flips at most once;
//! - `drain` returns only once the active map is empty.
//!
//! All state sits behind one mutex owned by the pool. Mailbox traffic (the
//! shutdown broadcast) happens outside it.

pub mod registration;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::mailbox::{keys, Assignment, Mailbox, Message};
use crate::stream::TaskStream;
use crate::types::{Engine, EngineId, TaskIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum IdleSlot {
    Engine(EngineId),
    /// Placed in the idle queue by `shutdown`; never consumed.
    Sentinel,
}

/// Result of [`EnginePool::get_engine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    Engine(Engine),
    /// The pool is shutting down; stop dispatching.
    Shutdown,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<IdleSlot>,
    active: HashMap<EngineId, TaskIndex>,
    draining: bool,
    shutdown: bool,
}

/// Point-in-time view of the pool, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub idle: Vec<EngineId>,
    pub active: BTreeMap<EngineId, TaskIndex>,
    pub sentinel_queued: bool,
    pub draining: bool,
    pub shutdown: bool,
}

pub struct EnginePool {
    mailbox: Arc<dyn Mailbox>,
    /// Eligible engines and their hosts; fixed for the run.
    members: BTreeMap<EngineId, String>,
    /// Every engine that registered, eligible or surplus.
    registered: Vec<EngineId>,
    state: Mutex<PoolState>,
    idle_ready: Notify,
    drained: Notify,
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("members", &self.members)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl EnginePool {
    /// Build a pool from an already decided membership.
    ///
    /// `eligible` engines start idle, in the given order. `surplus` engines
    /// are only remembered so shutdown can address their inboxes too.
    pub fn with_engines(mailbox: Arc<dyn Mailbox>, eligible: Vec<Engine>, surplus: Vec<Engine>) -> Self {
        let mut state = PoolState::default();
        let mut members = BTreeMap::new();
        let mut registered = Vec::with_capacity(eligible.len() + surplus.len());

        for engine in eligible {
            state.idle.push_back(IdleSlot::Engine(engine.id.clone()));
            registered.push(engine.id.clone());
            members.insert(engine.id, engine.host);
        }
        registered.extend(surplus.into_iter().map(|engine| engine.id));

        Self {
            mailbox,
            members,
            registered,
            state: Mutex::new(state),
            idle_ready: Notify::new(),
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn host_of(&self, engine_id: &str) -> Option<&str> {
        self.members.get(engine_id).map(String::as_str)
    }

    /// Eligible engines, ordered by id.
    pub fn engines(&self) -> Vec<Engine> {
        self.members
            .iter()
            .map(|(id, host)| Engine::new(id.clone(), host.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        PoolSnapshot {
            idle: state
                .idle
                .iter()
                .filter_map(|slot| match slot {
                    IdleSlot::Engine(id) => Some(id.clone()),
                    IdleSlot::Sentinel => None,
                })
                .collect(),
            active: state
                .active
                .iter()
                .map(|(id, index)| (id.clone(), *index))
                .collect(),
            sentinel_queued: state.idle.contains(&IdleSlot::Sentinel),
            draining: state.draining,
            shutdown: state.shutdown,
        }
    }

    /// Wait for an idle engine and mark it active for task `index`.
    ///
    /// Returns [`Acquired::Shutdown`] once the shutdown sentinel is at the
    /// head of the idle queue. The sentinel is left in place so every other
    /// caller observes it as well.
    pub async fn get_engine(&self, index: TaskIndex) -> Acquired {
        loop {
            let ready = self.idle_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut state = self.lock();
                match state.idle.pop_front() {
                    Some(IdleSlot::Sentinel) => {
                        state.idle.push_front(IdleSlot::Sentinel);
                        return Acquired::Shutdown;
                    }
                    Some(IdleSlot::Engine(id)) => {
                        if state.draining {
                            warn!(engine = %id, task = index, "got an engine while draining");
                        }
                        state.active.insert(id.clone(), index);
                        let host = self.members.get(&id).cloned().unwrap_or_default();
                        debug!(engine = %id, %host, task = index, "engine acquired");
                        return Acquired::Engine(Engine::new(id, host));
                    }
                    None => {}
                }
            }

            ready.await;
        }
    }

    /// Return an engine after its task finished (or was given up on).
    ///
    /// `completed` marks the task done in `stream`, which keeps it out of the
    /// remaining-work dump.
    pub fn release_engine(&self, engine_id: &str, stream: &TaskStream, index: TaskIndex, completed: bool) {
        let mut state = self.lock();

        info!(
            engine = engine_id,
            host = self.host_of(engine_id).unwrap_or("?"),
            task = index,
            completed,
            "releasing engine"
        );

        if state.active.remove(engine_id).is_none() {
            warn!(engine = engine_id, task = index, "released an engine that was not active");
        }

        if completed {
            stream.set_done(index);
        }

        if state.draining && state.active.is_empty() {
            debug!("last active engine released; waking drain");
            self.drained.notify_waiters();
        }

        if !state.shutdown {
            state.idle.push_back(IdleSlot::Engine(engine_id.to_string()));
            drop(state);
            self.idle_ready.notify_waiters();
        }
    }

    /// Block until no engine is active. Safe to call repeatedly.
    pub async fn drain(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            {
                let mut state = self.lock();
                if state.active.is_empty() {
                    state.draining = false;
                    return;
                }
                state.draining = true;
                debug!(active = state.active.len(), "waiting for active engines to drain");
            }

            drained.await;
        }
    }

    /// Stop handing out engines and tell every registered engine to quit.
    ///
    /// Only the first call has any effect.
    pub async fn shutdown(&self) {
        let first = {
            let mut state = self.lock();
            if state.shutdown {
                false
            } else {
                state.shutdown = true;
                state.idle.clear();
                state.idle.push_back(IdleSlot::Sentinel);
                true
            }
        };

        if !first {
            debug!("pool shutdown already performed");
            return;
        }

        info!("engine queue emptied; shutdown sentinel queued");
        self.idle_ready.notify_waiters();

        // Outside the pool lock: stores can race with releases.
        let bye = Message::Assignment(Assignment::Bye);
        for engine_id in &self.registered {
            if let Err(e) = self
                .mailbox
                .store(&keys::engine_task(engine_id), bye.clone())
                .await
            {
                warn!(engine = %engine_id, error = %e, "failed to send termination message");
            }
        }
        info!(engines = self.registered.len(), "termination messages sent");
    }
}
