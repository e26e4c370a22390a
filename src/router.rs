//! Connection routing and the registry of live sessions.
//!
//! A [`Driver`] owns the primary pool and any replica pools. Each query runner is
//! bound to one connection the first time it needs one, picked by its replication
//! mode, and stays on that connection until it is released. The driver keeps every
//! bound session in a registry so [`Driver::shutdown`] can drain them before the
//! pools go away.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rand::Rng;

use crate::client::{ClientConnection, ClientPool};
use crate::config::RunnerConfig;
use crate::error::QueryRunnerError;
use crate::events::{EventBroadcaster, TransactionListener};
use crate::runner::QueryRunner;
use crate::types::{ReplicationMode, SessionId};

/// Connection slot of one session, shared with the driver's registry.
pub(crate) struct SessionSlot {
    pub(crate) id: SessionId,
    released: AtomicBool,
    pub(crate) connection: tokio::sync::Mutex<Option<Box<dyn ClientConnection>>>,
}

impl SessionSlot {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            released: AtomicBool::new(false),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns whether the slot was still live.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Mark released, wait for any statement in flight, then let go of the connection.
    pub(crate) async fn drain(&self) {
        self.mark_released();
        let mut connection = self.connection.lock().await;
        connection.take();
    }
}

pub struct Driver {
    master: Arc<dyn ClientPool>,
    slaves: Vec<Arc<dyn ClientPool>>,
    config: RunnerConfig,
    listeners: RwLock<EventBroadcaster>,
    live: Mutex<LiveSessions>,
    next_session: AtomicU64,
}

#[derive(Default)]
struct LiveSessions {
    slots: Vec<Arc<SessionSlot>>,
    closed: bool,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("slaves", &self.slaves.len())
            .field("config", &self.config)
            .field("live_sessions", &self.live_sessions().len())
            .finish_non_exhaustive()
    }
}

impl Driver {
    #[must_use]
    pub fn new(master: Arc<dyn ClientPool>, config: RunnerConfig) -> Self {
        Self {
            master,
            slaves: Vec::new(),
            config,
            listeners: RwLock::new(EventBroadcaster::default()),
            live: Mutex::new(LiveSessions::default()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Replica pools that `ReplicationMode::Slave` sessions are spread across.
    #[must_use]
    pub fn with_slaves(mut self, slaves: Vec<Arc<dyn ClientPool>>) -> Self {
        self.slaves = slaves;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Register a listener that every query runner created afterwards receives.
    pub fn subscribe(&self, listener: Arc<dyn TransactionListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.subscribe(listener),
            Err(poisoned) => poisoned.into_inner().subscribe(listener),
        }
    }

    /// Create an unbound query runner; it connects on first use.
    #[must_use]
    pub fn create_query_runner(self: &Arc<Self>, mode: ReplicationMode) -> QueryRunner {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let hooks = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        QueryRunner::new(Arc::clone(self), Arc::new(SessionSlot::new(id)), mode, hooks)
    }

    /// Ids of the sessions currently bound to a connection.
    #[must_use]
    pub fn live_sessions(&self) -> Vec<SessionId> {
        self.lock_live().slots.iter().map(|slot| slot.id).collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_live().closed
    }

    /// Pick the pool for `mode`: the primary, or a uniformly random replica.
    /// Without replicas, slave sessions fall back to the primary.
    fn select_pool(&self, mode: ReplicationMode) -> &Arc<dyn ClientPool> {
        match mode {
            ReplicationMode::Master => &self.master,
            ReplicationMode::Slave if self.slaves.is_empty() => &self.master,
            ReplicationMode::Slave => {
                let idx = rand::thread_rng().gen_range(0..self.slaves.len());
                &self.slaves[idx]
            }
        }
    }

    /// Obtain a connection for `slot` and register the session as live.
    pub(crate) async fn bind(
        &self,
        slot: &Arc<SessionSlot>,
        mode: ReplicationMode,
    ) -> Result<Box<dyn ClientConnection>, QueryRunnerError> {
        if self.is_closed() {
            return Err(QueryRunnerError::ConnectionError("driver is shut down".into()));
        }
        let pool = Arc::clone(self.select_pool(mode));
        let connection = pool.connect().await?;

        let mut live = self.lock_live();
        if live.closed {
            return Err(QueryRunnerError::ConnectionError("driver is shut down".into()));
        }
        live.slots.push(Arc::clone(slot));
        tracing::debug!(session = %slot.id, mode = ?mode, "session bound to connection");
        Ok(connection)
    }

    pub(crate) fn deregister(&self, id: SessionId) {
        self.lock_live().slots.retain(|slot| slot.id != id);
    }

    /// Release every live session, then terminate the primary and replica clients.
    ///
    /// Sessions are drained first: a statement already running finishes before its
    /// connection is dropped. The drain timeout configured in [`RunnerConfig`] is
    /// handed to each pool.
    pub async fn shutdown(&self) {
        let slots = {
            let mut live = self.lock_live();
            live.closed = true;
            std::mem::take(&mut live.slots)
        };
        tracing::info!(sessions = slots.len(), "driver shutting down");

        for slot in &slots {
            slot.drain().await;
        }

        let timeout = self.config.shutdown_drain_timeout;
        self.master.shutdown(timeout).await;
        for slave in &self.slaves {
            slave.shutdown(timeout).await;
        }
        tracing::info!("driver shut down");
    }

    fn lock_live(&self) -> MutexGuard<'_, LiveSessions> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
