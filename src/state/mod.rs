pub mod channel;
pub mod context;
pub mod join_code;
pub mod leaderboard;
pub mod scoring;
pub mod state_machine;
pub mod tally;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::session_store::SessionStore, error::ServiceError,
    services::controller::SessionController,
};

pub use self::channel::ChannelHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId};

/// Handle shared by every request and background task.
pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, channels and running controllers.
pub struct AppState {
    store: RwLock<Option<Arc<dyn SessionStore>>>,
    hub: Arc<ChannelHub>,
    controllers: DashMap<Uuid, Arc<SessionController>>,
    answer_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    join_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    config: Arc<AppConfig>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            hub: Arc::new(ChannelHub::new(config.channel_capacity)),
            controllers: DashMap::new(),
            answer_locks: DashMap::new(),
            join_locks: DashMap::new(),
            config: Arc::new(config),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the store or fail with [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Broadcast hub carrying session events.
    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Controller driving a session in this process, if any.
    pub fn controller(&self, session_id: Uuid) -> Option<Arc<SessionController>> {
        self.controllers
            .get(&session_id)
            .map(|entry| entry.value().clone())
    }

    /// Register a controller, returning the one already registered if present.
    pub fn register_controller(&self, controller: Arc<SessionController>) -> Arc<SessionController> {
        self.controllers
            .entry(controller.session_id())
            .or_insert(controller)
            .value()
            .clone()
    }

    /// Number of sessions driven in this process.
    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Forget a controller once its session ended.
    pub fn remove_controller(&self, session_id: Uuid) -> Option<Arc<SessionController>> {
        self.controllers
            .remove(&session_id)
            .map(|(_, controller)| controller)
    }

    /// Per-player lock serialising the duplicate check and the answer insert.
    pub fn answer_lock(&self, player_id: Uuid) -> Arc<Mutex<()>> {
        self.answer_locks.entry(player_id).or_default().value().clone()
    }

    /// Drop the answer lock of a player whose session is over.
    pub fn release_answer_lock(&self, player_id: Uuid) {
        self.answer_locks.remove(&player_id);
    }

    /// Per-session lock serialising join admission checks and the rows they write.
    pub fn join_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.join_locks.entry(session_id).or_default().value().clone()
    }

    /// Drop the join lock of a session that no longer admits players.
    pub fn release_join_lock(&self, session_id: Uuid) {
        self.join_locks.remove(&session_id);
    }

    /// Answer and join locks currently held in the maps.
    #[cfg(test)]
    pub(crate) fn lock_counts(&self) -> (usize, usize) {
        (self.answer_locks.len(), self.join_locks.len())
    }
}
