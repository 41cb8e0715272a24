//! Keeps a storage backend installed and flips degraded mode when it goes away.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect, install the store, then watch it forever.
///
/// While the backend cannot be reached the application stays degraded and
/// every request touching storage answers 503.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                watch(&state, store.as_ref()).await;
                warn!("storage lost after repeated reconnect failures; connecting from scratch");
            }
            Err(err) => {
                warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "storage connection attempt failed");
            }
        }

        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the store health until reconnecting fails too many times in a row.
async fn watch(state: &SharedState, store: &dyn SessionStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed; entering degraded mode");
                state.update_degraded(true);
                if !reconnect(store).await {
                    return;
                }
                state.update_degraded(false);
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(store: &dyn SessionStore) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnected");
                return true;
            }
            Err(err) => {
                warn!(attempt, error = %err, "storage reconnect attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::session_store::MemorySessionStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn installs_store_and_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded());

        let store = MemorySessionStore::new();
        let supervised = state.clone();
        let handle = tokio::spawn(run(supervised, move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn SessionStore>) }
        }));

        tokio::task::yield_now().await;
        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());
        assert!(state.require_store().await.is_ok());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_health_check_enters_degraded_mode_until_reconnected() {
        let state = AppState::new(AppConfig::default());
        let store = MemorySessionStore::new();
        state.install_store(Arc::new(store.clone())).await;

        // health check plus the first reconnect attempt fail
        store.fail_next_operations(2);
        let watched = state.clone();
        let handle = tokio::spawn(async move {
            watch(&watched, &store).await;
        });

        sleep(Duration::from_millis(10)).await;
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_store().await,
            Err(crate::error::ServiceError::Degraded)
        ));

        sleep(Duration::from_secs(2)).await;
        assert!(!state.is_degraded());
        handle.abort();
    }
}
