//! Background task keeping the bridge in sync with storage and the auth
//! service for as long as its [`BridgeHandle`] is alive.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SessionBridge;
use crate::storage::keys;

/// Bounds applied to the configured poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Owns the background task; dropping it aborts the task
pub struct BridgeHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop watching and wait for the task to wind down
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Session bridge task ended abnormally");
                }
            }
        }

        info!("Session bridge stopped");
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl SessionBridge {
    /// Run the initial reconciliation, then keep watching the legacy user
    /// record (poll + storage events) and the auth change feed.
    pub async fn start(self: &Arc<Self>) -> BridgeHandle {
        // Subscribe before reconciling so no change slips between the two
        let mut storage_events = self.storage.subscribe();
        let mut auth_events = self.provider.subscribe();

        self.reconcile().await;

        let period = self
            .settings
            .poll_interval
            .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        if period != self.settings.poll_interval {
            warn!(
                requested = ?self.settings.poll_interval,
                using = ?period,
                "Poll interval out of range, clamped"
            );
        }
        info!(poll_interval = ?period, "Starting session bridge task");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let bridge = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut storage_open = true;
            let mut auth_open = true;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tick.tick() => {
                        bridge.check_legacy_user();
                    }
                    event = storage_events.recv(), if storage_open => match event {
                        Ok(event) if event.key == keys::LEGACY_USER => {
                            bridge.check_legacy_user();
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped = skipped, "Storage events lagged");
                            bridge.check_legacy_user();
                        }
                        Err(RecvError::Closed) => {
                            debug!("Storage event feed closed, relying on polling");
                            storage_open = false;
                        }
                    },
                    change = auth_events.recv(), if auth_open => match change {
                        Ok(change) => bridge.apply_auth_change(&change),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Auth events lagged, reconciling");
                            bridge.reconcile().await;
                        }
                        Err(RecvError::Closed) => {
                            debug!("Auth event feed closed");
                            auth_open = false;
                        }
                    },
                }
            }

            debug!("Session bridge task exiting");
        });

        BridgeHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}
