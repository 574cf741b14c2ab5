//! Idle connection reaper
//!
//! Recurring sweep that closes connections whose last liveness signal is
//! older than the timeout. Connections that have never pinged are left
//! alone until their first liveness exchange; see the sweep tests.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::SharedRegistry;

/// Handle to the recurring sweep task.
///
/// Spawned when the hub is created and cancelled on hub teardown.
pub struct IdleReaper {
    handle: JoinHandle<()>,
}

impl IdleReaper {
    /// Spawn the sweep loop against the shared registry.
    pub fn spawn(registry: SharedRegistry, interval: Duration, timeout: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so a fresh hub
            // does not sweep before anything could have gone idle.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = registry.write().await.reap_idle(timeout);
                for session in &reaped {
                    tracing::info!(session_id = %session.id, "Closing inactive connection");
                }
                if !reaped.is_empty() {
                    tracing::info!(count = reaped.len(), "Reaped idle connections");
                }
            }
        });
        Self { handle }
    }

    /// Stop the sweep loop.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
