//! # Backup Alert Poller
//!
//! A self-scheduling loop that re-fetches every known vehicle's alert list
//! through the REST layer on a fixed interval, independent of streaming
//! health. When the streaming channel is down, the user-visible alert lists
//! degrade gracefully to this eventually-consistent pull path; when it is up,
//! the poller simply refreshes the same cache the invalidation bridge marks
//! stale.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::rest::ApiClient;
use crate::state::AppState;

/// Fixed-interval alert re-fetcher.
pub struct AlertPoller {
    api: Arc<ApiClient>,
    state: AppState,
    interval: Duration,
}

impl AlertPoller {
    /// Builds a poller over the shared state and REST client.
    pub fn new(api: Arc<ApiClient>, state: AppState, interval: Duration) -> Self {
        Self { api, state, interval }
    }

    /// Main loop. The first cycle runs immediately, then every `interval`,
    /// until the shutdown channel fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Alert poller shutting down");
                    break;
                }
                _ = tick.tick() => self.poll_once().await,
            }
        }
    }

    /// One polling cycle over the current fleet snapshot. Per-serial fetch
    /// errors are logged and retried on the next cycle.
    pub async fn poll_once(&self) {
        let vehicles = self.state.vehicles();
        for vehicle in vehicles.iter() {
            if vehicle.serial.is_empty() {
                continue;
            }
            match self.api.fetch_alerts_by_serial(&vehicle.serial).await {
                Ok(alerts) => {
                    log::debug!("Polled {} alerts for {}", alerts.len(), vehicle.serial);
                    self.state.cache().put_alerts(&vehicle.serial, alerts);
                }
                Err(e) => {
                    log::warn!("Alert poll failed for {}: {e}", vehicle.serial);
                }
            }
        }
    }
}
