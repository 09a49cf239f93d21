//! # Process-Wide Shared State
//!
//! One cheaply clonable handle owning the vehicle snapshot, the pull-query
//! cache and the connection-state singleton. The vehicle collection is an
//! atomically swapped immutable snapshot: writers build a fresh `Vec` through
//! the reconciler and swap it in, readers clone an `Arc` and never block a
//! writer for longer than the swap.

use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::cache::QueryCache;
use crate::model::{TelemetryUpdate, Vehicle};
use crate::reconcile;

/// Lifecycle states of the single streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A connect or an automatic reconnect is in flight.
    Connecting,
    /// The stream is open.
    Connected,
    /// A deliberate close is winding down.
    Closing,
}

/// Connection lifecycle events published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The stream opened (or re-opened).
    Connected,
    /// A reconnect was scheduled after a failure.
    Reconnecting {
        /// 1-based consecutive attempt number.
        attempt: u32,
    },
    /// The reconnect budget is exhausted; no further automatic retries.
    GaveUp,
    /// The stream closed deliberately.
    Disconnected,
}

/// Shared application state handle.
#[derive(Clone)]
pub struct AppState {
    vehicles: Arc<RwLock<Arc<Vec<Arc<Vehicle>>>>>,
    cache: Arc<QueryCache>,
    status: Arc<RwLock<ConnectionStatus>>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl AppState {
    /// Creates empty shared state.
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            vehicles: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            cache: Arc::new(QueryCache::new()),
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            status_tx,
        }
    }

    /// Current vehicle snapshot.
    pub fn vehicles(&self) -> Arc<Vec<Arc<Vehicle>>> {
        Arc::clone(&self.vehicles.read().expect("vehicle snapshot lock poisoned"))
    }

    /// Replaces the whole fleet (bootstrap and re-login path).
    pub fn set_vehicles(&self, vehicles: Vec<Arc<Vehicle>>) {
        let mut guard = self.vehicles.write().expect("vehicle snapshot lock poisoned");
        *guard = Arc::new(vehicles);
    }

    /// Runs one telemetry batch through the reconciler and swaps the snapshot.
    pub fn apply_telemetry(&self, updates: &[TelemetryUpdate]) {
        if updates.is_empty() {
            return;
        }
        let mut guard = self.vehicles.write().expect("vehicle snapshot lock poisoned");
        let next = reconcile::merge_updates(&guard, updates);
        *guard = Arc::new(next);
    }

    /// The pull-query cache shared by the invalidation bridge and the poller.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Current connection lifecycle state.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.read().expect("connection status lock poisoned")
    }

    /// Claims the right to open a connection. Returns false when a connection
    /// already exists or is being established (or torn down) — at most one
    /// live connection per process.
    pub(crate) fn begin_connecting(&self) -> bool {
        let mut status = self.status.write().expect("connection status lock poisoned");
        match *status {
            ConnectionStatus::Disconnected => {
                *status = ConnectionStatus::Connecting;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_connection_status(&self, next: ConnectionStatus) {
        let mut status = self.status.write().expect("connection status lock poisoned");
        if *status != next {
            log::debug!("Connection status: {:?} -> {next:?}", *status);
            *status = next;
        }
    }

    /// Completes a deliberate close: Closing -> Disconnected. A no-op in any
    /// other state, so a late closer cannot clobber a newer connection.
    pub(crate) fn finish_closing(&self) {
        let mut status = self.status.write().expect("connection status lock poisoned");
        if *status == ConnectionStatus::Closing {
            *status = ConnectionStatus::Disconnected;
        }
    }

    pub(crate) fn publish(&self, event: StatusEvent) {
        // Lagging or absent observers are not an error.
        let _ = self.status_tx.send(event);
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MotionStatus;

    #[test]
    fn telemetry_batch_swaps_the_snapshot() {
        let state = AppState::new();
        state.set_vehicles(vec![Arc::new(Vehicle::new("1", "BMW X3", "CA 1234", "ABC1"))]);

        let update = TelemetryUpdate {
            device_serial: "ABC1".to_string(),
            latitude: None,
            longitude: None,
            speed: Some(42.0),
            ignition: None,
        };
        state.apply_telemetry(&[update]);

        let snapshot = state.vehicles();
        assert_eq!(snapshot[0].speed, 42.0);
        assert_eq!(snapshot[0].motion(), MotionStatus::Moving);
    }

    #[test]
    fn begin_connecting_claims_exactly_once() {
        let state = AppState::new();
        assert!(state.begin_connecting());
        assert!(!state.begin_connecting());
        assert_eq!(state.connection_status(), ConnectionStatus::Connecting);

        state.set_connection_status(ConnectionStatus::Connected);
        assert!(!state.begin_connecting());

        state.set_connection_status(ConnectionStatus::Disconnected);
        assert!(state.begin_connecting());
    }

    #[test]
    fn finish_closing_only_applies_to_closing() {
        let state = AppState::new();
        state.set_connection_status(ConnectionStatus::Connected);
        state.finish_closing();
        assert_eq!(state.connection_status(), ConnectionStatus::Connected);

        state.set_connection_status(ConnectionStatus::Closing);
        state.finish_closing();
        assert_eq!(state.connection_status(), ConnectionStatus::Disconnected);
    }
}
