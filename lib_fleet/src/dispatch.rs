//! # Message Dispatcher
//!
//! Takes raw inbound frames, classifies them through the parse boundary and
//! routes each kind to its consumer: telemetry batches to the reconciler,
//! alerts to the invalidation bridge and the notification relay. Dispatch is
//! synchronous relative to the receive callback — two frames from the same
//! connection are never processed concurrently.

use crate::cache::QueryKind;
use crate::error::SyncError;
use crate::model::{classify_frame, Alert, InboundFrame, TelemetryUpdate};
use crate::notify::NotificationRelay;
use crate::state::AppState;

/// Routes inbound frames into shared state.
#[derive(Clone)]
pub struct Dispatcher {
    state: AppState,
    relay: NotificationRelay,
}

impl Dispatcher {
    /// Builds a dispatcher over the shared state and notification relay.
    pub fn new(state: AppState, relay: NotificationRelay) -> Self {
        Self { state, relay }
    }

    /// Handles one raw text frame. Parse failures and unknown kinds cost the
    /// single frame, never the connection.
    pub fn dispatch(&self, raw: &str) {
        match classify_frame(raw) {
            Ok(frame) => self.route(frame),
            Err(SyncError::UnknownFrameType(kind)) => {
                log::warn!("Discarding frame of unknown type '{kind}'");
            }
            Err(e) => {
                log::warn!("Discarding malformed frame: {e}");
            }
        }
    }

    fn route(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Gps(updates) => self.apply_telemetry(updates, QueryKind::Gps),
            InboundFrame::Speed(updates) => self.apply_telemetry(updates, QueryKind::Speed),
            InboundFrame::Engine(updates) => self.apply_telemetry(updates, QueryKind::Ignition),
            InboundFrame::Alerts(alerts) => self.handle_alerts(alerts),
            InboundFrame::AllTickets | InboundFrame::AllAlerts | InboundFrame::AllRisks => {
                log::trace!("Bulk frame classified and ignored");
            }
            InboundFrame::Pong => {
                log::trace!("Heartbeat pong received");
            }
        }
    }

    fn apply_telemetry(&self, updates: Vec<TelemetryUpdate>, kind: QueryKind) {
        self.state.apply_telemetry(&updates);
        // The matching pull queries are now behind the stream; mark them.
        for update in &updates {
            self.state.cache().invalidate(kind, &update.device_serial);
        }
    }

    /// The cache invalidation bridge plus the notification decision: each
    /// alert marks its serial's pull cache stale and raises one notification
    /// request. Orphan alerts (no serial) skip invalidation but still notify.
    fn handle_alerts(&self, alerts: Vec<Alert>) {
        for alert in &alerts {
            if let Some(serial) = alert.device_serial.as_deref() {
                self.state.cache().invalidate(QueryKind::Alerts, serial);
            }
            self.relay.notify_alert(alert);
        }
    }
}
