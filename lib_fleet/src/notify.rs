//! # Notification Relay
//!
//! Decides when an alert becomes a host notification and hands it to the
//! platform surface without ever blocking frame dispatch. The surface itself
//! is a trait injected at the composition root, so tests and headless builds
//! swap it freely; an in-process broadcast channel carries the same requests
//! to any observer.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::model::Alert;

/// Title used when the server omitted the alert kind.
pub const GENERIC_TITLE: &str = "Vehicle Alert";
/// Body used when both message and kind are missing.
pub const GENERIC_BODY: &str = "A new vehicle alert was received.";

/// Host platform notification surface.
pub trait Notifier: Send + Sync {
    /// Requests one system notification. Failures are the caller's to log,
    /// never to propagate.
    fn display(&self, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Default surface for headless runs: writes the notification to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn display(&self, title: &str, body: &str) -> anyhow::Result<()> {
        log::info!("[notification] {title}: {body}");
        Ok(())
    }
}

/// One materialized notification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertNotification {
    /// Notification title: the alert kind, or a generic label.
    pub title: String,
    /// Notification body: message, falling back to kind, falling back to a
    /// generic string.
    pub body: String,
}

impl AlertNotification {
    /// Builds the request for one alert, applying the fallback chains.
    pub fn for_alert(alert: &Alert) -> Self {
        let kind = alert.kind.trim();
        let title = if kind.is_empty() { GENERIC_TITLE.to_string() } else { alert.kind.clone() };
        let message = alert.message.trim();
        let body = if !message.is_empty() {
            alert.message.clone()
        } else if !kind.is_empty() {
            alert.kind.clone()
        } else {
            GENERIC_BODY.to_string()
        };
        Self { title, body }
    }
}

/// Fans alert notifications out to the host surface and to subscribers.
#[derive(Clone)]
pub struct NotificationRelay {
    notifier: Arc<dyn Notifier>,
    tx: broadcast::Sender<AlertNotification>,
}

impl NotificationRelay {
    /// Creates a relay around the injected platform surface.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { notifier, tx }
    }

    /// Observer channel carrying every notification request.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertNotification> {
        self.tx.subscribe()
    }

    /// Requests a notification for one alert. Fire-and-forget with respect to
    /// the dispatcher: display runs on a spawned task, and a display failure
    /// (revoked permission, dead bus) is logged and contained.
    pub fn notify_alert(&self, alert: &Alert) {
        let request = AlertNotification::for_alert(alert);
        let _ = self.tx.send(request.clone());

        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.display(&request.title, &request.body) {
                log::warn!("Notification display failed for '{}': {e}", request.title);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: &str, message: &str) -> Alert {
        Alert {
            id: "a-1".to_string(),
            device_serial: Some("ABC1".to_string()),
            kind: kind.to_string(),
            message: message.to_string(),
            time: 0,
            time_raw: String::new(),
        }
    }

    #[test]
    fn title_and_body_fallback_chains() {
        let full = AlertNotification::for_alert(&alert("Door Open", "Door Open for BMW X3"));
        assert_eq!(full.title, "Door Open");
        assert_eq!(full.body, "Door Open for BMW X3");

        let no_message = AlertNotification::for_alert(&alert("Smash and Grab Detected", ""));
        assert_eq!(no_message.title, "Smash and Grab Detected");
        assert_eq!(no_message.body, "Smash and Grab Detected");

        let empty = AlertNotification::for_alert(&alert("", ""));
        assert_eq!(empty.title, GENERIC_TITLE);
        assert_eq!(empty.body, GENERIC_BODY);
    }

    #[tokio::test]
    async fn relay_publishes_to_subscribers() {
        let relay = NotificationRelay::new(Arc::new(LogNotifier));
        let mut rx = relay.subscribe();
        relay.notify_alert(&alert("Remote Jamming Detected", "Jamming near depot"));

        let request = rx.recv().await.unwrap();
        assert!(request.title.contains("Remote Jamming Detected"));
        assert_eq!(request.body, "Jamming near depot");
    }

    #[tokio::test]
    async fn failing_surface_is_contained() {
        struct Failing;
        impl Notifier for Failing {
            fn display(&self, _: &str, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("permission revoked")
            }
        }

        let relay = NotificationRelay::new(Arc::new(Failing));
        let mut rx = relay.subscribe();
        relay.notify_alert(&alert("Door Open", ""));
        // The request is still observable even though display fails.
        assert!(rx.recv().await.is_ok());
        tokio::task::yield_now().await;
    }
}
