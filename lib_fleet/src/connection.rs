//! # Connection Manager
//!
//! Owns the lifecycle of the single persistent WebSocket connection to the
//! telemetry server: connect, register, heartbeat, detect failure, reconnect
//! with capped exponential backoff, deliberate teardown.
//!
//! A deliberate `disconnect()` and a failure-triggered close are distinct: a
//! generation counter (a `watch` channel) is bumped on every deliberate
//! close, and every pending reconnect checks its generation before firing,
//! so no timer from a torn-down session can resurrect the connection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use crate::dispatch::Dispatcher;
use crate::error::SyncError;
use crate::model;
use crate::state::{AppState, ConnectionStatus, StatusEvent};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Reconnect budget and backoff bounds.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Maximum consecutive automatic reconnect attempts.
    pub max_attempts: u32,
    /// Delay before the first reconnect, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before the given 1-based attempt: `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(raw.min(self.max_delay_ms))
    }

    /// True while the consecutive-failure count leaves budget for one more
    /// automatic attempt.
    pub fn should_retry(&self, failures_so_far: u32) -> bool {
        failures_so_far < self.max_attempts
    }
}

/// Static connection parameters, resolved from configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Telemetry WebSocket endpoint.
    pub ws_url: String,
    /// Heartbeat (ping) period.
    pub heartbeat_interval: Duration,
    /// Reconnect policy.
    pub policy: ReconnectPolicy,
    /// Primary device serial sent with the register frame, when known.
    pub device_serial: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:3003".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            policy: ReconnectPolicy::default(),
            device_serial: None,
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    state: AppState,
    dispatcher: Dispatcher,
    attempts: AtomicU32,
    registered: AtomicBool,
    token: RwLock<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    generation: watch::Sender<u64>,
}

/// Handle to the single streaming connection. Cheap to clone; all clones
/// drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Builds the manager. No connection is opened until `connect()`.
    pub fn new(config: ConnectionConfig, state: AppState, dispatcher: Dispatcher) -> Self {
        let (generation, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                dispatcher,
                attempts: AtomicU32::new(0),
                registered: AtomicBool::new(false),
                token: RwLock::new(None),
                outbound: Mutex::new(None),
                generation,
            }),
        }
    }

    /// Stores the push-routing token. Registration fires on the next
    /// opportunity (connect or heartbeat tick) if it has not happened yet.
    pub fn set_token(&self, token: String) {
        *self.inner.token.write().expect("token lock poisoned") = Some(token);
    }

    /// Opens the connection. Idempotent: a no-op while already Connected or
    /// Connecting (and while a previous session is still Closing).
    pub fn connect(&self) {
        if !self.inner.state.begin_connecting() {
            log::debug!("connect() ignored, status is {:?}", self.inner.state.connection_status());
            return;
        }
        self.inner.attempts.store(0, Ordering::SeqCst);
        let mut gen_rx = self.inner.generation.subscribe();
        let my_gen = *gen_rx.borrow_and_update();
        tokio::spawn(run_loop(Arc::clone(&self.inner), my_gen, gen_rx));
    }

    /// Deliberately closes the connection and cancels any pending reconnect.
    /// Idempotent; automatic reconnection never follows a deliberate close.
    pub fn disconnect(&self) {
        match self.inner.state.connection_status() {
            ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                self.inner.state.set_connection_status(ConnectionStatus::Closing);
            }
            _ => {}
        }
        let next = *self.inner.generation.borrow() + 1;
        let _ = self.inner.generation.send(next);
    }

    /// Hands one frame to the live session for transmission. `Ok` means the
    /// session accepted the frame, not that it reached the wire: a session
    /// that dies before flushing drops it, and nothing is redelivered after
    /// a reconnect. When not Connected this kicks a reconnect and reports
    /// failure for this call; frames are never queued silently.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), SyncError> {
        if self.inner.state.connection_status() == ConnectionStatus::Connected {
            let guard = self.inner.outbound.lock().expect("outbound lock poisoned");
            if let Some(tx) = guard.as_ref() {
                if tx.send(frame.into()).is_ok() {
                    return Ok(());
                }
            }
        }
        self.connect();
        Err(SyncError::NotConnected)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.connection_status()
    }
}

async fn run_loop(inner: Arc<Inner>, my_gen: u64, mut gen_rx: watch::Receiver<u64>) {
    loop {
        inner.state.set_connection_status(ConnectionStatus::Connecting);
        log::info!("Connecting to telemetry stream: {}", inner.config.ws_url);

        let connected = tokio::select! {
            conn = connect_async(inner.config.ws_url.as_str()) => conn,
            _ = gen_rx.changed() => {
                inner.state.finish_closing();
                return;
            }
        };

        match connected {
            Ok((ws_stream, _)) => {
                log::info!("Telemetry stream connected");
                inner.attempts.store(0, Ordering::SeqCst);
                inner.state.set_connection_status(ConnectionStatus::Connected);
                inner.state.publish(StatusEvent::Connected);

                let deliberate = run_session(&inner, ws_stream, &mut gen_rx).await;
                inner.outbound.lock().expect("outbound lock poisoned").take();

                if deliberate {
                    inner.state.finish_closing();
                    inner.state.publish(StatusEvent::Disconnected);
                    return;
                }
            }
            Err(e) => {
                log::error!("Failed to connect to telemetry stream: {e}");
            }
        }

        // Failure path: schedule a capped-exponential reconnect, or give up.
        if *gen_rx.borrow() != my_gen {
            inner.state.finish_closing();
            return;
        }
        let failures = inner.attempts.load(Ordering::SeqCst);
        if !inner.config.policy.should_retry(failures) {
            log::error!(
                "Reconnect budget exhausted after {failures} attempts; staying disconnected until connect() is called again"
            );
            inner.state.set_connection_status(ConnectionStatus::Disconnected);
            inner.state.publish(StatusEvent::GaveUp);
            return;
        }
        let attempt = failures + 1;
        inner.attempts.store(attempt, Ordering::SeqCst);
        let delay = inner.config.policy.delay_for(attempt);
        log::warn!(
            "Reconnecting in {:?} (attempt {attempt}/{})",
            delay,
            inner.config.policy.max_attempts
        );
        inner.state.publish(StatusEvent::Reconnecting { attempt });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = gen_rx.changed() => {
                // disconnect() arrived while the reconnect timer was pending.
                inner.state.finish_closing();
                return;
            }
        }
    }
}

/// Drives one open session until it ends. Returns true when the session was
/// closed deliberately.
async fn run_session(
    inner: &Arc<Inner>,
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    gen_rx: &mut watch::Receiver<u64>,
) -> bool {
    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    *inner.outbound.lock().expect("outbound lock poisoned") = Some(out_tx);

    inner.registered.store(false, Ordering::SeqCst);
    if let Err(e) = try_register(inner, &mut write).await {
        log::info!("Registration deferred: {e}");
    }

    let mut heartbeat = tokio::time::interval(inner.config.heartbeat_interval);
    heartbeat.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => inner.dispatcher.dispatch(text.as_str()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    log::warn!("Telemetry stream closed by server");
                    return false;
                }
                Some(Err(e)) => {
                    log::error!("Telemetry stream read error: {e}");
                    return false;
                }
                None => {
                    log::warn!("Telemetry stream ended");
                    return false;
                }
                _ => {}
            },
            frame = out_rx.recv() => {
                if let Some(frame) = frame {
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        log::error!("Send failed: {e}");
                        return false;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if !inner.registered.load(Ordering::SeqCst) {
                    if let Err(e) = try_register(inner, &mut write).await {
                        log::debug!("Registration still deferred: {e}");
                    }
                }
                if let Err(e) = write.send(Message::Text(model::ping_frame().into())).await {
                    log::error!("Heartbeat send failed: {e}");
                    return false;
                }
            }
            _ = gen_rx.changed() => {
                log::info!("Closing telemetry stream");
                let _ = write.close().await;
                return true;
            }
        }
    }
}

/// Sends the one-time register frame when a token is available; defers
/// (without dropping the registration) otherwise.
async fn try_register(inner: &Arc<Inner>, write: &mut WsSink) -> Result<(), SyncError> {
    let token = inner.token.read().expect("token lock poisoned").clone();
    match token {
        Some(token) => {
            let frame = model::register_frame(&token, inner.config.device_serial.as_deref());
            write.send(Message::Text(frame.into())).await?;
            inner.registered.store(true, Ordering::SeqCst);
            log::info!("Registration frame sent");
            Ok(())
        }
        None => Err(SyncError::TokenUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_to_the_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(30_000));
    }

    #[test]
    fn each_scheduled_delay_exceeds_the_previous_until_the_cap() {
        let policy = ReconnectPolicy::default();
        // Two prior failures: the third reconnect waits strictly longer.
        assert!(policy.delay_for(3) > policy.delay_for(2));
        for attempt in 2..6 {
            assert!(policy.delay_for(attempt) > policy.delay_for(attempt - 1));
        }
    }

    #[test]
    fn retry_budget_boundary() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(6));
    }

    #[tokio::test]
    async fn send_while_disconnected_fails_fast() {
        let state = AppState::new();
        let relay = crate::notify::NotificationRelay::new(Arc::new(crate::notify::LogNotifier));
        let dispatcher = Dispatcher::new(state.clone(), relay);
        // Nothing listens on this port; the kicked reconnect will fail on its
        // own schedule without affecting the send contract.
        let config = ConnectionConfig {
            ws_url: "ws://127.0.0.1:9".to_string(),
            ..ConnectionConfig::default()
        };
        let manager = ConnectionManager::new(config, state, dispatcher);

        assert!(matches!(manager.send(model::ping_frame()), Err(SyncError::NotConnected)));
        manager.disconnect();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let state = AppState::new();
        let relay = crate::notify::NotificationRelay::new(Arc::new(crate::notify::LogNotifier));
        let dispatcher = Dispatcher::new(state.clone(), relay);
        let manager = ConnectionManager::new(ConnectionConfig::default(), state, dispatcher);

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }
}
