//! Shared fixtures for the integration tests: an in-process WebSocket server
//! standing in for the telemetry backend, and a polling condition helper.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Handle to one running mock telemetry server.
pub struct MockTelemetryServer {
    /// Bound address; connect the client to `ws://{addr}`.
    pub addr: SocketAddr,
    /// Frames pushed here are delivered to the connected client.
    pub frames: mpsc::UnboundedSender<String>,
    /// Text frames the client sent upstream (register, ping).
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// Number of WebSocket sessions accepted so far.
    pub connections: Arc<AtomicUsize>,
}

impl MockTelemetryServer {
    /// `ws://` endpoint for this server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Sessions accepted so far.
    pub fn session_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Starts a mock server that accepts one session at a time, forwards pushed
/// frames downstream and records everything the client sends upstream.
pub async fn start_mock_server() -> MockTelemetryServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
    let addr = listener.local_addr().expect("mock server local addr");
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            loop {
                tokio::select! {
                    frame = frame_rx.recv() => match frame {
                        Some(frame) => {
                            if ws.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            // Test dropped the sender: close and stop serving.
                            let _ = ws.close(None).await;
                            return;
                        }
                    },
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound_tx.send(text.to_string());
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
            }
        }
    });

    MockTelemetryServer {
        addr,
        frames: frame_tx,
        inbound: inbound_rx,
        connections,
    }
}

/// Polls a condition until it holds or the timeout elapses.
pub async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    cond()
}
