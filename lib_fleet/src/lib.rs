//! # lib_fleet
//!
//! Real-time state synchronization core for the fleet-tracking client: a
//! persistent WebSocket channel with heartbeat and capped-exponential
//! reconnect, a frame dispatcher, an idempotent telemetry reconciler over an
//! immutable vehicle snapshot, a pull-cache with stale markers bridged to the
//! stream, a notification relay, and the alert criticality classifier.

// Declare the modules to re-export
pub mod cache;
pub mod classify;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod logger;
pub mod model;
pub mod notify;
pub mod poller;
pub mod reconcile;
pub mod rest;
pub mod state;

pub use error::SyncError;
pub use state::{AppState, ConnectionStatus, StatusEvent};
