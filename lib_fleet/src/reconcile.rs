//! # State Reconciler
//!
//! Merges a batch of per-device telemetry updates into the vehicle snapshot,
//! producing a new snapshot. Each inbound batch represents the server's
//! current-truth values (not deltas), so last-write-wins per field is safe
//! even when the streaming and polling writers race.

use std::sync::Arc;

use crate::model::{TelemetryUpdate, Vehicle};

/// Produces the next vehicle snapshot from the current one and a batch of
/// updates keyed by device serial.
///
/// - Vehicles without a matching update keep their existing `Arc`, so
///   downstream memoized consumers can skip them by pointer comparison.
/// - Only the fields present on the update are overwritten.
/// - Updates naming unknown serials are dropped: vehicle identity originates
///   in the fleet listing, never in the telemetry stream.
/// - Applying the same batch twice yields the same snapshot as applying it
///   once; a no-op update also keeps the existing `Arc`.
pub fn merge_updates(current: &[Arc<Vehicle>], updates: &[TelemetryUpdate]) -> Vec<Arc<Vehicle>> {
    current
        .iter()
        .map(|vehicle| {
            // First matching record wins within one batch.
            let update = updates.iter().find(|u| u.device_serial == vehicle.serial);
            match update {
                None => Arc::clone(vehicle),
                Some(update) => apply(vehicle, update),
            }
        })
        .collect()
}

fn apply(vehicle: &Arc<Vehicle>, update: &TelemetryUpdate) -> Arc<Vehicle> {
    let mut next = (**vehicle).clone();
    if let Some(latitude) = update.latitude {
        next.latitude = Some(latitude);
    }
    if let Some(longitude) = update.longitude {
        next.longitude = Some(longitude);
    }
    if let Some(speed) = update.speed {
        next.speed = speed;
    }
    if let Some(ignition) = update.ignition {
        next.ignition = ignition;
    }
    if next == **vehicle {
        Arc::clone(vehicle)
    } else {
        Arc::new(next)
    }
}
