//! # Pull-Cache with Stale Markers
//!
//! The request/response side of the client memoizes REST query results per
//! `(query kind, device serial)` pair, mirroring the tag scheme of the
//! original pull layer. The streaming side never writes query results; it
//! only marks them stale, which forces the next read (UI subscription or the
//! scheduled backup poll) to go back to the REST endpoint.
//!
//! Invalidation is idempotent and commutative: marking the same key stale any
//! number of times, in any order relative to other keys, converges on the
//! same end state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::model::Alert;

/// The pull-query families the streaming channel can invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Per-serial alert list.
    Alerts,
    /// Per-serial GPS history.
    Gps,
    /// Per-serial speed history.
    Speed,
    /// Per-serial ignition history.
    Ignition,
}

/// Memoized query results plus freshness tracking.
///
/// Alert lists are the only query family with an in-process consumer, so they
/// are the only family carrying a payload; their freshness follows the stored
/// entry. The telemetry kinds carry no payload here, so their pull readers
/// record a completed refetch through `mark_fresh` and the stream revokes it
/// through `invalidate`.
#[derive(Debug, Default)]
pub struct QueryCache {
    alerts: RwLock<HashMap<String, Arc<Vec<Alert>>>>,
    fresh: RwLock<HashSet<(QueryKind, String)>>,
    stale: RwLock<HashSet<(QueryKind, String)>>,
}

impl QueryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one query result stale. Fire-and-forget: the cache never fetches.
    pub fn invalidate(&self, kind: QueryKind, serial: &str) {
        self.fresh
            .write()
            .expect("fresh set lock poisoned")
            .remove(&(kind, serial.to_string()));
        let mut stale = self.stale.write().expect("stale set lock poisoned");
        if stale.insert((kind, serial.to_string())) {
            log::debug!("Cache invalidated: {kind:?}/{serial}");
        }
    }

    /// Records a completed refetch for one key and clears its stale marker.
    /// The pull side calls this after re-reading the endpoint; for alert lists
    /// `put_alerts` is the refetch path and stores the payload as well.
    pub fn mark_fresh(&self, kind: QueryKind, serial: &str) {
        self.stale
            .write()
            .expect("stale set lock poisoned")
            .remove(&(kind, serial.to_string()));
        self.fresh
            .write()
            .expect("fresh set lock poisoned")
            .insert((kind, serial.to_string()));
    }

    /// True when the result for this key must be re-fetched before use.
    /// A key that was never stored or marked fresh is stale by definition.
    pub fn is_stale(&self, kind: QueryKind, serial: &str) -> bool {
        let marked = self
            .stale
            .read()
            .expect("stale set lock poisoned")
            .contains(&(kind, serial.to_string()));
        if marked {
            return true;
        }
        match kind {
            QueryKind::Alerts => !self
                .alerts
                .read()
                .expect("alert cache lock poisoned")
                .contains_key(serial),
            _ => !self
                .fresh
                .read()
                .expect("fresh set lock poisoned")
                .contains(&(kind, serial.to_string())),
        }
    }

    /// Stores a fresh alert list and clears the stale marker for it.
    pub fn put_alerts(&self, serial: &str, alerts: Vec<Alert>) {
        let mut map = self.alerts.write().expect("alert cache lock poisoned");
        map.insert(serial.to_string(), Arc::new(alerts));
        self.stale
            .write()
            .expect("stale set lock poisoned")
            .remove(&(QueryKind::Alerts, serial.to_string()));
    }

    /// Returns the memoized alert list, or None when absent or stale —
    /// a None read is the signal to re-fetch.
    pub fn alerts(&self, serial: &str) -> Option<Arc<Vec<Alert>>> {
        if self
            .stale
            .read()
            .expect("stale set lock poisoned")
            .contains(&(QueryKind::Alerts, serial.to_string()))
        {
            return None;
        }
        self.alerts
            .read()
            .expect("alert cache lock poisoned")
            .get(serial)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert(serial: &str) -> Alert {
        Alert {
            id: format!("{serial}-1"),
            device_serial: Some(serial.to_string()),
            kind: "Door Open".to_string(),
            message: "Door Open".to_string(),
            time: 1_700_000_000,
            time_raw: "1700000000".to_string(),
        }
    }

    #[test]
    fn read_after_invalidate_misses() {
        let cache = QueryCache::new();
        cache.put_alerts("X123", vec![sample_alert("X123")]);
        assert!(cache.alerts("X123").is_some());

        cache.invalidate(QueryKind::Alerts, "X123");
        assert!(cache.alerts("X123").is_none());
        assert!(cache.is_stale(QueryKind::Alerts, "X123"));
    }

    #[test]
    fn invalidation_is_idempotent_and_commutative() {
        let a = QueryCache::new();
        a.invalidate(QueryKind::Alerts, "X123");
        a.invalidate(QueryKind::Alerts, "Y456");
        a.invalidate(QueryKind::Alerts, "X123");

        let b = QueryCache::new();
        b.invalidate(QueryKind::Alerts, "Y456");
        b.invalidate(QueryKind::Alerts, "X123");

        for cache in [&a, &b] {
            assert!(cache.is_stale(QueryKind::Alerts, "X123"));
            assert!(cache.is_stale(QueryKind::Alerts, "Y456"));
        }
    }

    #[test]
    fn refetch_clears_the_marker() {
        let cache = QueryCache::new();
        cache.invalidate(QueryKind::Alerts, "X123");
        cache.put_alerts("X123", vec![sample_alert("X123")]);
        assert!(!cache.is_stale(QueryKind::Alerts, "X123"));
        assert_eq!(cache.alerts("X123").unwrap().len(), 1);
    }

    #[test]
    fn unknown_key_is_stale_by_definition() {
        let cache = QueryCache::new();
        assert!(cache.is_stale(QueryKind::Alerts, "never-seen"));
        assert!(cache.is_stale(QueryKind::Speed, "never-seen"));
        assert!(cache.alerts("never-seen").is_none());
    }

    #[test]
    fn telemetry_freshness_lifecycle() {
        let cache = QueryCache::new();
        assert!(cache.is_stale(QueryKind::Speed, "X123"));

        // A completed refetch is the only path to a fresh verdict, and an
        // invalidation must flip it back: the two states are distinguishable.
        cache.mark_fresh(QueryKind::Speed, "X123");
        assert!(!cache.is_stale(QueryKind::Speed, "X123"));
        cache.invalidate(QueryKind::Speed, "X123");
        assert!(cache.is_stale(QueryKind::Speed, "X123"));

        cache.mark_fresh(QueryKind::Speed, "X123");
        assert!(!cache.is_stale(QueryKind::Speed, "X123"));
    }

    #[test]
    fn telemetry_kinds_track_markers_independently() {
        let cache = QueryCache::new();
        cache.mark_fresh(QueryKind::Gps, "X123");
        cache.mark_fresh(QueryKind::Ignition, "X123");
        cache.invalidate(QueryKind::Speed, "X123");

        assert!(cache.is_stale(QueryKind::Speed, "X123"));
        assert!(!cache.is_stale(QueryKind::Gps, "X123"));
        assert!(!cache.is_stale(QueryKind::Ignition, "X123"));
        assert!(cache.is_stale(QueryKind::Gps, "Y456"));

        // Alert payloads are untouched by telemetry invalidations.
        cache.put_alerts("X123", vec![sample_alert("X123")]);
        assert!(cache.alerts("X123").is_some());
    }
}
