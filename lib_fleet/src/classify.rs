//! Local alert classifier.
//!
//! A pure predicate over the alert kind string, used both live as frames
//! stream in and on read when lists are rendered, so the two paths can never
//! disagree about what counts as critical.

use crate::model::Alert;

/// Returns true when the alert kind names an urgent security/safety
/// condition. The `ends_with("disconnected")` clause is subsumed by the
/// `contains` one; both are kept to match the deployed rule exactly.
pub fn is_critical(kind: &str) -> bool {
    let lc = kind.to_lowercase();
    lc.ends_with("detected")
        || lc.ends_with("disconnected")
        || lc.contains("disconnected")
        || lc.contains("smash")
        || lc.contains("jamming")
}

/// Critical-alert count for one vehicle's alert list (per-vehicle badge).
pub fn critical_count<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> usize {
    alerts.into_iter().filter(|a| is_critical(&a.kind)).count()
}

/// App-wide badge count: the sum of critical alerts across all vehicles'
/// alert lists.
pub fn fleet_critical_count<'a, L>(lists: impl IntoIterator<Item = L>) -> usize
where
    L: IntoIterator<Item = &'a Alert>,
{
    lists.into_iter().map(critical_count).sum()
}
