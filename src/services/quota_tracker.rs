//! Per-backend byte accounting.
//!
//! Pure bookkeeping: no I/O happens here. Each backend's descriptor sits
//! behind its own mutex so concurrent uploads to different backends never
//! contend, while uploads to the same backend keep `used_bytes` consistent.

use crate::models::{BackendDescriptor, BackendStatus, Tier};
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, warn};

/// Consecutive exhausted-retry failures before a backend is unavailable.
const UNAVAILABLE_AFTER_FAILURES: u32 = 3;

#[derive(Debug)]
pub struct QuotaTracker {
    backends: HashMap<Tier, Mutex<BackendDescriptor>>,
    safety_margin: f64,
}

impl QuotaTracker {
    /// Build a tracker from `(tier, capacity)` pairs. `safety_margin` is the
    /// share of each capacity held back, e.g. `0.05`.
    pub fn new(capacities: impl IntoIterator<Item = (Tier, u64)>, safety_margin: f64) -> Self {
        let backends = capacities
            .into_iter()
            .map(|(tier, capacity)| (tier, Mutex::new(BackendDescriptor::new(tier, capacity))))
            .collect();
        Self {
            backends,
            safety_margin: safety_margin.clamp(0.0, 1.0),
        }
    }

    fn lock(&self, tier: Tier) -> Option<MutexGuard<'_, BackendDescriptor>> {
        let slot = self.backends.get(&tier)?;
        // A poisoned lock still holds plain counters; keep using them.
        Some(slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Adjust the running total by a signed byte delta.
    pub fn record_usage(&self, tier: Tier, delta_bytes: i64) {
        let Some(mut desc) = self.lock(tier) else {
            warn!(%tier, "usage recorded for an untracked backend");
            return;
        };
        desc.used_bytes = if delta_bytes >= 0 {
            desc.used_bytes.saturating_add(delta_bytes as u64)
        } else {
            desc.used_bytes.saturating_sub(delta_bytes.unsigned_abs())
        };
    }

    /// Whether `requested_bytes` fits in the free space after the reserve.
    pub fn has_space(&self, tier: Tier, requested_bytes: u64) -> bool {
        let Some(desc) = self.lock(tier) else {
            return false;
        };
        let reserve = (desc.available_bytes as f64 * self.safety_margin).ceil() as u64;
        requested_bytes <= desc.free_bytes().saturating_sub(reserve)
    }

    /// Replace tracked values with an authoritative reading.
    pub fn refresh(&self, tier: Tier, used_bytes: u64, available_bytes: u64) {
        if let Some(mut desc) = self.lock(tier) {
            debug!(
                %tier,
                previous_used = desc.used_bytes,
                used_bytes,
                available_bytes,
                "quota refreshed from backend"
            );
            desc.used_bytes = used_bytes;
            desc.available_bytes = available_bytes;
            desc.last_refreshed_at = Some(Utc::now());
        }
    }

    /// A backend call succeeded.
    pub fn mark_success(&self, tier: Tier) {
        if let Some(mut desc) = self.lock(tier) {
            desc.consecutive_failures = 0;
            desc.status = BackendStatus::Available;
        }
    }

    /// A backend call failed after exhausting its retries.
    pub fn mark_failure(&self, tier: Tier) {
        if let Some(mut desc) = self.lock(tier) {
            desc.consecutive_failures = desc.consecutive_failures.saturating_add(1);
            let next = if desc.consecutive_failures >= UNAVAILABLE_AFTER_FAILURES {
                BackendStatus::Unavailable
            } else {
                BackendStatus::Degraded
            };
            if next != desc.status {
                warn!(%tier, failures = desc.consecutive_failures, status = ?next, "backend status changed");
            }
            desc.status = next;
        }
    }

    /// Statistics could not be read; keep serving with last known values.
    pub fn mark_degraded(&self, tier: Tier) {
        if let Some(mut desc) = self.lock(tier) {
            if desc.status == BackendStatus::Available {
                desc.status = BackendStatus::Degraded;
            }
        }
    }

    pub fn status(&self, tier: Tier) -> Option<BackendStatus> {
        self.lock(tier).map(|desc| desc.status)
    }

    pub fn snapshot(&self, tier: Tier) -> Option<BackendDescriptor> {
        self.lock(tier).map(|desc| desc.clone())
    }

    /// Snapshots of every tracked backend in tier order.
    pub fn snapshot_all(&self) -> Vec<BackendDescriptor> {
        let mut all: Vec<_> = self
            .backends
            .keys()
            .filter_map(|tier| self.snapshot(*tier))
            .collect();
        all.sort_by_key(|desc| desc.name);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> QuotaTracker {
        QuotaTracker::new([(Tier::Primary, 1_000), (Tier::Secondary, 10_000)], 0.05)
    }

    #[test]
    fn reserves_safety_margin() {
        let quota = tracker();
        // 1000 capacity, 50 reserved.
        assert!(quota.has_space(Tier::Primary, 950));
        assert!(!quota.has_space(Tier::Primary, 951));
        quota.record_usage(Tier::Primary, 900);
        assert!(quota.has_space(Tier::Primary, 50));
        assert!(!quota.has_space(Tier::Primary, 51));
    }

    #[test]
    fn ninety_six_percent_full_has_no_room() {
        let quota = tracker();
        quota.refresh(Tier::Primary, 960, 1_000);
        assert!(!quota.has_space(Tier::Primary, 1));
    }

    #[test]
    fn negative_deltas_saturate_at_zero() {
        let quota = tracker();
        quota.record_usage(Tier::Secondary, 100);
        quota.record_usage(Tier::Secondary, -500);
        assert_eq!(quota.snapshot(Tier::Secondary).unwrap().used_bytes, 0);
    }

    #[test]
    fn refresh_replaces_accumulated_usage() {
        let quota = tracker();
        quota.record_usage(Tier::Secondary, 7_000);
        quota.refresh(Tier::Secondary, 1_000, 20_000);
        let desc = quota.snapshot(Tier::Secondary).unwrap();
        assert_eq!(desc.used_bytes, 1_000);
        assert_eq!(desc.available_bytes, 20_000);
        assert!(desc.last_refreshed_at.is_some());
    }

    #[test]
    fn untracked_backend_never_has_space() {
        let quota = tracker();
        assert!(!quota.has_space(Tier::Local, 0));
        assert!(quota.snapshot(Tier::Local).is_none());
    }

    #[test]
    fn repeated_failures_make_backend_unavailable() {
        let quota = tracker();
        quota.mark_failure(Tier::Primary);
        assert_eq!(quota.status(Tier::Primary), Some(BackendStatus::Degraded));
        quota.mark_failure(Tier::Primary);
        quota.mark_failure(Tier::Primary);
        assert_eq!(quota.status(Tier::Primary), Some(BackendStatus::Unavailable));
        quota.mark_success(Tier::Primary);
        assert_eq!(quota.status(Tier::Primary), Some(BackendStatus::Available));
    }

    #[test]
    fn concurrent_usage_updates_are_not_lost() {
        let quota = std::sync::Arc::new(tracker());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let quota = quota.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        quota.record_usage(Tier::Secondary, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(quota.snapshot(Tier::Secondary).unwrap().used_bytes, 800);
    }
}
