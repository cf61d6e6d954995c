//! Placement policy for uploaded objects.
//!
//! Selection reads a snapshot of the quota tracker and has no side effects:
//! the same metadata against the same snapshot always yields the same
//! decision. Quota shortages never error; they degrade to the next tier,
//! ending on local disk.

use crate::{
    config::TieringSettings,
    errors::{ServiceError, ServiceResult},
    models::{BackendStatus, ObjectMeta, Priority, Tier, TierDecision},
    services::quota_tracker::QuotaTracker,
};
use serde::Serialize;
use std::sync::Arc;

/// Remote space availability for a given size, as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpaceReport {
    pub primary: bool,
    pub secondary: bool,
}

#[derive(Clone)]
pub struct TierSelector {
    quota: Arc<QuotaTracker>,
    settings: TieringSettings,
}

impl TierSelector {
    pub fn new(quota: Arc<QuotaTracker>, settings: TieringSettings) -> Self {
        Self { quota, settings }
    }

    /// Pick a tier and compression policy for an object.
    pub fn select_tier(&self, meta: &ObjectMeta) -> ServiceResult<TierDecision> {
        let size = meta
            .size_bytes
            .ok_or_else(|| ServiceError::Validation("object size is required".into()))?;
        if let Some(quality) = meta.compression_quality {
            if !(quality > 0.0 && quality <= 1.0) {
                return Err(ServiceError::Validation(format!(
                    "compression quality {quality} must be in (0, 1]"
                )));
            }
        }

        let preference: &[Tier] = if meta.is_hot() {
            &[Tier::Primary, Tier::Secondary]
        } else if self
            .settings
            .bulk_threshold_bytes
            .is_some_and(|threshold| size > threshold)
        {
            &[Tier::Secondary, Tier::Primary]
        } else {
            &[Tier::Primary, Tier::Secondary]
        };

        let chosen = preference.iter().copied().find(|tier| self.is_usable(*tier, size));
        let decision = match chosen {
            Some(tier) => TierDecision {
                tier,
                compression_quality: Some(self.quality_for(meta)),
                priority: if meta.is_hot() {
                    Priority::High
                } else {
                    Priority::Normal
                },
            },
            // Disk is the degraded path: store as-is, promote later.
            None => TierDecision {
                tier: Tier::Local,
                compression_quality: None,
                priority: Priority::Low,
            },
        };
        Ok(decision)
    }

    /// Remote tiers that could take `size_bytes` right now.
    pub fn space_report(&self, size_bytes: u64) -> SpaceReport {
        SpaceReport {
            primary: self.quota.has_space(Tier::Primary, size_bytes),
            secondary: self.quota.has_space(Tier::Secondary, size_bytes),
        }
    }

    /// Whether `tier` has room for `size` bytes and is not unavailable.
    pub fn is_usable(&self, tier: Tier, size: u64) -> bool {
        self.quota.status(tier) != Some(BackendStatus::Unavailable) && self.quota.has_space(tier, size)
    }

    fn quality_for(&self, meta: &ObjectMeta) -> f32 {
        meta.compression_quality.unwrap_or(if meta.is_premium {
            self.settings.premium_compression_quality
        } else {
            self.settings.default_compression_quality
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_000_000;

    fn selector(primary_used: u64, secondary_used: u64) -> TierSelector {
        selector_with_bulk(primary_used, secondary_used, None)
    }

    fn selector_with_bulk(primary_used: u64, secondary_used: u64, bulk: Option<u64>) -> TierSelector {
        let quota = Arc::new(QuotaTracker::new(
            [
                (Tier::Primary, 100 * MB),
                (Tier::Secondary, 1_000 * MB),
                (Tier::Local, u64::MAX),
            ],
            0.05,
        ));
        quota.refresh(Tier::Primary, primary_used, 100 * MB);
        quota.refresh(Tier::Secondary, secondary_used, 1_000 * MB);
        TierSelector::new(
            quota,
            TieringSettings {
                default_compression_quality: 0.90,
                premium_compression_quality: 0.95,
                bulk_threshold_bytes: bulk,
            },
        )
    }

    #[test]
    fn missing_size_is_a_validation_error() {
        let err = selector(0, 0).select_tier(&ObjectMeta::default()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let meta = ObjectMeta {
            compression_quality: Some(1.5),
            ..ObjectMeta::sized(10)
        };
        assert!(matches!(
            selector(0, 0).select_tier(&meta),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn homepage_asset_goes_to_primary_with_high_priority() {
        let meta = ObjectMeta {
            is_homepage: true,
            ..ObjectMeta::sized(40 * MB)
        };
        let decision = selector(0, 0).select_tier(&meta).unwrap();
        assert_eq!(decision.tier, Tier::Primary);
        assert_eq!(decision.priority, Priority::High);
        assert_eq!(decision.compression_quality, Some(0.90));
    }

    #[test]
    fn full_primary_falls_back_to_secondary_not_local() {
        let meta = ObjectMeta {
            is_homepage: true,
            ..ObjectMeta::sized(5 * MB)
        };
        let decision = selector(96 * MB, 0).select_tier(&meta).unwrap();
        assert_eq!(decision.tier, Tier::Secondary);
    }

    #[test]
    fn no_remote_space_parks_on_local_uncompressed() {
        let decision = selector(99 * MB, 999 * MB)
            .select_tier(&ObjectMeta::sized(5 * MB))
            .unwrap();
        assert_eq!(
            decision,
            TierDecision {
                tier: Tier::Local,
                compression_quality: None,
                priority: Priority::Low,
            }
        );
    }

    #[test]
    fn large_standard_objects_stay_on_primary_while_it_has_space() {
        let decision = selector(0, 0).select_tier(&ObjectMeta::sized(30 * MB)).unwrap();
        assert_eq!(decision.tier, Tier::Primary);
        assert_eq!(decision.priority, Priority::Normal);
    }

    #[test]
    fn bulk_threshold_routes_large_standard_objects_to_secondary() {
        let sel = selector_with_bulk(0, 0, Some(25 * MB));
        let decision = sel.select_tier(&ObjectMeta::sized(30 * MB)).unwrap();
        assert_eq!(decision.tier, Tier::Secondary);

        // Hot assets ignore the threshold.
        let hot = ObjectMeta {
            is_homepage: true,
            ..ObjectMeta::sized(30 * MB)
        };
        assert_eq!(sel.select_tier(&hot).unwrap().tier, Tier::Primary);
    }

    #[test]
    fn premium_and_override_quality() {
        let sel = selector(0, 0);
        let premium = ObjectMeta {
            is_premium: true,
            ..ObjectMeta::sized(MB)
        };
        assert_eq!(sel.select_tier(&premium).unwrap().compression_quality, Some(0.95));
        let overridden = ObjectMeta {
            compression_quality: Some(0.7),
            ..premium
        };
        assert_eq!(sel.select_tier(&overridden).unwrap().compression_quality, Some(0.7));
    }

    #[test]
    fn unavailable_backend_is_skipped() {
        let sel = selector(0, 0);
        for _ in 0..3 {
            sel.quota.mark_failure(Tier::Primary);
        }
        let decision = sel.select_tier(&ObjectMeta::sized(MB)).unwrap();
        assert_eq!(decision.tier, Tier::Secondary);
    }

    #[test]
    fn never_picks_a_remote_tier_without_space() {
        let sizes = [0, 1, MB, 4 * MB, 5 * MB, 26 * MB, 60 * MB, 900 * MB];
        let usages = [(0, 0), (90 * MB, 0), (96 * MB, 900 * MB), (0, 960 * MB), (99 * MB, 999 * MB)];
        for (primary_used, secondary_used) in usages {
            let sel = selector(primary_used, secondary_used);
            for size in sizes {
                for hot in [false, true] {
                    let meta = ObjectMeta {
                        is_featured: hot,
                        ..ObjectMeta::sized(size)
                    };
                    let decision = sel.select_tier(&meta).unwrap();
                    let report = sel.space_report(size);
                    match decision.tier {
                        Tier::Primary => assert!(report.primary),
                        Tier::Secondary => assert!(report.secondary),
                        Tier::Local => assert!(!report.primary && !report.secondary),
                    }
                }
            }
        }
    }
}
