//! Backend bookkeeping records.

use super::tier::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability of a backend as last observed by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Available,
    Degraded,
    Unavailable,
}

/// Tracked capacity of one backend.
///
/// `available_bytes` is the byte budget of the backend (its capacity);
/// free space is `available_bytes - used_bytes`. `used_bytes` is only
/// authoritative within the lifetime of the process and is replaced by
/// backend-reported usage whenever a refresh succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub name: Tier,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub status: BackendStatus,
    pub consecutive_failures: u32,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl BackendDescriptor {
    pub fn new(name: Tier, available_bytes: u64) -> Self {
        Self {
            name,
            used_bytes: 0,
            available_bytes,
            status: BackendStatus::Available,
            consecutive_failures: 0,
            last_refreshed_at: None,
        }
    }

    pub fn free_bytes(&self) -> u64 {
        self.available_bytes.saturating_sub(self.used_bytes)
    }

    /// Share of the budget in use, in percent (0 when the budget is 0).
    pub fn usage_percentage(&self) -> f64 {
        if self.available_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.available_bytes as f64) * 100.0
    }
}

/// A single listed object on a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}
