//! Storage tiers and placement decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A storage tier. Each tier is backed by exactly one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fast object store serving frequently viewed assets.
    Primary,
    /// Bulk archive provider; also the destination of event backups.
    Secondary,
    /// Local disk, used when both remote tiers are out of space.
    Local,
}

impl Tier {
    /// Every tier, in fallback order.
    pub const ALL: [Tier; 3] = [Tier::Primary, Tier::Secondary, Tier::Local];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Secondary => "secondary",
            Tier::Local => "local",
        }
    }

    pub fn is_remote(self) -> bool {
        !matches!(self, Tier::Local)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Tier::Primary),
            "secondary" | "archive" => Ok(Tier::Secondary),
            "local" => Ok(Tier::Local),
            other => Err(format!("unknown storage tier `{other}`")),
        }
    }
}

/// How urgently an object should live on its tier.
///
/// `Low` marks objects parked on local disk that should be promoted to a
/// remote tier once space frees up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Input to tier selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub size_bytes: Option<u64>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub is_homepage: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_premium: bool,
    /// Caller override for the compression quality, in `(0, 1]`.
    pub compression_quality: Option<f32>,
}

impl ObjectMeta {
    pub fn sized(size_bytes: u64) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            ..Self::default()
        }
    }

    /// Homepage and featured assets are viewed the most.
    pub fn is_hot(&self) -> bool {
        self.is_homepage || self.is_featured
    }
}

/// Output of tier selection. `compression_quality` is `None` when the
/// object must be stored as-is (local fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDecision {
    pub tier: Tier,
    pub compression_quality: Option<f32>,
    pub priority: Priority,
}
