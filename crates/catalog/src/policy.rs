//! Policy thresholds used when reference data is missing.

use serde::{Deserialize, Serialize};

use crate::types::DifficultyTier;

/// Catalog-supplied defaults for the eligibility cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Platforms at or above this difficulty are excluded when no
    /// performance record matches.
    #[serde(default = "default_strict_difficulty")]
    pub strict_difficulty: DifficultyTier,
    /// Platforms covered by performance reference data, in addition to
    /// every platform that has at least one performance record.
    #[serde(default)]
    pub performance_coverage: Vec<String>,
    /// Platforms where missing compatibility data means exclusion.
    #[serde(default)]
    pub strict_compat_platforms: Vec<String>,
    /// Write speed (bytes/s) below which media is reported as slow.
    #[serde(default = "default_slow_media_bps")]
    pub slow_media_bps: u64,
}

fn default_strict_difficulty() -> DifficultyTier {
    DifficultyTier::Demanding
}

fn default_slow_media_bps() -> u64 {
    10 * 1024 * 1024
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            strict_difficulty: default_strict_difficulty(),
            performance_coverage: Vec::new(),
            strict_compat_platforms: Vec::new(),
            slow_media_bps: default_slow_media_bps(),
        }
    }
}

impl Policy {
    pub fn is_strict_compat_platform(&self, platform_id: &str) -> bool {
        self.strict_compat_platforms.iter().any(|p| p == platform_id)
    }
}
