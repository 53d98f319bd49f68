//! Performance and compatibility reference records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How well a title runs on a given piece of hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Unplayable,
    Poor,
    Playable,
    Good,
    Excellent,
}

impl PerformanceTier {
    /// Normalises a free-text community rating into a tier.
    ///
    /// Exact labels are tried first, then keywords inside longer strings
    /// (e.g. `"Playable (minor stutter)"`). Negative keywords are checked
    /// before positive ones. Returns `None` for empty or unrecognised input.
    pub fn from_label(raw: &str) -> Option<Self> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() {
            return None;
        }

        let exact = match s.as_str() {
            "perfect" | "excellent" | "flawless" => Some(Self::Excellent),
            "great" | "good" => Some(Self::Good),
            "playable" | "works" | "ok" | "runs" | "minor issues" => Some(Self::Playable),
            "poor" | "bad" | "major issues" => Some(Self::Poor),
            "unplayable" | "broken" | "doesn't work" | "does not work" | "crash" | "crashes" => {
                Some(Self::Unplayable)
            }
            _ => None,
        };
        if exact.is_some() {
            return exact;
        }

        let has = |keys: &[&str]| keys.iter().any(|k| s.contains(k));
        if has(&[
            "unplayable",
            "broken",
            "doesn't work",
            "does not work",
            "crash",
            "black screen",
        ]) {
            Some(Self::Unplayable)
        } else if has(&["poor", "bad", "major issue", "very slow", "stutter", "unstable"]) {
            Some(Self::Poor)
        } else if has(&["perfect", "flawless", "excellent"]) {
            Some(Self::Excellent)
        } else if has(&["great", "good"]) {
            Some(Self::Good)
        } else if has(&["playable", "works", "ok", "runs", "minor issue"]) {
            Some(Self::Playable)
        } else {
            None
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceTier::Unplayable => "unplayable",
            PerformanceTier::Poor => "poor",
            PerformanceTier::Playable => "playable",
            PerformanceTier::Good => "good",
            PerformanceTier::Excellent => "excellent",
        };
        f.write_str(s)
    }
}

/// The hardware a performance record applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HardwareTarget {
    Device(String),
    Chipset(String),
}

impl fmt::Display for HardwareTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareTarget::Device(id) => write!(f, "device:{id}"),
            HardwareTarget::Chipset(id) => write!(f, "chipset:{id}"),
        }
    }
}

/// A performance baseline for a title (or a whole platform) on hardware.
///
/// Exactly one of `device_id` / `chipset_id` must be set; the loader
/// rejects records that violate this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    /// Content id, or `*` for a platform-wide record.
    #[serde(default = "crate::wildcard")]
    pub content_id: String,
    pub platform_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chipset_id: Option<String>,
    /// Emulator id, or `*` for any emulator.
    #[serde(default = "crate::wildcard")]
    pub emulator_id: String,
    pub tier: PerformanceTier,
    #[serde(default)]
    pub exclude_from_auto_lists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl PerformanceRecord {
    /// The hardware this record targets, if well-formed.
    pub fn target(&self) -> Option<HardwareTarget> {
        match (&self.device_id, &self.chipset_id) {
            (Some(d), None) => Some(HardwareTarget::Device(d.clone())),
            (None, Some(c)) => Some(HardwareTarget::Chipset(c.clone())),
            _ => None,
        }
    }

    /// Whether this is a platform-wide (content wildcard) record.
    pub fn is_platform_wide(&self) -> bool {
        crate::is_wildcard(&self.content_id)
    }

    /// Human-readable uniqueness key.
    pub fn key(&self) -> String {
        let target = self
            .target()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".into());
        format!(
            "{}|{}|{}|{}",
            self.content_id, self.platform_id, target, self.emulator_id
        )
    }
}

/// Emulator compatibility status for a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatStatus {
    Perfect,
    Playable,
    Ingame,
    MenuIntro,
    BootsOnly,
    Broken,
    Unknown,
}

impl fmt::Display for CompatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompatStatus::Perfect => "perfect",
            CompatStatus::Playable => "playable",
            CompatStatus::Ingame => "ingame",
            CompatStatus::MenuIntro => "menu_intro",
            CompatStatus::BootsOnly => "boots_only",
            CompatStatus::Broken => "broken",
            CompatStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Emulator compatibility record for a title (or platform-wide).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatRecord {
    #[serde(default = "crate::wildcard")]
    pub content_id: String,
    pub platform_id: String,
    #[serde(default = "crate::wildcard")]
    pub emulator_id: String,
    pub status: CompatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CompatRecord {
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.content_id, self.platform_id, self.emulator_id)
    }
}
