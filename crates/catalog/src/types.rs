//! Catalog entity types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A game platform (console / handheld / computer family).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// File extensions (lowercase, without the dot) recognised as content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<DifficultyTier>,
}

impl Platform {
    /// Returns `true` if `ext` (case-insensitive, with or without dot) is a
    /// content extension of this platform.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// How demanding a platform is to run well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    Light,
    Moderate,
    Demanding,
}

/// A hardware chipset (SoC) shared by several devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chipset {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
}

/// A concrete device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub chipset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_os: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_os: Option<String>,
}

/// A firmware / operating system distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Default emulator per platform (platform id -> emulator id).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_emulators: BTreeMap<String, String>,
}

/// An emulator / core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emulator {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
}

/// A known hash of a BIOS dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiosHash {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// An auxiliary (BIOS / firmware) file a platform or emulator may require.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiosFile {
    pub id: String,
    pub filename: String,
    pub platform_id: String,
    /// Required by every emulator of the platform.
    #[serde(default)]
    pub required: bool,
    /// Required only by these emulators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_for_emulators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_filenames: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_hashes: Vec<BiosHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Subdirectory under the BIOS path (e.g. `dc` for Flycast).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
}

impl BiosFile {
    /// Returns `true` if this file is required when running `platform_id`
    /// content with `emulator_id`.
    pub fn is_required_for(&self, platform_id: &str, emulator_id: Option<&str>) -> bool {
        if self.platform_id != platform_id {
            return false;
        }
        if self.required {
            return true;
        }
        emulator_id.is_some_and(|emu| self.required_for_emulators.iter().any(|e| e == emu))
    }

    /// Relative destination path under the BIOS directory.
    pub fn relative_path(&self) -> String {
        match &self.subdirectory {
            Some(sub) if !sub.is_empty() => format!("{}/{}", sub.trim_matches('/'), self.filename),
            _ => self.filename.clone(),
        }
    }

    /// All filenames this BIOS may appear under.
    pub fn all_filenames(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.filename.as_str())
            .chain(self.alternate_filenames.iter().map(String::as_str))
    }
}

// ---------------------------------------------------------------------------
// Layout profiles
// ---------------------------------------------------------------------------

/// One of the well-known destination folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Roms,
    Bios,
    Saves,
    States,
    Screenshots,
    Portmaster,
}

impl PathKind {
    /// The kinds that make up a resolved deployment layout.
    pub const RESOLVED: [PathKind; 5] = [
        PathKind::Bios,
        PathKind::Roms,
        PathKind::Saves,
        PathKind::States,
        PathKind::Screenshots,
    ];
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PathKind::Roms => "roms",
            PathKind::Bios => "bios",
            PathKind::Saves => "saves",
            PathKind::States => "states",
            PathKind::Screenshots => "screenshots",
            PathKind::Portmaster => "portmaster",
        };
        f.write_str(s)
    }
}

/// Folder paths relative to the destination root. Any may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saves: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portmaster: Option<String>,
}

impl LayoutPaths {
    /// Returns the path for `kind`, treating empty strings as absent.
    pub fn get(&self, kind: PathKind) -> Option<&str> {
        let value = match kind {
            PathKind::Roms => &self.roms,
            PathKind::Bios => &self.bios,
            PathKind::Saves => &self.saves,
            PathKind::States => &self.states,
            PathKind::Screenshots => &self.screenshots,
            PathKind::Portmaster => &self.portmaster,
        };
        value.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// Sets the path for `kind`.
    pub fn set(&mut self, kind: PathKind, path: impl Into<String>) {
        let slot = match kind {
            PathKind::Roms => &mut self.roms,
            PathKind::Bios => &mut self.bios,
            PathKind::Saves => &mut self.saves,
            PathKind::States => &mut self.states,
            PathKind::Screenshots => &mut self.screenshots,
            PathKind::Portmaster => &mut self.portmaster,
        };
        *slot = Some(path.into());
    }

    /// Returns a copy with every path present in `other` replacing ours.
    pub fn overlay(&self, other: &LayoutPaths) -> LayoutPaths {
        let mut merged = self.clone();
        for kind in [
            PathKind::Roms,
            PathKind::Bios,
            PathKind::Saves,
            PathKind::States,
            PathKind::Screenshots,
            PathKind::Portmaster,
        ] {
            if let Some(p) = other.get(kind) {
                merged.set(kind, p);
            }
        }
        merged
    }

    /// Returns `true` when no path is set.
    pub fn is_empty(&self) -> bool {
        PathKind::RESOLVED
            .iter()
            .chain(std::iter::once(&PathKind::Portmaster))
            .all(|k| self.get(*k).is_none())
    }
}

/// Detection confidence, ordered `None < Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

/// Marker rules used to fingerprint a destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRules {
    /// All of these must be present for a `high` match.
    #[serde(default)]
    pub markers_all: Vec<String>,
    /// Any of these yields at least a `medium` match.
    #[serde(default)]
    pub markers_any: Vec<String>,
    /// Any of these vetoes the profile outright.
    #[serde(default)]
    pub markers_none: Vec<String>,
    /// Confidence a match must reach to count as a detection.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Confidence,
}

fn default_min_confidence() -> Confidence {
    Confidence::Medium
}

impl DetectionRules {
    /// Every marker path referenced by these rules.
    pub fn all_markers(&self) -> impl Iterator<Item = &str> {
        self.markers_all
            .iter()
            .chain(&self.markers_any)
            .chain(&self.markers_none)
            .map(String::as_str)
    }
}

/// Condition under which a [`LayoutVariation`] applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "marker")]
pub enum VariationCondition {
    MarkerPresent(String),
    MarkerAbsent(String),
}

/// A conditional override of some profile paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutVariation {
    pub condition: VariationCondition,
    pub paths: LayoutPaths,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Expected folder layout plus detection rules for one firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutProfile {
    pub id: String,
    pub os_id: String,
    pub paths: LayoutPaths,
    #[serde(default)]
    pub detection: DetectionRules,
    /// Folder name under the ROM path per platform id (defaults to the id).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_folders: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<LayoutVariation>,
}

impl LayoutProfile {
    /// Folder name for `platform_id` under the ROM directory.
    pub fn platform_folder<'a>(&'a self, platform_id: &'a str) -> &'a str {
        self.platform_folders
            .get(platform_id)
            .map(String::as_str)
            .unwrap_or(platform_id)
    }

    /// Paths after applying every variation whose condition holds.
    ///
    /// `observed` answers whether a marker path exists at the destination.
    pub fn effective_paths(&self, observed: impl Fn(&str) -> bool) -> LayoutPaths {
        self.variations
            .iter()
            .filter(|v| match &v.condition {
                VariationCondition::MarkerPresent(m) => observed(m),
                VariationCondition::MarkerAbsent(m) => !observed(m),
            })
            .fold(self.paths.clone(), |acc, v| acc.overlay(&v.paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_ordering() {
        assert!(Confidence::None < Confidence::Low);
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }

    #[test]
    fn layout_paths_ignore_empty_strings() {
        let paths = LayoutPaths {
            roms: Some("  ".into()),
            bios: Some("BIOS".into()),
            ..Default::default()
        };
        assert_eq!(paths.get(PathKind::Roms), None);
        assert_eq!(paths.get(PathKind::Bios), Some("BIOS"));
    }

    #[test]
    fn variations_apply_in_order() {
        let profile = LayoutProfile {
            id: "muos".into(),
            os_id: "muos".into(),
            paths: LayoutPaths {
                roms: Some("ROMS".into()),
                bios: Some("MUOS/bios".into()),
                ..Default::default()
            },
            detection: DetectionRules::default(),
            platform_folders: BTreeMap::new(),
            variations: vec![
                LayoutVariation {
                    condition: VariationCondition::MarkerPresent("mnt/sdcard".into()),
                    paths: LayoutPaths {
                        roms: Some("mnt/sdcard/ROMS".into()),
                        ..Default::default()
                    },
                    note: None,
                },
                LayoutVariation {
                    condition: VariationCondition::MarkerAbsent("MUOS".into()),
                    paths: LayoutPaths {
                        bios: Some("BIOS".into()),
                        ..Default::default()
                    },
                    note: None,
                },
            ],
        };

        let paths = profile.effective_paths(|m| m == "mnt/sdcard");
        assert_eq!(paths.get(PathKind::Roms), Some("mnt/sdcard/ROMS"));
        assert_eq!(paths.get(PathKind::Bios), Some("BIOS"));

        let paths = profile.effective_paths(|m| m == "MUOS");
        assert_eq!(paths.get(PathKind::Roms), Some("ROMS"));
        assert_eq!(paths.get(PathKind::Bios), Some("MUOS/bios"));
    }

    #[test]
    fn bios_requirement_by_emulator() {
        let bios = BiosFile {
            id: "scph5501".into(),
            filename: "scph5501.bin".into(),
            platform_id: "psx".into(),
            required: false,
            required_for_emulators: vec!["duckstation".into()],
            alternate_filenames: vec![],
            known_hashes: vec![],
            file_size: None,
            subdirectory: None,
        };
        assert!(bios.is_required_for("psx", Some("duckstation")));
        assert!(!bios.is_required_for("psx", Some("pcsx_rearmed")));
        assert!(!bios.is_required_for("psx", None));
        assert!(!bios.is_required_for("ps2", Some("duckstation")));
    }

    #[test]
    fn bios_relative_path_with_subdirectory() {
        let bios = BiosFile {
            id: "dc_boot".into(),
            filename: "dc_boot.bin".into(),
            platform_id: "dreamcast".into(),
            required: true,
            required_for_emulators: vec![],
            alternate_filenames: vec![],
            known_hashes: vec![],
            file_size: None,
            subdirectory: Some("dc/".into()),
        };
        assert_eq!(bios.relative_path(), "dc/dc_boot.bin");
    }

    #[test]
    fn platform_extension_match_is_case_insensitive() {
        let platform = Platform {
            id: "gba".into(),
            name: "Game Boy Advance".into(),
            aliases: vec![],
            extensions: vec!["gba".into(), "zip".into()],
            difficulty: Some(DifficultyTier::Light),
        };
        assert!(platform.accepts_extension("GBA"));
        assert!(platform.accepts_extension(".zip"));
        assert!(!platform.accepts_extension("iso"));
    }
}
