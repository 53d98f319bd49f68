//! The validated catalog snapshot and its JSON loader.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::policy::Policy;
use crate::records::{CompatRecord, PerformanceRecord};
use crate::types::{
    BiosFile, Chipset, Device, Emulator, LayoutProfile, OperatingSystem, Platform,
};
use crate::CatalogError;

/// Raw catalog document as shipped in a definition pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSource {
    pub version: String,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub chipsets: Vec<Chipset>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub operating_systems: Vec<OperatingSystem>,
    #[serde(default)]
    pub emulators: Vec<Emulator>,
    #[serde(default)]
    pub bios_files: Vec<BiosFile>,
    /// Order matters: earlier profiles win detection ties.
    #[serde(default)]
    pub layout_profiles: Vec<LayoutProfile>,
    #[serde(default)]
    pub performance: Vec<PerformanceRecord>,
    #[serde(default)]
    pub compatibility: Vec<CompatRecord>,
    #[serde(default)]
    pub policy: Policy,
}

/// Immutable, validated reference data for one session.
#[derive(Debug, Clone)]
pub struct Catalog {
    source: CatalogSource,
    platform_idx: HashMap<String, usize>,
    device_idx: HashMap<String, usize>,
    os_idx: HashMap<String, usize>,
    profile_idx: HashMap<String, usize>,
    covered_platforms: HashSet<String>,
}

impl Catalog {
    /// Parses and validates a catalog from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let source: CatalogSource = serde_json::from_str(json)?;
        Self::from_source(source)
    }

    /// Reads and validates a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&content)?;
        debug!(
            path = %path.display(),
            version = %catalog.version(),
            profiles = catalog.source.layout_profiles.len(),
            performance = catalog.source.performance.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Validates a source document and builds lookup indexes.
    ///
    /// Rejects duplicate ids and duplicate record keys so that every level
    /// of the eligibility cascade has at most one hit.
    pub fn from_source(source: CatalogSource) -> Result<Self, CatalogError> {
        let platform_idx = index_ids("platform", source.platforms.iter().map(|p| &p.id))?;
        let device_idx = index_ids("device", source.devices.iter().map(|d| &d.id))?;
        let os_idx = index_ids(
            "operating system",
            source.operating_systems.iter().map(|o| &o.id),
        )?;
        let profile_idx = index_ids(
            "layout profile",
            source.layout_profiles.iter().map(|p| &p.id),
        )?;
        index_ids("chipset", source.chipsets.iter().map(|c| &c.id))?;
        index_ids("emulator", source.emulators.iter().map(|e| &e.id))?;
        index_ids("bios", source.bios_files.iter().map(|b| &b.id))?;

        let mut perf_keys = HashSet::new();
        for rec in &source.performance {
            if rec.target().is_none() {
                return Err(CatalogError::InvalidRecord(format!(
                    "performance record {} must name exactly one of deviceId / chipsetId",
                    rec.key()
                )));
            }
            if !perf_keys.insert(rec.key()) {
                return Err(CatalogError::DuplicatePerformanceKey(rec.key()));
            }
        }

        let mut compat_keys = HashSet::new();
        for rec in &source.compatibility {
            if !compat_keys.insert(rec.key()) {
                return Err(CatalogError::DuplicateCompatKey(rec.key()));
            }
        }

        for device in &source.devices {
            if !source.chipsets.iter().any(|c| c.id == device.chipset_id) {
                warn!(device = %device.id, chipset = %device.chipset_id, "device references unknown chipset");
            }
        }

        let covered_platforms = source
            .performance
            .iter()
            .map(|r| r.platform_id.clone())
            .chain(source.policy.performance_coverage.iter().cloned())
            .collect();

        Ok(Self {
            source,
            platform_idx,
            device_idx,
            os_idx,
            profile_idx,
            covered_platforms,
        })
    }

    /// Catalog version string.
    pub fn version(&self) -> &str {
        &self.source.version
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.source.platforms
    }

    pub fn platform(&self, id: &str) -> Option<&Platform> {
        self.platform_idx.get(id).map(|&i| &self.source.platforms[i])
    }

    pub fn devices(&self) -> &[Device] {
        &self.source.devices
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.device_idx.get(id).map(|&i| &self.source.devices[i])
    }

    pub fn chipsets(&self) -> &[Chipset] {
        &self.source.chipsets
    }

    pub fn operating_systems(&self) -> &[OperatingSystem] {
        &self.source.operating_systems
    }

    pub fn operating_system(&self, id: &str) -> Option<&OperatingSystem> {
        self.os_idx.get(id).map(|&i| &self.source.operating_systems[i])
    }

    pub fn emulators(&self) -> &[Emulator] {
        &self.source.emulators
    }

    pub fn bios_files(&self) -> &[BiosFile] {
        &self.source.bios_files
    }

    /// Layout profiles in declaration order.
    pub fn layout_profiles(&self) -> &[LayoutProfile] {
        &self.source.layout_profiles
    }

    pub fn layout_profile(&self, id: &str) -> Option<&LayoutProfile> {
        self.profile_idx
            .get(id)
            .map(|&i| &self.source.layout_profiles[i])
    }

    /// First declared layout profile for an operating system.
    pub fn profile_for_os(&self, os_id: &str) -> Option<&LayoutProfile> {
        self.source.layout_profiles.iter().find(|p| p.os_id == os_id)
    }

    pub fn performance_records(&self) -> &[PerformanceRecord] {
        &self.source.performance
    }

    pub fn compat_records(&self) -> &[CompatRecord] {
        &self.source.compatibility
    }

    pub fn policy(&self) -> &Policy {
        &self.source.policy
    }

    /// Whether `platform_id` is inside performance reference-data coverage.
    pub fn is_performance_covered(&self, platform_id: &str) -> bool {
        self.covered_platforms.contains(platform_id)
    }

    /// Chipset id of a device, if the device is known.
    pub fn chipset_of(&self, device_id: &str) -> Option<&str> {
        self.device(device_id).map(|d| d.chipset_id.as_str())
    }

    /// BIOS files required for `platform_id` content run by `emulator_id`.
    pub fn bios_requirements(&self, platform_id: &str, emulator_id: Option<&str>) -> Vec<&BiosFile> {
        self.source
            .bios_files
            .iter()
            .filter(|b| b.is_required_for(platform_id, emulator_id))
            .collect()
    }

    /// Every marker path referenced by any layout profile, deduplicated.
    pub fn all_markers(&self) -> BTreeSet<&str> {
        self.source
            .layout_profiles
            .iter()
            .flat_map(|p| p.detection.all_markers())
            .collect()
    }

    /// Borrow the raw source document.
    pub fn source(&self) -> &CatalogSource {
        &self.source
    }
}

fn index_ids<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a String>,
) -> Result<HashMap<String, usize>, CatalogError> {
    let mut idx = HashMap::new();
    for (i, id) in ids.enumerate() {
        if idx.insert(id.clone(), i).is_some() {
            return Err(CatalogError::DuplicateId {
                kind,
                id: id.clone(),
            });
        }
    }
    Ok(idx)
}
