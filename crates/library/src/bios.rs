//! BIOS verification against the catalog's known hashes.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use romrunner_catalog::{BiosFile, Catalog};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::LibraryError;
use crate::hash::{FileHashes, HashPool};

/// Deepest folder level indexed under the BIOS directory.
const INDEX_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiosStatus {
    /// Found and matches a known hash.
    Present,
    Missing,
    /// Found but matches none of the known hashes (or the known size).
    Mismatch,
    /// Found; the catalog has no hash to verify it against.
    Unknown,
}

impl BiosStatus {
    /// Whether the file can be deployed.
    pub fn is_usable(self) -> bool {
        matches!(self, BiosStatus::Present | BiosStatus::Unknown)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiosCheck {
    pub bios: BiosFile,
    pub status: BiosStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<FileHashes>,
}

/// BIOS completeness for one platform (and optionally one emulator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBiosSummary {
    pub platform_id: String,
    pub required: usize,
    pub usable: usize,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
}

impl PlatformBiosSummary {
    pub fn is_complete(&self) -> bool {
        self.usable == self.required
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiosReport {
    pub bios_dir: PathBuf,
    pub checks: Vec<BiosCheck>,
}

impl BiosReport {
    pub fn find(&self, bios_id: &str) -> Option<&BiosCheck> {
        self.checks.iter().find(|c| c.bios.id == bios_id)
    }

    /// Local file to deploy for `bios_id`, if one was found and is usable.
    pub fn source_for(&self, bios_id: &str) -> Option<&Path> {
        self.find(bios_id)
            .filter(|c| c.status.is_usable())
            .and_then(|c| c.found_path.as_deref())
    }

    pub fn by_platform(&self) -> BTreeMap<&str, Vec<&BiosCheck>> {
        let mut map: BTreeMap<&str, Vec<&BiosCheck>> = BTreeMap::new();
        for check in &self.checks {
            map.entry(check.bios.platform_id.as_str())
                .or_default()
                .push(check);
        }
        map
    }

    /// Required files for `platform_id` content run by `emulator_id`, and
    /// which of them are missing or fail verification.
    pub fn completeness(&self, platform_id: &str, emulator_id: Option<&str>) -> PlatformBiosSummary {
        let mut summary = PlatformBiosSummary {
            platform_id: platform_id.to_string(),
            required: 0,
            usable: 0,
            missing: Vec::new(),
            mismatched: Vec::new(),
        };
        for check in self
            .checks
            .iter()
            .filter(|c| c.bios.is_required_for(platform_id, emulator_id))
        {
            summary.required += 1;
            match check.status {
                BiosStatus::Present | BiosStatus::Unknown => summary.usable += 1,
                BiosStatus::Missing => summary.missing.push(check.bios.id.clone()),
                BiosStatus::Mismatch => summary.mismatched.push(check.bios.id.clone()),
            }
        }
        summary
    }
}

/// Looks up every catalog BIOS file under `bios_dir` (case-insensitive, by
/// primary and alternate names, with or without the subdirectory) and
/// verifies what it finds. A missing `bios_dir` reports everything missing.
pub fn verify_bios(
    catalog: &Catalog,
    bios_dir: &Path,
    pool: &HashPool,
) -> Result<BiosReport, LibraryError> {
    let index = if bios_dir.exists() {
        let mut index = HashMap::new();
        index_dir(bios_dir, bios_dir, 0, &mut index)?;
        index
    } else {
        warn!(dir = %bios_dir.display(), "BIOS directory does not exist");
        HashMap::new()
    };

    let located: Vec<(&BiosFile, Option<PathBuf>)> = catalog
        .bios_files()
        .iter()
        .map(|bios| (bios, locate(bios, &index)))
        .collect();

    let to_hash: Vec<PathBuf> = located.iter().filter_map(|(_, p)| p.clone()).collect();
    let hashed: HashMap<PathBuf, FileHashes> = pool
        .hash_files(&to_hash)
        .into_iter()
        .filter_map(|(path, result)| result.ok().map(|h| (path, h)))
        .collect();

    let checks: Vec<BiosCheck> = located
        .into_iter()
        .map(|(bios, found)| {
            let hashes = found.as_ref().and_then(|p| hashed.get(p).cloned());
            let status = match (&found, &hashes) {
                (None, _) | (Some(_), None) => BiosStatus::Missing,
                (Some(_), Some(h)) => status_of(bios, h),
            };
            BiosCheck {
                bios: bios.clone(),
                status,
                found_path: found,
                hashes,
            }
        })
        .collect();

    let count = |s: BiosStatus| checks.iter().filter(|c| c.status == s).count();
    info!(
        dir = %bios_dir.display(),
        present = count(BiosStatus::Present),
        unknown = count(BiosStatus::Unknown),
        mismatch = count(BiosStatus::Mismatch),
        missing = count(BiosStatus::Missing),
        "BIOS verified"
    );

    Ok(BiosReport {
        bios_dir: bios_dir.to_path_buf(),
        checks,
    })
}

fn status_of(bios: &BiosFile, hashes: &FileHashes) -> BiosStatus {
    if bios.file_size.is_some_and(|size| size != hashes.size) {
        return BiosStatus::Mismatch;
    }
    if bios.known_hashes.is_empty() {
        return BiosStatus::Unknown;
    }
    let matched = bios.known_hashes.iter().any(|k| {
        hashes.matches_any(k.md5.as_deref(), k.crc32.as_deref(), k.sha256.as_deref())
    });
    if matched {
        BiosStatus::Present
    } else {
        BiosStatus::Mismatch
    }
}

fn locate(bios: &BiosFile, index: &HashMap<String, PathBuf>) -> Option<PathBuf> {
    let sub = bios
        .subdirectory
        .as_deref()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty());
    bios.all_filenames().find_map(|name| {
        let nested = sub.map(|s| format!("{s}/{name}").to_lowercase());
        nested
            .and_then(|key| index.get(&key))
            .or_else(|| index.get(&name.to_lowercase()))
            .cloned()
    })
}

/// Maps lowercased `/`-separated relative paths to real paths.
fn index_dir(
    root: &Path,
    current: &Path,
    depth: usize,
    index: &mut HashMap<String, PathBuf>,
) -> Result<(), LibraryError> {
    let entries = fs::read_dir(current).map_err(|source| LibraryError::Unreadable {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            if depth + 1 < INDEX_DEPTH {
                index_dir(root, &path, depth + 1, index)?;
            }
        } else if meta.is_file()
            && let Ok(rel) = path.strip_prefix(root)
        {
            let key = rel.to_string_lossy().replace('\\', "/").to_lowercase();
            index.entry(key).or_insert(path);
        }
    }
    Ok(())
}
