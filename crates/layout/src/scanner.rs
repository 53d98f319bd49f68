//! Bounded-depth destination scanning.
//!
//! Only the first `max_depth` levels are listed. Markers that live deeper
//! are checked individually as probes, so detection never walks a whole
//! card full of ROMs.

use std::fs;
use std::path::{Path, PathBuf};

use romrunner_catalog::LayoutProfile;
use romrunner_catalog::VariationCondition;
use tracing::{debug, warn};

use crate::snapshot::{ContentClass, DestinationSnapshot, DiscoveredFile};
use crate::{ScanError, normalize_marker};

/// Default listing depth.
pub const DEFAULT_SCAN_DEPTH: usize = 2;

/// Upper bound on listed entries.
pub const DEFAULT_MAX_ENTRIES: usize = 20_000;

/// How deep and how wide a scan may go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub max_depth: usize,
    pub max_entries: usize,
    /// Relative paths checked explicitly, regardless of depth.
    pub probes: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_SCAN_DEPTH,
            max_entries: DEFAULT_MAX_ENTRIES,
            probes: Vec::new(),
        }
    }
}

impl ScanOptions {
    /// Options that probe every marker of `profiles` lying below the
    /// listing depth, including variation markers.
    pub fn for_profiles(profiles: &[LayoutProfile]) -> Self {
        let mut opts = Self::default();
        for profile in profiles {
            let variation_markers = profile.variations.iter().map(|v| match &v.condition {
                VariationCondition::MarkerPresent(m) | VariationCondition::MarkerAbsent(m) => {
                    m.as_str()
                }
            });
            for marker in profile.detection.all_markers().chain(variation_markers) {
                opts.add_probe(marker);
            }
        }
        opts
    }

    /// Adds `marker` as a probe if it lies deeper than the listing depth.
    pub fn add_probe(&mut self, marker: &str) {
        let norm = normalize_marker(marker);
        if depth_of(&norm) > self.max_depth && !self.probes.contains(&norm) {
            self.probes.push(norm);
        }
    }
}

/// A destination folder whose files should be catalogued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRoot {
    pub class: ContentClass,
    /// Relative to the destination root.
    pub path: String,
}

impl ContentRoot {
    pub fn new(class: ContentClass, path: impl Into<String>) -> Self {
        Self {
            class,
            path: path.into(),
        }
    }
}

fn depth_of(normalized: &str) -> usize {
    if normalized.is_empty() {
        0
    } else {
        normalized.split('/').count()
    }
}

/// Lists `root` to `opts.max_depth` levels and checks deeper probes.
///
/// An unreadable or inaccessible root aborts the scan. Unreadable
/// subdirectories are skipped.
pub fn scan_destination(root: &Path, opts: &ScanOptions) -> Result<DestinationSnapshot, ScanError> {
    let meta = fs::metadata(root).map_err(|e| ScanError::from_io(root, e))?;
    if !meta.is_dir() {
        return Err(ScanError::NotADirectory(root.display().to_string()));
    }
    // Surface permission problems on the root itself.
    let top = fs::read_dir(root).map_err(|e| ScanError::from_io(root, e))?;

    let mut snap = DestinationSnapshot::empty(root);
    let mut truncated = false;
    walk_level(top, "", 1, opts, &mut snap, &mut truncated);
    if truncated {
        warn!(root = %root.display(), limit = opts.max_entries, "scan truncated at entry limit");
    }

    for probe in &opts.probes {
        if find_case_insensitive(root, probe).is_some() {
            snap.insert_entry(probe);
        }
    }

    debug!(
        root = %root.display(),
        entries = snap.entry_count(),
        probes = opts.probes.len(),
        "destination scanned"
    );
    Ok(snap)
}

fn walk_level(
    entries: fs::ReadDir,
    prefix: &str,
    depth: usize,
    opts: &ScanOptions,
    snap: &mut DestinationSnapshot,
    truncated: &mut bool,
) {
    for entry in entries.flatten() {
        if snap.entry_count() >= opts.max_entries {
            *truncated = true;
            return;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        snap.insert_entry(&rel);

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && depth < opts.max_depth {
            match fs::read_dir(entry.path()) {
                Ok(children) => walk_level(children, &rel, depth + 1, opts, snap, truncated),
                Err(e) => debug!(path = %rel, error = %e, "skipping unreadable directory"),
            }
        }
    }
}

/// Resolves a relative path segment by segment, ignoring case.
fn find_case_insensitive(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for segment in relative.split(['/', '\\']).filter(|s| !s.is_empty()) {
        let exact = current.join(segment);
        if exact.exists() {
            current = exact;
            continue;
        }
        let found = fs::read_dir(&current).ok()?.flatten().find(|e| {
            e.file_name()
                .to_string_lossy()
                .eq_ignore_ascii_case(segment)
        })?;
        current = found.path();
    }
    Some(current)
}

/// Catalogues files under `roots` into `snap`, up to `max_depth` levels
/// below each root. Missing roots are skipped. Returns the number of files
/// added.
pub fn discover_content(
    snap: &mut DestinationSnapshot,
    roots: &[ContentRoot],
    max_depth: usize,
) -> Result<usize, ScanError> {
    let dest_root = snap.root().to_path_buf();
    fs::metadata(&dest_root).map_err(|e| ScanError::from_io(&dest_root, e))?;

    let mut added = 0;
    for content_root in roots {
        let Some(dir) = find_case_insensitive(&dest_root, &content_root.path) else {
            debug!(path = %content_root.path, "content root absent");
            continue;
        };
        if !dir.is_dir() {
            continue;
        }
        let mut files = Vec::new();
        collect_files(&dest_root, &dir, 1, max_depth, content_root.class, &mut files);
        added += files.len();
        for file in files {
            snap.push_content(file);
        }
    }
    Ok(added)
}

fn collect_files(
    dest_root: &Path,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    class: ContentClass,
    out: &mut Vec<DiscoveredFile>,
) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            if depth < max_depth {
                collect_files(dest_root, &path, depth + 1, max_depth, class, out);
            }
        } else if meta.is_file() {
            let Ok(rel) = path.strip_prefix(dest_root) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let class = if class == ContentClass::Other {
                path.extension()
                    .map(|e| ContentClass::from_extension(&e.to_string_lossy()))
                    .unwrap_or(ContentClass::Other)
            } else {
                class
            };
            out.push(DiscoveredFile {
                relative_path: rel_str,
                class,
                size: meta.len(),
            });
        }
    }
}
