//! Library walking and platform classification.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use romrunner_catalog::{Catalog, Platform};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::LibraryError;

/// Library scan settings.
#[derive(Debug, Clone)]
pub struct LibraryScanOptions {
    /// Directory levels below each root to descend into.
    pub max_depth: usize,
    pub include_hidden: bool,
    /// Folder names (case-insensitive) never descended into.
    pub exclude_dirs: Vec<String>,
}

impl Default for LibraryScanOptions {
    fn default() -> Self {
        Self {
            max_depth: 8,
            include_hidden: false,
            exclude_dirs: vec!["bios".into()],
        }
    }
}

/// A content file classified to exactly one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    /// File stem; the key eligibility records use.
    pub content_id: String,
    pub platform_id: String,
    pub path: PathBuf,
    /// Path relative to its library root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub extension: String,
}

/// A file whose extension belongs to several platforms with no folder hint
/// to decide between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbiguousFile {
    pub path: PathBuf,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryScan {
    pub roots: Vec<PathBuf>,
    pub items: Vec<LibraryItem>,
    /// Files no platform claims.
    pub unmatched: Vec<PathBuf>,
    pub ambiguous: Vec<AmbiguousFile>,
}

impl LibraryScan {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }

    pub fn by_platform(&self) -> BTreeMap<&str, Vec<&LibraryItem>> {
        let mut map: BTreeMap<&str, Vec<&LibraryItem>> = BTreeMap::new();
        for item in &self.items {
            map.entry(item.platform_id.as_str()).or_default().push(item);
        }
        map
    }

    pub fn find(&self, platform_id: &str, content_id: &str) -> Option<&LibraryItem> {
        self.items
            .iter()
            .find(|i| i.platform_id == platform_id && i.content_id == content_id)
    }
}

/// Walks every root and classifies files by extension. When an extension is
/// shared by several platforms, the nearest enclosing folder named after one
/// of them (id or alias) decides.
pub fn scan_library(
    roots: &[PathBuf],
    catalog: &Catalog,
    opts: &LibraryScanOptions,
) -> Result<LibraryScan, LibraryError> {
    let mut scan = LibraryScan {
        roots: roots.to_vec(),
        ..Default::default()
    };

    for root in roots {
        let meta = fs::metadata(root).map_err(|source| LibraryError::Unreadable {
            path: root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(LibraryError::NotADirectory(root.clone()));
        }
        let mut files = Vec::new();
        collect_files(root, root, 0, opts, &mut files)?;
        files.sort();

        for (path, size) in files {
            classify(root, path, size, catalog, &mut scan);
        }
    }

    info!(
        roots = roots.len(),
        items = scan.items.len(),
        unmatched = scan.unmatched.len(),
        ambiguous = scan.ambiguous.len(),
        "library scanned"
    );
    Ok(scan)
}

fn collect_files(
    root: &Path,
    current: &Path,
    depth: usize,
    opts: &LibraryScanOptions,
    out: &mut Vec<(PathBuf, u64)>,
) -> Result<(), LibraryError> {
    let entries = match fs::read_dir(current) {
        Ok(entries) => entries,
        Err(source) if current == root => {
            return Err(LibraryError::Unreadable {
                path: root.to_path_buf(),
                source,
            });
        }
        Err(e) => {
            warn!(dir = %current.display(), error = %e, "skipping unreadable folder");
            return Ok(());
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !opts.include_hidden && name.starts_with('.') {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let path = entry.path();
        if meta.is_dir() {
            let excluded = opts.exclude_dirs.iter().any(|d| d.eq_ignore_ascii_case(&name));
            if !excluded && depth < opts.max_depth {
                collect_files(root, &path, depth + 1, opts, out)?;
            }
        } else if meta.is_file() {
            out.push((path, meta.len()));
        }
    }
    Ok(())
}

fn classify(root: &Path, path: PathBuf, size: u64, catalog: &Catalog, scan: &mut LibraryScan) {
    let Some(ext) = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) else {
        scan.unmatched.push(path);
        return;
    };
    let candidates: Vec<&Platform> = catalog
        .platforms()
        .iter()
        .filter(|p| p.accepts_extension(&ext))
        .collect();

    let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
    let platform = match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => folder_hint(&rel, many),
    };

    match platform {
        Some(platform) => {
            let content_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!(path = %path.display(), platform = %platform.id, "classified");
            scan.items.push(LibraryItem {
                content_id,
                platform_id: platform.id.clone(),
                relative_path: rel.to_string_lossy().replace('\\', "/"),
                path,
                size,
                extension: ext,
            });
        }
        None if candidates.is_empty() => scan.unmatched.push(path),
        None => scan.ambiguous.push(AmbiguousFile {
            path,
            candidates: candidates.iter().map(|p| p.id.clone()).collect(),
        }),
    }
}

/// Nearest ancestor folder (relative to the root) naming one of `candidates`.
fn folder_hint<'a>(rel: &Path, candidates: &[&'a Platform]) -> Option<&'a Platform> {
    let parent = rel.parent()?;
    let folders: Vec<String> = parent
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    folders.iter().rev().find_map(|folder| {
        candidates.iter().copied().find(|p| {
            p.id.eq_ignore_ascii_case(folder)
                || p.aliases.iter().any(|a| a.eq_ignore_ascii_case(folder))
        })
    })
}
