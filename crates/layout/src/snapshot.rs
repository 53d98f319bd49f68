//! Scan results.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize_marker;

/// What a file found at the destination appears to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Rom,
    Bios,
    Save,
    State,
    Screenshot,
    Other,
}

impl ContentClass {
    /// Best guess from a file extension when the containing folder says
    /// nothing.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "srm" | "sav" | "mcd" | "mcr" | "eep" | "fla" | "sra" => ContentClass::Save,
            "state" | "ss0" | "ss1" | "ss2" | "st0" | "st1" | "st2" | "auto" => {
                ContentClass::State
            }
            "png" | "jpg" | "jpeg" | "bmp" => ContentClass::Screenshot,
            _ => ContentClass::Other,
        }
    }
}

/// A content file discovered under one of the destination's known folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFile {
    /// Path relative to the destination root, `/`-separated, original case.
    pub relative_path: String,
    pub class: ContentClass,
    pub size: u64,
}

/// What a scan saw at a destination root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSnapshot {
    root: PathBuf,
    scanned_at: DateTime<Utc>,
    /// Observed relative paths, normalised with [`normalize_marker`].
    entries: BTreeSet<String>,
    #[serde(default)]
    content: Vec<DiscoveredFile>,
}

impl DestinationSnapshot {
    /// A snapshot of a root with nothing in it.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scanned_at: Utc::now(),
            entries: BTreeSet::new(),
            content: Vec::new(),
        }
    }

    /// Builds a snapshot from a fixture listing.
    pub fn from_entries<I, S>(root: impl Into<PathBuf>, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut snap = Self::empty(root);
        for entry in entries {
            snap.insert_entry(entry.as_ref());
        }
        snap
    }

    pub(crate) fn insert_entry(&mut self, relative: &str) {
        let norm = normalize_marker(relative);
        if !norm.is_empty() {
            self.entries.insert(norm);
        }
    }

    pub(crate) fn push_content(&mut self, file: DiscoveredFile) {
        self.content.push(file);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scanned_at(&self) -> DateTime<Utc> {
        self.scanned_at
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.content.is_empty()
    }

    pub fn content(&self) -> &[DiscoveredFile] {
        &self.content
    }

    /// Whether `marker` was observed (case-insensitive, separator-agnostic).
    pub fn has_entry(&self, marker: &str) -> bool {
        let norm = normalize_marker(marker);
        !norm.is_empty() && self.entries.contains(&norm)
    }

    /// Whether a file exists at `relative`, as far as this snapshot knows.
    pub fn has_file(&self, relative: &str) -> bool {
        let norm = normalize_marker(relative);
        self.entries.contains(&norm)
            || self
                .content
                .iter()
                .any(|f| normalize_marker(&f.relative_path) == norm)
    }

    /// Discovered content of one class.
    pub fn content_of(&self, class: ContentClass) -> impl Iterator<Item = &DiscoveredFile> {
        self.content.iter().filter(move |f| f.class == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_compare_case_insensitively() {
        let snap = DestinationSnapshot::from_entries("/sd", ["MUOS", "MUOS/info", "roms/GB"]);
        assert!(snap.has_entry("muos"));
        assert!(snap.has_entry("muos\\INFO"));
        assert!(snap.has_entry("/roms/gb/"));
        assert!(!snap.has_entry("roms/gba"));
        assert!(!snap.has_entry(""));
        assert_eq!(snap.entry_count(), 3);
    }

    #[test]
    fn has_file_checks_discovered_content() {
        let mut snap = DestinationSnapshot::empty("/sd");
        snap.push_content(DiscoveredFile {
            relative_path: "MUOS/bios/scph1001.bin".into(),
            class: ContentClass::Bios,
            size: 512,
        });
        assert!(snap.has_file("muos/bios/SCPH1001.BIN"));
        assert!(!snap.has_file("muos/bios/scph5501.bin"));
        assert_eq!(snap.content_of(ContentClass::Bios).count(), 1);
        assert_eq!(snap.content_of(ContentClass::Rom).count(), 0);
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(ContentClass::from_extension("SRM"), ContentClass::Save);
        assert_eq!(ContentClass::from_extension("state"), ContentClass::State);
        assert_eq!(ContentClass::from_extension("png"), ContentClass::Screenshot);
        assert_eq!(ContentClass::from_extension("gb"), ContentClass::Other);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = DestinationSnapshot::from_entries("/sd", ["Roms"]);
        let json = serde_json::to_string(&snap).unwrap();
        let back: DestinationSnapshot = serde_json::from_str(&json).unwrap();
        assert!(back.has_entry("roms"));
    }
}
