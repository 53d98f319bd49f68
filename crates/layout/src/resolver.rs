//! Destination path resolution.
//!
//! Per path, highest precedence first:
//!
//! 1. the user's stored override for this destination;
//! 2. the detected profile's path, when detection is trusted and reached
//!    `medium` or better;
//! 3. the expected profile's path;
//! 4. a hard-coded fallback at `low` confidence, with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use romrunner_catalog::{Confidence, LayoutPaths, LayoutProfile, PathKind};
use romrunner_protocol::{ErrorCode, Issue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::matcher::MatchReport;
use crate::snapshot::DestinationSnapshot;

/// Paths used when nothing else names a folder.
pub const FALLBACK_PATHS: [(PathKind, &str); 5] = [
    (PathKind::Bios, "BIOS"),
    (PathKind::Roms, "Roms"),
    (PathKind::Saves, "Saves"),
    (PathKind::States, "States"),
    (PathKind::Screenshots, "Screenshots"),
];

fn fallback_for(kind: PathKind) -> &'static str {
    FALLBACK_PATHS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, p)| *p)
        .unwrap_or("Roms")
}

/// Where a resolved path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSource {
    UserOverride,
    Detected,
    Expected,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPath {
    pub kind: PathKind,
    /// Relative to the destination root, `/`-separated.
    pub path: String,
    pub source: PathSource,
    pub confidence: Confidence,
}

/// A disagreement between what the user expects and what was detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discrepancy {
    #[serde(rename_all = "camelCase")]
    DifferentOs {
        expected_os: String,
        detected_os: String,
        detected_profile: String,
    },
}

impl Discrepancy {
    pub fn to_issue(&self) -> Issue {
        match self {
            Discrepancy::DifferentOs {
                expected_os,
                detected_os,
                ..
            } => Issue::warning(
                ErrorCode::ResolutionAmbiguity,
                format!("destination looks like {detected_os}, expected {expected_os}"),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveSettings {
    /// Prefer the detected layout over the expected profile.
    pub trust_detected_layout: bool,
}

/// Everything the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub root: &'a Path,
    /// The profile of the OS the user says is installed.
    pub expected: Option<&'a LayoutProfile>,
    /// Candidate profiles, for looking up the detected one.
    pub profiles: &'a [LayoutProfile],
    pub report: Option<&'a MatchReport>,
    /// Used to evaluate profile variations.
    pub snapshot: Option<&'a DestinationSnapshot>,
    pub user_overrides: Option<&'a LayoutPaths>,
    pub settings: ResolveSettings,
}

/// The authoritative path set for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLayout {
    pub root: PathBuf,
    pub bios: ResolvedPath,
    pub roms: ResolvedPath,
    pub saves: ResolvedPath,
    pub states: ResolvedPath,
    pub screenshots: ResolvedPath,
    /// Profile whose platform folder names apply under `roms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_folders: BTreeMap<String, String>,
    /// Minimum of the per-path confidences.
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrepancies: Vec<Discrepancy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ResolvedLayout {
    pub fn path(&self, kind: PathKind) -> Option<&ResolvedPath> {
        match kind {
            PathKind::Bios => Some(&self.bios),
            PathKind::Roms => Some(&self.roms),
            PathKind::Saves => Some(&self.saves),
            PathKind::States => Some(&self.states),
            PathKind::Screenshots => Some(&self.screenshots),
            PathKind::Portmaster => None,
        }
    }

    pub fn paths(&self) -> [&ResolvedPath; 5] {
        [
            &self.bios,
            &self.roms,
            &self.saves,
            &self.states,
            &self.screenshots,
        ]
    }

    /// Relative ROM folder for a platform.
    pub fn rom_dir(&self, platform_id: &str) -> String {
        let folder = self
            .platform_folders
            .get(platform_id)
            .map(String::as_str)
            .unwrap_or(platform_id);
        join_rel(&self.roms.path, folder)
    }

    /// Issues worth surfacing to the user.
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .discrepancies
            .iter()
            .map(Discrepancy::to_issue)
            .collect();
        issues.extend(
            self.warnings
                .iter()
                .map(|w| Issue::warning(ErrorCode::ResolutionFallback, w.clone())),
        );
        issues
    }

    /// Paths as plain [`LayoutPaths`], e.g. for storing as overrides.
    pub fn to_layout_paths(&self) -> LayoutPaths {
        let mut paths = LayoutPaths::default();
        for p in self.paths() {
            paths.set(p.kind, p.path.clone());
        }
        paths
    }
}

/// Joins relative path segments with `/`.
pub fn join_rel(base: &str, child: &str) -> String {
    let base = base.trim_matches('/');
    let child = child.trim_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{child}"),
    }
}

fn clean(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// Merges overrides, detection and the expected profile into one layout.
pub fn resolve_layout(input: &ResolveInput<'_>) -> ResolvedLayout {
    let observed = |m: &str| input.snapshot.is_some_and(|s| s.has_entry(m));
    let profile_paths = |p: &LayoutProfile| match input.snapshot {
        Some(_) => p.effective_paths(observed),
        None => p.paths.clone(),
    };

    let best = input.report.and_then(MatchReport::best);
    let detected = best
        .filter(|m| m.confidence >= Confidence::Medium)
        .and_then(|m| {
            let profile = input.profiles.iter().find(|p| p.id == m.profile_id)?;
            Some((profile, m.confidence, profile_paths(profile)))
        });
    let trusted = detected
        .as_ref()
        .filter(|_| input.settings.trust_detected_layout);

    let expected_paths = input.expected.map(profile_paths);
    let expected_confidence = input
        .expected
        .and_then(|p| input.report.and_then(|r| r.get(&p.id)))
        .map(|m| m.confidence.max(Confidence::Medium))
        .unwrap_or(Confidence::Medium);

    let mut warnings = Vec::new();
    let resolve_one = |kind: PathKind, warnings: &mut Vec<String>| -> ResolvedPath {
        if let Some(p) = input.user_overrides.and_then(|o| o.get(kind)) {
            return ResolvedPath {
                kind,
                path: clean(p),
                source: PathSource::UserOverride,
                confidence: Confidence::High,
            };
        }
        if let Some((_, conf, paths)) = trusted
            && let Some(p) = paths.get(kind)
        {
            return ResolvedPath {
                kind,
                path: clean(p),
                source: PathSource::Detected,
                confidence: *conf,
            };
        }
        if let Some(p) = expected_paths.as_ref().and_then(|e| e.get(kind)) {
            return ResolvedPath {
                kind,
                path: clean(p),
                source: PathSource::Expected,
                confidence: expected_confidence,
            };
        }
        let fallback = fallback_for(kind);
        warnings.push(format!("no {kind} path known, using fallback '{fallback}'"));
        ResolvedPath {
            kind,
            path: fallback.to_string(),
            source: PathSource::Fallback,
            confidence: Confidence::Low,
        }
    };

    let bios = resolve_one(PathKind::Bios, &mut warnings);
    let mut roms = resolve_one(PathKind::Roms, &mut warnings);
    let saves = resolve_one(PathKind::Saves, &mut warnings);
    let states = resolve_one(PathKind::States, &mut warnings);
    let screenshots = resolve_one(PathKind::Screenshots, &mut warnings);

    // An override of "/" or similar cleans to empty; the ROM path may never be.
    if roms.path.is_empty() {
        warn!("resolved ROM path is empty, using fallback");
        warnings.push("ROM path resolved to the destination root, using fallback 'Roms'".into());
        roms = ResolvedPath {
            kind: PathKind::Roms,
            path: fallback_for(PathKind::Roms).to_string(),
            source: PathSource::Fallback,
            confidence: Confidence::Low,
        };
    }

    let mut discrepancies = Vec::new();
    if let (Some(expected), Some(m)) = (input.expected, best)
        && m.os_id != expected.os_id
        && m.confidence >= Confidence::Medium
        && expected_match_at_least_medium(input, expected)
    {
        discrepancies.push(Discrepancy::DifferentOs {
            expected_os: expected.os_id.clone(),
            detected_os: m.os_id.clone(),
            detected_profile: m.profile_id.clone(),
        });
    }

    let folder_profile = match (roms.source, trusted) {
        (PathSource::Detected, Some((p, _, _))) => Some(*p),
        _ => input.expected.or(detected.as_ref().map(|(p, _, _)| *p)),
    };

    let confidence = [&bios, &roms, &saves, &states, &screenshots]
        .iter()
        .map(|p| p.confidence)
        .min()
        .unwrap_or(Confidence::None);

    debug!(
        root = %input.root.display(),
        roms = %roms.path,
        bios = %bios.path,
        %confidence,
        discrepancies = discrepancies.len(),
        "layout resolved"
    );

    ResolvedLayout {
        root: input.root.to_path_buf(),
        bios,
        roms,
        saves,
        states,
        screenshots,
        profile_id: folder_profile.map(|p| p.id.clone()),
        platform_folders: folder_profile
            .map(|p| p.platform_folders.clone())
            .unwrap_or_default(),
        confidence,
        discrepancies,
        warnings,
    }
}

/// The expected profile counts as matched at `medium` or better. Without a
/// report entry for it the user's selection stands in at `medium`.
fn expected_match_at_least_medium(input: &ResolveInput<'_>, expected: &LayoutProfile) -> bool {
    input
        .report
        .and_then(|r| r.get(&expected.id))
        .is_none_or(|m| m.confidence >= Confidence::Medium)
}
