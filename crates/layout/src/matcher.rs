//! Layout fingerprint matching.
//!
//! Scores each layout profile against the markers observed in a snapshot:
//!
//! 1. any `markers_none` present: `none`, the profile is vetoed;
//! 2. every `markers_all` present (and at least one declared): `high`;
//! 3. any `markers_any` present: `medium`;
//! 4. some `markers_all` present: `low`; otherwise `none`.
//!
//! Ranking is by confidence, then by catalog declaration order. Several
//! firmwares share folder names, so the first registered profile wins a tie.

use romrunner_catalog::{Confidence, LayoutProfile};
use serde::{Deserialize, Serialize};

use crate::snapshot::DestinationSnapshot;

/// How one profile scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMatch {
    pub profile_id: String,
    pub os_id: String,
    pub confidence: Confidence,
    /// The profile's declared minimum for a detection.
    pub min_confidence: Confidence,
    /// Position in catalog declaration order.
    pub order: usize,
    pub found_markers: Vec<String>,
    pub missing_markers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vetoed_by: Vec<String>,
}

impl ProfileMatch {
    /// Whether this match counts as a detection.
    pub fn is_detection(&self) -> bool {
        self.confidence > Confidence::None && self.confidence >= self.min_confidence
    }
}

/// Markers of the user's expected profile, split by presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedComparison {
    pub profile_id: String,
    pub confidence: Confidence,
    pub found_markers: Vec<String>,
    pub missing_markers: Vec<String>,
    /// Whether the best detection is the expected profile.
    pub matches_best: bool,
}

/// Ranked matches for every candidate profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    matches: Vec<ProfileMatch>,
    best: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected: Option<ExpectedComparison>,
}

impl MatchReport {
    /// All matches, best first.
    pub fn matches(&self) -> &[ProfileMatch] {
        &self.matches
    }

    /// The top-ranked detection, if any profile reached its minimum.
    pub fn best(&self) -> Option<&ProfileMatch> {
        self.best.and_then(|i| self.matches.get(i))
    }

    pub fn expected(&self) -> Option<&ExpectedComparison> {
        self.expected.as_ref()
    }

    pub fn get(&self, profile_id: &str) -> Option<&ProfileMatch> {
        self.matches.iter().find(|m| m.profile_id == profile_id)
    }
}

/// Scores a single profile against a snapshot.
pub fn score_profile(
    snapshot: &DestinationSnapshot,
    profile: &LayoutProfile,
    order: usize,
) -> ProfileMatch {
    let rules = &profile.detection;
    let vetoed_by: Vec<String> = rules
        .markers_none
        .iter()
        .filter(|m| snapshot.has_entry(m))
        .cloned()
        .collect();
    let all_found: Vec<&String> = rules
        .markers_all
        .iter()
        .filter(|m| snapshot.has_entry(m))
        .collect();
    let any_found: Vec<&String> = rules
        .markers_any
        .iter()
        .filter(|m| snapshot.has_entry(m))
        .collect();
    let missing_markers: Vec<String> = rules
        .markers_all
        .iter()
        .filter(|m| !snapshot.has_entry(m))
        .cloned()
        .collect();

    let confidence = if !vetoed_by.is_empty() {
        Confidence::None
    } else if !rules.markers_all.is_empty()
        && missing_markers.is_empty()
        && Confidence::High >= rules.min_confidence
    {
        Confidence::High
    } else if !any_found.is_empty() {
        Confidence::Medium
    } else if !all_found.is_empty() {
        Confidence::Low
    } else {
        Confidence::None
    };

    let found_markers = all_found.into_iter().chain(any_found).cloned().collect();

    ProfileMatch {
        profile_id: profile.id.clone(),
        os_id: profile.os_id.clone(),
        confidence,
        min_confidence: rules.min_confidence,
        order,
        found_markers,
        missing_markers,
        vetoed_by,
    }
}

/// Scores and ranks every profile, in declaration order, against a snapshot.
pub fn match_layouts(
    snapshot: &DestinationSnapshot,
    profiles: &[LayoutProfile],
    expected_profile_id: Option<&str>,
) -> MatchReport {
    let mut matches: Vec<ProfileMatch> = profiles
        .iter()
        .enumerate()
        .map(|(i, p)| score_profile(snapshot, p, i))
        .collect();
    // Stable sort keeps declaration order among equal confidences.
    matches.sort_by(|a, b| b.confidence.cmp(&a.confidence));

    let best = matches.iter().position(ProfileMatch::is_detection);

    let expected = expected_profile_id.and_then(|id| {
        let m = matches.iter().find(|m| m.profile_id == id)?;
        Some(ExpectedComparison {
            profile_id: m.profile_id.clone(),
            confidence: m.confidence,
            found_markers: m.found_markers.clone(),
            missing_markers: m.missing_markers.clone(),
            matches_best: best.is_some_and(|b| matches[b].profile_id == id),
        })
    });

    MatchReport {
        matches,
        best,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romrunner_catalog::{DetectionRules, LayoutPaths};
    use std::collections::BTreeMap;

    fn profile(id: &str, os: &str, detection: DetectionRules) -> LayoutProfile {
        LayoutProfile {
            id: id.into(),
            os_id: os.into(),
            paths: LayoutPaths::default(),
            detection,
            platform_folders: BTreeMap::new(),
            variations: Vec::new(),
        }
    }

    fn rules(all: &[&str], any: &[&str], none: &[&str]) -> DetectionRules {
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        DetectionRules {
            markers_all: v(all),
            markers_any: v(any),
            markers_none: v(none),
            min_confidence: Confidence::Medium,
        }
    }

    fn catalog_profiles() -> Vec<LayoutProfile> {
        vec![
            profile("muos-default", "muos", rules(&["MUOS", "MUOS/info"], &[], &[".stock"])),
            profile("knulli-default", "knulli", rules(&["system", "roms"], &["system/.knulli"], &[])),
            profile("batocera-default", "batocera", rules(&["system", "roms"], &[], &[])),
            profile("onion-default", "onion", rules(&[".tmp_update"], &["Roms"], &[])),
        ]
    }

    #[test]
    fn full_markers_all_is_high() {
        let snap = DestinationSnapshot::from_entries("/sd", ["MUOS", "MUOS/info", "ROMS"]);
        let report = match_layouts(&snap, &catalog_profiles(), None);
        let best = report.best().unwrap();
        assert_eq!(best.profile_id, "muos-default");
        assert_eq!(best.confidence, Confidence::High);
        assert!(best.missing_markers.is_empty());
    }

    #[test]
    fn markers_none_vetoes() {
        let snap = DestinationSnapshot::from_entries("/sd", ["MUOS", "MUOS/info", ".stock"]);
        let report = match_layouts(&snap, &catalog_profiles(), None);
        let muos = report.get("muos-default").unwrap();
        assert_eq!(muos.confidence, Confidence::None);
        assert_eq!(muos.vetoed_by, vec![".stock".to_string()]);
        assert!(report.best().is_none());
    }

    #[test]
    fn any_marker_is_medium() {
        let snap = DestinationSnapshot::from_entries("/sd", ["Roms"]);
        let report = match_layouts(&snap, &catalog_profiles(), None);
        let onion = report.get("onion-default").unwrap();
        assert_eq!(onion.confidence, Confidence::Medium);
        assert_eq!(report.best().unwrap().profile_id, "onion-default");
    }

    #[test]
    fn partial_markers_all_is_low_and_not_a_detection() {
        let snap = DestinationSnapshot::from_entries("/sd", ["MUOS"]);
        let report = match_layouts(&snap, &catalog_profiles(), None);
        let muos = report.get("muos-default").unwrap();
        assert_eq!(muos.confidence, Confidence::Low);
        assert_eq!(muos.missing_markers, vec!["MUOS/info".to_string()]);
        assert!(!muos.is_detection());
        assert!(report.best().is_none());
    }

    #[test]
    fn low_min_confidence_accepts_low_match() {
        let mut profiles = catalog_profiles();
        profiles[0].detection.min_confidence = Confidence::Low;
        let snap = DestinationSnapshot::from_entries("/sd", ["MUOS"]);
        let report = match_layouts(&snap, &profiles, None);
        assert_eq!(report.best().unwrap().profile_id, "muos-default");
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let snap = DestinationSnapshot::from_entries("/sd", ["system", "roms"]);
        let report = match_layouts(&snap, &catalog_profiles(), None);
        let highs: Vec<&str> = report
            .matches()
            .iter()
            .filter(|m| m.confidence == Confidence::High)
            .map(|m| m.profile_id.as_str())
            .collect();
        assert_eq!(highs, vec!["knulli-default", "batocera-default"]);
        assert_eq!(report.best().unwrap().profile_id, "knulli-default");
    }

    #[test]
    fn empty_destination_matches_nothing() {
        let snap = DestinationSnapshot::empty("/sd");
        let report = match_layouts(&snap, &catalog_profiles(), Some("muos-default"));
        assert!(report.matches().iter().all(|m| m.confidence == Confidence::None));
        assert!(report.best().is_none());
        let expected = report.expected().unwrap();
        assert_eq!(expected.missing_markers.len(), 2);
        assert!(!expected.matches_best);
    }

    #[test]
    fn expected_comparison_reports_found_and_missing() {
        let snap = DestinationSnapshot::from_entries("/sd", ["system", "roms", "MUOS"]);
        let report = match_layouts(&snap, &catalog_profiles(), Some("muos-default"));
        let expected = report.expected().unwrap();
        assert_eq!(expected.found_markers, vec!["MUOS".to_string()]);
        assert_eq!(expected.missing_markers, vec!["MUOS/info".to_string()]);
        assert_eq!(report.best().unwrap().os_id, "knulli");
    }

    #[test]
    fn all_markers_present_yields_profile_at_or_above_minimum() {
        let profiles = catalog_profiles();
        for (i, p) in profiles.iter().enumerate() {
            let snap = DestinationSnapshot::from_entries("/sd", p.detection.markers_all.iter());
            let report = match_layouts(&snap, &profiles, None);
            let best = report.best().unwrap();
            // A tie with an earlier profile sharing the same markers goes to
            // the earlier one.
            let earlier_high = report
                .matches()
                .iter()
                .any(|m| m.order < i && m.confidence == Confidence::High);
            if !earlier_high {
                assert_eq!(best.profile_id, p.id);
                assert!(best.confidence >= p.detection.min_confidence);
            }
        }
    }

    #[test]
    fn matching_is_case_and_separator_insensitive() {
        let snap = DestinationSnapshot::from_entries("/sd", ["muos", "muos\\INFO"]);
        let report = match_layouts(&snap, &catalog_profiles(), None);
        assert_eq!(report.best().unwrap().confidence, Confidence::High);
    }
}
