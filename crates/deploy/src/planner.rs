//! Deployment planning.
//!
//! Turns a set of selected items, each with its eligibility decision, into
//! an ordered [`DeploymentPlan`]. Excluded items are recorded as skipped;
//! each included item is preceded by any BIOS file it needs that the
//! destination lacks, emitted once for the whole plan. Two items that would
//! land on the same destination file keep the first; the later one is
//! skipped with [`DEST_PATH_CONFLICT`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use romrunner_catalog::Catalog;
use romrunner_eligibility::Decision;
use romrunner_layout::{DestinationSnapshot, ResolvedLayout, join_rel};
use romrunner_library::BiosReport;
use romrunner_protocol::{DeploymentItem, DeploymentItemKind, DeploymentPlan, SkippedItem};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Skip reason for an item whose destination file is already planned.
pub const DEST_PATH_CONFLICT: &str = "DEST_PATH_CONFLICT";

/// One library item picked for deployment, with the verdict on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedItem {
    pub content_id: String,
    pub platform_id: String,
    pub source_path: PathBuf,
    pub size: u64,
    /// Emulator that will run it, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator_id: Option<String>,
    pub decision: Decision,
}

/// A local BIOS file available for deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliarySource {
    pub path: PathBuf,
    pub size: u64,
}

/// Local BIOS files keyed by catalog BIOS id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuxiliarySources {
    by_id: BTreeMap<String, AuxiliarySource>,
}

impl AuxiliarySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bios_id: impl Into<String>, path: impl Into<PathBuf>, size: u64) {
        self.by_id.insert(
            bios_id.into(),
            AuxiliarySource {
                path: path.into(),
                size,
            },
        );
    }

    pub fn get(&self, bios_id: &str) -> Option<&AuxiliarySource> {
        self.by_id.get(bios_id)
    }

    /// Every usable (verified or unverifiable) file of a BIOS report.
    pub fn from_report(report: &BiosReport) -> Self {
        let mut sources = Self::new();
        for check in &report.checks {
            if let (true, Some(path), Some(hashes)) =
                (check.status.is_usable(), &check.found_path, &check.hashes)
            {
                sources.insert(check.bios.id.clone(), path.clone(), hashes.size);
            }
        }
        sources
    }
}

/// How one platform's content should be converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRule {
    pub target_format: String,
    /// Source extensions the rule applies to; every extension when empty.
    #[serde(default)]
    pub source_extensions: Vec<String>,
    /// Expected output size relative to the source.
    #[serde(default = "default_ratio")]
    pub size_ratio: f64,
}

fn default_ratio() -> f64 {
    1.0
}

impl ConversionRule {
    fn applies_to(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext.eq_ignore_ascii_case(&self.target_format) {
            return false;
        }
        self.source_extensions.is_empty()
            || self
                .source_extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    fn estimate(&self, size: u64) -> u64 {
        if self.size_ratio.is_finite() && self.size_ratio > 0.0 {
            (size as f64 * self.size_ratio).round() as u64
        } else {
            size
        }
    }
}

/// Conversion rules keyed by platform id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionPreferences {
    by_platform: BTreeMap<String, ConversionRule>,
}

impl ConversionPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, platform_id: impl Into<String>, rule: ConversionRule) {
        self.by_platform.insert(platform_id.into(), rule);
    }

    pub fn get(&self, platform_id: &str) -> Option<&ConversionRule> {
        self.by_platform.get(platform_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOptions {
    /// Add required BIOS files the destination lacks.
    pub include_bios: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { include_bios: true }
    }
}

/// Everything the planner needs; nothing is read from disk.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub catalog: &'a Catalog,
    pub layout: &'a ResolvedLayout,
    pub items: &'a [SelectedItem],
    /// What is already on the destination, to skip BIOS files it has.
    pub snapshot: Option<&'a DestinationSnapshot>,
    pub auxiliary: &'a AuxiliarySources,
    pub conversions: &'a ConversionPreferences,
    pub options: PlanOptions,
    /// Fixed id; a fresh UUID when `None`.
    pub plan_id: Option<&'a str>,
}

/// Builds the ordered plan for one deployment.
pub fn plan_deployment(req: &PlanRequest<'_>) -> DeploymentPlan {
    let plan_id = req
        .plan_id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut items = Vec::new();
    let mut skipped = Vec::new();
    let mut warnings = Vec::new();
    let mut missing = Vec::new();
    let mut handled_bios: BTreeSet<&str> = BTreeSet::new();
    // Card filesystems (FAT, exFAT) compare names case-insensitively.
    let mut planned_dests: BTreeMap<String, PathBuf> = BTreeMap::new();

    for sel in req.items {
        if !sel.decision.include {
            skipped.push(SkippedItem {
                content_id: sel.content_id.clone(),
                platform_id: sel.platform_id.clone(),
                reason: sel.decision.reason.as_str().to_string(),
                details: sel.decision.warnings.clone(),
            });
            continue;
        }
        warnings.extend(
            sel.decision
                .warnings
                .iter()
                .map(|w| format!("{}: {w}", sel.content_id)),
        );

        if req.options.include_bios {
            for bios in req
                .catalog
                .bios_requirements(&sel.platform_id, sel.emulator_id.as_deref())
            {
                if !handled_bios.insert(bios.id.as_str()) {
                    continue;
                }
                let dest_path = join_rel(&req.layout.bios.path, &bios.relative_path());
                if req.snapshot.is_some_and(|s| s.has_file(&dest_path)) {
                    debug!(bios = %bios.id, dest = %dest_path, "BIOS already on destination");
                    continue;
                }
                match req.auxiliary.get(&bios.id) {
                    Some(src) => {
                        planned_dests.insert(dest_path.to_lowercase(), src.path.clone());
                        items.push(DeploymentItem {
                            kind: DeploymentItemKind::Bios,
                            source_path: src.path.clone(),
                            dest_path,
                            byte_size: src.size,
                            source_size: src.size,
                            requires_conversion: false,
                            target_format: None,
                            content_id: Some(bios.id.clone()),
                            platform_id: Some(bios.platform_id.clone()),
                        });
                    }
                    None => {
                        warnings.push(format!(
                            "missing BIOS {} ({}) needed by {}",
                            bios.id, bios.filename, sel.content_id
                        ));
                        missing.push(bios.id.clone());
                    }
                }
            }
        }

        let item = content_item(req, sel);
        let key = item.dest_path.to_lowercase();
        if let Some(first) = planned_dests.get(&key) {
            warn!(
                content = %sel.content_id,
                dest = %item.dest_path,
                planned_from = %first.display(),
                "destination file already planned, skipping"
            );
            warnings.push(format!(
                "{}: {} is already planned from {}",
                sel.content_id,
                item.dest_path,
                first.display()
            ));
            skipped.push(SkippedItem {
                content_id: sel.content_id.clone(),
                platform_id: sel.platform_id.clone(),
                reason: DEST_PATH_CONFLICT.to_string(),
                details: vec![format!(
                    "{} and {} both map to {}",
                    first.display(),
                    sel.source_path.display(),
                    item.dest_path
                )],
            });
            continue;
        }
        planned_dests.insert(key, sel.source_path.clone());
        items.push(item);
    }

    let plan = DeploymentPlan::new(plan_id, req.layout.root.clone(), items)
        .with_skipped(skipped)
        .with_warnings(warnings)
        .with_missing_auxiliary(missing);
    info!(
        plan = %plan.plan_id(),
        items = plan.len(),
        skipped = plan.skipped().len(),
        total_bytes = plan.total_bytes(),
        missing_bios = plan.missing_auxiliary().len(),
        "deployment planned"
    );
    plan
}

fn content_item(req: &PlanRequest<'_>, sel: &SelectedItem) -> DeploymentItem {
    let file_name = sel
        .source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| sel.content_id.clone());
    let rule = req
        .conversions
        .get(&sel.platform_id)
        .filter(|r| r.applies_to(&sel.source_path));

    let (dest_name, byte_size) = match rule {
        Some(rule) => {
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_name.clone());
            (
                format!("{stem}.{}", rule.target_format.to_ascii_lowercase()),
                rule.estimate(sel.size),
            )
        }
        None => (file_name, sel.size),
    };

    DeploymentItem {
        kind: DeploymentItemKind::Rom,
        source_path: sel.source_path.clone(),
        dest_path: join_rel(&req.layout.rom_dir(&sel.platform_id), &dest_name),
        byte_size,
        source_size: sel.size,
        requires_conversion: rule.is_some(),
        target_format: rule.map(|r| r.target_format.to_ascii_lowercase()),
        content_id: Some(sel.content_id.clone()),
        platform_id: Some(sel.platform_id.clone()),
    }
}
