//! Performance lookup cascade.

use std::collections::HashMap;

use romrunner_catalog::{
    Catalog, HardwareTarget, PerformanceRecord, PerformanceTier, WILDCARD,
};
use serde::{Deserialize, Serialize};

use crate::reason::ReasonCode;
use crate::resolver::EligibilityQuery;

/// Which level of the cascade produced a hit, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfMatchLevel {
    ContentDeviceEmulator,
    ContentDeviceAny,
    ContentChipsetEmulator,
    ContentChipsetAny,
    PlatformDeviceEmulator,
    PlatformDeviceAny,
    PlatformChipset,
}

/// A performance record hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfMatch {
    pub level: PerfMatchLevel,
    pub record_key: String,
    pub tier: PerformanceTier,
    pub exclude_from_auto_lists: bool,
}

/// Performance half of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceOutcome {
    pub include: bool,
    pub reason: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<PerfMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

type PerfKey = (String, String, HardwareTarget, String);

/// Exact-key index over performance records.
#[derive(Debug, Clone, Default)]
pub(crate) struct PerformanceIndex {
    by_key: HashMap<PerfKey, usize>,
}

impl PerformanceIndex {
    pub(crate) fn build(records: &[PerformanceRecord]) -> Self {
        let mut by_key = HashMap::with_capacity(records.len());
        for (i, rec) in records.iter().enumerate() {
            if let Some(target) = rec.target() {
                // The loader guarantees uniqueness; keep the first regardless.
                by_key
                    .entry((
                        rec.content_id.clone(),
                        rec.platform_id.clone(),
                        target,
                        rec.emulator_id.clone(),
                    ))
                    .or_insert(i);
            }
        }
        Self { by_key }
    }

    fn get<'c>(
        &self,
        records: &'c [PerformanceRecord],
        content: &str,
        platform: &str,
        target: &HardwareTarget,
        emulator: &str,
    ) -> Option<&'c PerformanceRecord> {
        let key = (
            content.to_string(),
            platform.to_string(),
            target.clone(),
            emulator.to_string(),
        );
        self.by_key.get(&key).and_then(|&i| records.get(i))
    }

    /// Walks the cascade; first hit wins.
    pub(crate) fn lookup<'c>(
        &self,
        catalog: &'c Catalog,
        query: &EligibilityQuery<'_>,
    ) -> Option<(PerfMatchLevel, &'c PerformanceRecord)> {
        let records = catalog.performance_records();
        let device = HardwareTarget::Device(query.device_id.to_string());
        let chipset = catalog
            .chipset_of(query.device_id)
            .map(|c| HardwareTarget::Chipset(c.to_string()));
        let content = Some(query.content_id).filter(|c| *c != WILDCARD);
        let emulator = query.emulator_id;

        let mut steps: Vec<(PerfMatchLevel, &str, &HardwareTarget, &str)> = Vec::with_capacity(8);
        if let Some(content) = content {
            if let Some(emu) = emulator {
                steps.push((PerfMatchLevel::ContentDeviceEmulator, content, &device, emu));
            }
            steps.push((PerfMatchLevel::ContentDeviceAny, content, &device, WILDCARD));
            if let Some(chipset) = &chipset {
                if let Some(emu) = emulator {
                    steps.push((PerfMatchLevel::ContentChipsetEmulator, content, chipset, emu));
                }
                steps.push((PerfMatchLevel::ContentChipsetAny, content, chipset, WILDCARD));
            }
        }
        if let Some(emu) = emulator {
            steps.push((PerfMatchLevel::PlatformDeviceEmulator, WILDCARD, &device, emu));
        }
        steps.push((PerfMatchLevel::PlatformDeviceAny, WILDCARD, &device, WILDCARD));
        if let Some(chipset) = &chipset {
            if let Some(emu) = emulator {
                steps.push((PerfMatchLevel::PlatformChipset, WILDCARD, chipset, emu));
            }
            steps.push((PerfMatchLevel::PlatformChipset, WILDCARD, chipset, WILDCARD));
        }

        steps.into_iter().find_map(|(level, content, target, emu)| {
            self.get(records, content, query.platform_id, target, emu)
                .map(|rec| (level, rec))
        })
    }
}

/// Turns a lookup result (or its absence) into an outcome.
pub(crate) fn evaluate(
    catalog: &Catalog,
    query: &EligibilityQuery<'_>,
    hit: Option<(PerfMatchLevel, &PerformanceRecord)>,
) -> PerformanceOutcome {
    let Some((level, rec)) = hit else {
        return no_match(catalog, query);
    };
    let matched = Some(PerfMatch {
        level,
        record_key: rec.key(),
        tier: rec.tier,
        exclude_from_auto_lists: rec.exclude_from_auto_lists,
    });

    if rec.exclude_from_auto_lists {
        return PerformanceOutcome {
            include: false,
            reason: ReasonCode::PerfExcludedByRecord,
            matched,
            warnings: Vec::new(),
        };
    }
    let (include, reason, warnings) = match rec.tier {
        PerformanceTier::Unplayable => (false, ReasonCode::PerfUnplayable, Vec::new()),
        PerformanceTier::Poor => (
            true,
            ReasonCode::PerfPoor,
            vec![format!(
                "{} runs poorly on {}",
                query.content_id, query.device_id
            )],
        ),
        PerformanceTier::Playable | PerformanceTier::Good | PerformanceTier::Excellent => {
            (true, ReasonCode::PerfOk, Vec::new())
        }
    };
    PerformanceOutcome {
        include,
        reason,
        matched,
        warnings,
    }
}

fn no_match(catalog: &Catalog, query: &EligibilityQuery<'_>) -> PerformanceOutcome {
    let policy = catalog.policy();
    if !catalog.is_performance_covered(query.platform_id) {
        return PerformanceOutcome {
            include: true,
            reason: ReasonCode::PerfMissingUncovered,
            matched: None,
            warnings: vec![format!(
                "no performance data for platform {}",
                query.platform_id
            )],
        };
    }
    let demanding = catalog
        .platform(query.platform_id)
        .and_then(|p| p.difficulty)
        .is_some_and(|d| d >= policy.strict_difficulty);
    if demanding {
        PerformanceOutcome {
            include: false,
            reason: ReasonCode::PerfMissingStrict,
            matched: None,
            warnings: Vec::new(),
        }
    } else {
        PerformanceOutcome {
            include: true,
            reason: ReasonCode::PerfMissingOptimistic,
            matched: None,
            warnings: vec![format!(
                "no performance record for {} on {}",
                query.content_id, query.device_id
            )],
        }
    }
}
