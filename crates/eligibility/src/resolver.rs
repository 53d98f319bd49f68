use std::sync::Arc;

use romrunner_catalog::Catalog;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::compatibility::{self, CompatIndex, CompatOutcome};
use crate::overrides::{OverrideAction, UserOverrides};
use crate::performance::{self, PerfMatchLevel, PerformanceIndex, PerformanceOutcome};
use crate::reason::ReasonCode;

/// One item on one device with one emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EligibilityQuery<'a> {
    pub content_id: &'a str,
    pub platform_id: &'a str,
    pub device_id: &'a str,
    /// `None` when no emulator is known; exact-emulator levels are skipped.
    pub emulator_id: Option<&'a str>,
}

/// Final include/exclude decision for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub include: bool,
    /// Headline reason: the compatibility code when compatibility excluded
    /// the item, otherwise the performance code.
    pub reason: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<CompatOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Resolves eligibility against one catalog snapshot.
#[derive(Debug, Clone)]
pub struct EligibilityResolver {
    catalog: Arc<Catalog>,
    perf: PerformanceIndex,
    compat: CompatIndex,
}

impl EligibilityResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let perf = PerformanceIndex::build(catalog.performance_records());
        let compat = CompatIndex::build(catalog.compat_records());
        Self {
            catalog,
            perf,
            compat,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Performance cascade only.
    pub fn evaluate_performance(&self, query: &EligibilityQuery<'_>) -> PerformanceOutcome {
        let hit = self.perf.lookup(&self.catalog, query);
        performance::evaluate(&self.catalog, query, hit)
    }

    /// The cascade level that would answer `query`, if any.
    pub fn performance_level(&self, query: &EligibilityQuery<'_>) -> Option<PerfMatchLevel> {
        self.perf
            .lookup(&self.catalog, query)
            .map(|(level, _)| level)
    }

    /// Compatibility lookup only (no user override).
    pub fn evaluate_compatibility(&self, query: &EligibilityQuery<'_>) -> CompatOutcome {
        let hit = self.compat.lookup(&self.catalog, query);
        compatibility::evaluate(&self.catalog, query, hit)
    }

    /// Full decision: user override, then performance, then compatibility.
    pub fn decide(&self, query: &EligibilityQuery<'_>, overrides: &UserOverrides) -> Decision {
        if let Some(action) = overrides.get(query.content_id) {
            let (include, reason) = match action {
                OverrideAction::Include => (true, ReasonCode::UserOverrideInclude),
                OverrideAction::Exclude => (false, ReasonCode::UserOverrideExclude),
            };
            trace!(content = query.content_id, %reason, "user override");
            return Decision {
                include,
                reason,
                performance: None,
                compatibility: None,
                warnings: Vec::new(),
            };
        }

        let perf = self.evaluate_performance(query);
        if !perf.include {
            trace!(content = query.content_id, reason = %perf.reason, "excluded by performance");
            return Decision {
                include: false,
                reason: perf.reason,
                warnings: perf.warnings.clone(),
                performance: Some(perf),
                compatibility: None,
            };
        }

        let compat = self.evaluate_compatibility(query);
        let reason = if compat.include {
            perf.reason
        } else {
            compat.reason
        };
        let warnings = perf
            .warnings
            .iter()
            .chain(&compat.warnings)
            .cloned()
            .collect();
        trace!(content = query.content_id, include = compat.include, %reason, "decided");
        Decision {
            include: compat.include,
            reason,
            performance: Some(perf),
            compatibility: Some(compat),
            warnings,
        }
    }
}
