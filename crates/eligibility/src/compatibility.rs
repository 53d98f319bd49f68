//! Compatibility lookup.

use std::collections::HashMap;

use romrunner_catalog::{Catalog, CompatRecord, CompatStatus, WILDCARD};
use serde::{Deserialize, Serialize};

use crate::reason::ReasonCode;
use crate::resolver::EligibilityQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatMatch {
    pub record_key: String,
    pub status: CompatStatus,
    /// The record covers the whole platform rather than this item.
    pub platform_wide: bool,
}

/// Compatibility half of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatOutcome {
    pub include: bool,
    pub reason: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<CompatMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

type CompatKey = (String, String, String);

#[derive(Debug, Clone, Default)]
pub(crate) struct CompatIndex {
    by_key: HashMap<CompatKey, usize>,
}

impl CompatIndex {
    pub(crate) fn build(records: &[CompatRecord]) -> Self {
        let mut by_key = HashMap::with_capacity(records.len());
        for (i, rec) in records.iter().enumerate() {
            by_key
                .entry((
                    rec.content_id.clone(),
                    rec.platform_id.clone(),
                    rec.emulator_id.clone(),
                ))
                .or_insert(i);
        }
        Self { by_key }
    }

    /// Item record (exact emulator, then any), then platform-wide record
    /// (exact emulator, then any).
    pub(crate) fn lookup<'c>(
        &self,
        catalog: &'c Catalog,
        query: &EligibilityQuery<'_>,
    ) -> Option<&'c CompatRecord> {
        let records = catalog.compat_records();
        let mut candidates: Vec<(&str, &str)> = Vec::with_capacity(4);
        for content in [query.content_id, WILDCARD] {
            if let Some(emu) = query.emulator_id {
                candidates.push((content, emu));
            }
            candidates.push((content, WILDCARD));
        }
        candidates.into_iter().find_map(|(content, emu)| {
            let key = (
                content.to_string(),
                query.platform_id.to_string(),
                emu.to_string(),
            );
            self.by_key.get(&key).and_then(|&i| records.get(i))
        })
    }
}

pub(crate) fn evaluate(
    catalog: &Catalog,
    query: &EligibilityQuery<'_>,
    hit: Option<&CompatRecord>,
) -> CompatOutcome {
    let Some(rec) = hit else {
        return if catalog
            .policy()
            .is_strict_compat_platform(query.platform_id)
        {
            CompatOutcome {
                include: false,
                reason: ReasonCode::CompatMissingStrict,
                matched: None,
                warnings: Vec::new(),
            }
        } else {
            CompatOutcome {
                include: true,
                reason: ReasonCode::CompatAssumed,
                matched: None,
                warnings: vec![format!(
                    "no compatibility data for {}, assuming it works",
                    query.content_id
                )],
            }
        };
    };

    let matched = Some(CompatMatch {
        record_key: rec.key(),
        status: rec.status,
        platform_wide: rec.content_id == WILDCARD,
    });
    let emulator = query.emulator_id.unwrap_or(WILDCARD);
    let (include, reason, warnings) = match rec.status {
        CompatStatus::Broken => (false, ReasonCode::CompatBroken, Vec::new()),
        CompatStatus::Ingame | CompatStatus::MenuIntro | CompatStatus::BootsOnly => (
            true,
            ReasonCode::CompatPartial,
            vec![format!(
                "{} only reaches '{}' on {emulator}",
                query.content_id, rec.status
            )],
        ),
        CompatStatus::Unknown => (
            true,
            ReasonCode::CompatUnknown,
            vec![format!(
                "compatibility of {} on {emulator} is unknown",
                query.content_id
            )],
        ),
        CompatStatus::Perfect | CompatStatus::Playable => (true, ReasonCode::CompatOk, Vec::new()),
    };
    CompatOutcome {
        include,
        reason,
        matched,
        warnings,
    }
}
