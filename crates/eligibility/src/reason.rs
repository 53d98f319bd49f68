use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an item was included or excluded. Tests and UIs key on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    UserOverrideInclude,
    UserOverrideExclude,
    PerfOk,
    PerfPoor,
    PerfUnplayable,
    PerfExcludedByRecord,
    PerfMissingUncovered,
    PerfMissingStrict,
    PerfMissingOptimistic,
    CompatOk,
    CompatPartial,
    CompatUnknown,
    CompatBroken,
    CompatMissingStrict,
    CompatAssumed,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::UserOverrideInclude => "USER_OVERRIDE_INCLUDE",
            ReasonCode::UserOverrideExclude => "USER_OVERRIDE_EXCLUDE",
            ReasonCode::PerfOk => "PERF_OK",
            ReasonCode::PerfPoor => "PERF_POOR",
            ReasonCode::PerfUnplayable => "PERF_UNPLAYABLE",
            ReasonCode::PerfExcludedByRecord => "PERF_EXCLUDED_BY_RECORD",
            ReasonCode::PerfMissingUncovered => "PERF_MISSING_UNCOVERED",
            ReasonCode::PerfMissingStrict => "PERF_MISSING_STRICT",
            ReasonCode::PerfMissingOptimistic => "PERF_MISSING_OPTIMISTIC",
            ReasonCode::CompatOk => "COMPAT_OK",
            ReasonCode::CompatPartial => "COMPAT_PARTIAL",
            ReasonCode::CompatUnknown => "COMPAT_UNKNOWN",
            ReasonCode::CompatBroken => "COMPAT_BROKEN",
            ReasonCode::CompatMissingStrict => "COMPAT_MISSING_STRICT",
            ReasonCode::CompatAssumed => "COMPAT_ASSUMED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_screaming_snake_case() {
        for code in [
            ReasonCode::PerfMissingStrict,
            ReasonCode::CompatMissingStrict,
            ReasonCode::UserOverrideInclude,
        ] {
            assert_eq!(
                serde_json::to_string(&code).unwrap(),
                format!("\"{}\"", code.as_str())
            );
        }
    }
}
