//! Pre-flight checks on a plan. Never mutates the plan.

use std::fs;

use romrunner_protocol::{DeploymentPlan, ErrorCode, Issue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOptions {
    /// Minimum headroom kept free on the destination.
    pub safety_margin_bytes: u64,
    /// Headroom as a fraction of the plan size; the larger margin applies.
    pub safety_margin_ratio: f64,
    /// Treat missing required BIOS files as blocking.
    pub block_on_missing_auxiliary: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            safety_margin_bytes: 64 * 1024 * 1024,
            safety_margin_ratio: 0.02,
            block_on_missing_auxiliary: false,
        }
    }
}

impl ValidationOptions {
    pub fn margin_for(&self, total_bytes: u64) -> u64 {
        let ratio = (total_bytes as f64 * self.safety_margin_ratio.max(0.0)).round() as u64;
        self.safety_margin_bytes.max(ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub plan_id: String,
    pub required_bytes: u64,
    pub free_bytes: u64,
    /// Problems that block the deployment.
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.errors.iter().chain(&self.warnings)
    }
}

/// Checks free space (with margin), missing BIOS files and unreadable
/// sources.
pub fn validate_plan(
    plan: &DeploymentPlan,
    free_bytes: u64,
    opts: &ValidationOptions,
) -> ValidationReport {
    let total = plan.total_bytes();
    let required_bytes = total.saturating_add(opts.margin_for(total));
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !plan.is_empty() && required_bytes > free_bytes {
        errors.push(Issue::blocking(
            ErrorCode::PlanInsufficientSpace,
            format!(
                "plan needs {} MiB (including margin) but only {} MiB are free",
                required_bytes / (1024 * 1024),
                free_bytes / (1024 * 1024)
            ),
        ));
    }

    for bios_id in plan.missing_auxiliary() {
        let message = format!("required BIOS {bios_id} has no local source");
        if opts.block_on_missing_auxiliary {
            errors.push(Issue::blocking(ErrorCode::PlanMissingAuxiliary, message));
        } else {
            warnings.push(Issue::warning(ErrorCode::PlanMissingAuxiliary, message));
        }
    }

    for item in plan.items() {
        let readable = fs::metadata(&item.source_path).is_ok_and(|m| m.is_file())
            && fs::File::open(&item.source_path).is_ok();
        if !readable {
            warn!(source = %item.source_path.display(), "plan source unreadable");
            errors.push(Issue::blocking(
                ErrorCode::PlanSourceUnreadable,
                format!("cannot read {}", item.source_path.display()),
            ));
        }
    }

    debug!(
        plan = %plan.plan_id(),
        required_bytes,
        free_bytes,
        errors = errors.len(),
        warnings = warnings.len(),
        "plan validated"
    );
    ValidationReport {
        plan_id: plan.plan_id().to_string(),
        required_bytes,
        free_bytes,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romrunner_protocol::{DeploymentItem, DeploymentItemKind};
    use std::path::Path;

    const MIB: u64 = 1024 * 1024;

    fn item(source: &Path, size: u64) -> DeploymentItem {
        DeploymentItem {
            kind: DeploymentItemKind::Rom,
            source_path: source.to_path_buf(),
            dest_path: "Roms/gb/x.gb".into(),
            byte_size: size,
            source_size: size,
            requires_conversion: false,
            target_format: None,
            content_id: None,
            platform_id: None,
        }
    }

    #[test]
    fn margin_takes_the_larger_bound() {
        let opts = ValidationOptions::default();
        assert_eq!(opts.margin_for(0), 64 * MIB);
        assert_eq!(opts.margin_for(10_000 * MIB), 200 * MIB);
    }

    #[test]
    fn insufficient_space_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("x.gb");
        fs::write(&src, b"x").unwrap();
        let plan = DeploymentPlan::new("p", "/media/sd", vec![item(&src, 100 * MIB)]);

        let report = validate_plan(&plan, 150 * MIB, &ValidationOptions::default());
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].code, ErrorCode::PlanInsufficientSpace);
        assert!(!report.errors[0].recoverable);
        assert_eq!(report.required_bytes, 164 * MIB);

        let report = validate_plan(&plan, 200 * MIB, &ValidationOptions::default());
        assert!(report.is_valid());
    }

    #[test]
    fn unreadable_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = DeploymentPlan::new("p", "/media/sd", vec![item(&dir.path().join("gone.gb"), 1)]);
        let report = validate_plan(&plan, u64::MAX, &ValidationOptions::default());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, ErrorCode::PlanSourceUnreadable);
        assert!(!report.errors[0].recoverable);
    }

    #[test]
    fn missing_auxiliary_warns_unless_strict() {
        let plan = DeploymentPlan::new("p", "/media/sd", Vec::new())
            .with_missing_auxiliary(vec!["psx-scph5501".into()]);

        let report = validate_plan(&plan, 0, &ValidationOptions::default());
        assert!(report.is_valid());
        assert_eq!(report.warnings[0].code, ErrorCode::PlanMissingAuxiliary);
        assert!(report.warnings[0].recoverable);

        let strict = ValidationOptions {
            block_on_missing_auxiliary: true,
            ..Default::default()
        };
        let report = validate_plan(&plan, 0, &strict);
        assert!(!report.is_valid());
        assert_eq!(report.issues().count(), 1);
        assert!(!report.errors[0].recoverable);
    }
}
