//! Deployment plan: the ordered list of file operations for one run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a planned file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentItemKind {
    Rom,
    Bios,
    Save,
    State,
    Media,
    Metadata,
    Other,
}

/// One planned copy operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentItem {
    pub kind: DeploymentItemKind,
    pub source_path: PathBuf,
    /// Destination path relative to the destination root, `/`-separated.
    pub dest_path: String,
    /// Bytes expected to land at the destination (post-conversion estimate
    /// when a conversion is planned).
    pub byte_size: u64,
    pub source_size: u64,
    #[serde(default)]
    pub requires_conversion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
}

/// A selected item the plan deliberately leaves out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub content_id: String,
    pub platform_id: String,
    /// Reason code of the decision that excluded the item.
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// An ordered, sized list of file operations. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    plan_id: String,
    destination_root: PathBuf,
    items: Vec<DeploymentItem>,
    #[serde(default)]
    skipped: Vec<SkippedItem>,
    #[serde(default)]
    warnings: Vec<String>,
    /// Required auxiliary files with no local source.
    #[serde(default)]
    missing_auxiliary: Vec<String>,
    created_at: DateTime<Utc>,
}

impl DeploymentPlan {
    pub fn new(
        plan_id: impl Into<String>,
        destination_root: impl Into<PathBuf>,
        items: Vec<DeploymentItem>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            destination_root: destination_root.into(),
            items,
            skipped: Vec::new(),
            warnings: Vec::new(),
            missing_auxiliary: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_skipped(mut self, skipped: Vec<SkippedItem>) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_missing_auxiliary(mut self, missing: Vec<String>) -> Self {
        self.missing_auxiliary = missing;
        self
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    pub fn items(&self) -> &[DeploymentItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&DeploymentItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of every item's `byte_size`.
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.byte_size).sum()
    }

    /// Bytes of the first `count` items (what a checkpoint at `count` has
    /// already landed).
    pub fn bytes_before(&self, count: usize) -> u64 {
        self.items.iter().take(count).map(|i| i.byte_size).sum()
    }

    pub fn skipped(&self) -> &[SkippedItem] {
        &self.skipped
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn missing_auxiliary(&self) -> &[String] {
        &self.missing_auxiliary
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(dest: &str, size: u64) -> DeploymentItem {
        DeploymentItem {
            kind: DeploymentItemKind::Rom,
            source_path: PathBuf::from("/lib").join(dest),
            dest_path: dest.into(),
            byte_size: size,
            source_size: size,
            requires_conversion: false,
            target_format: None,
            content_id: None,
            platform_id: None,
        }
    }

    #[test]
    fn total_bytes_is_sum_of_items() {
        let plan = DeploymentPlan::new(
            "p1",
            "/media/sd",
            vec![item("a.gb", 10), item("b.gb", 32), item("c.gb", 0)],
        );
        assert_eq!(plan.total_bytes(), 42);
        assert_eq!(plan.bytes_before(2), 42);
        assert_eq!(plan.bytes_before(1), 10);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn empty_plan() {
        let plan = DeploymentPlan::new("p1", "/media/sd", Vec::new());
        assert!(plan.is_empty());
        assert_eq!(plan.total_bytes(), 0);
    }

    #[test]
    fn plan_json_roundtrip_preserves_order() {
        let plan = DeploymentPlan::new("p1", "/media/sd", vec![item("z.gb", 1), item("a.gb", 2)])
            .with_warnings(vec!["w".into()]);
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"planId\":\"p1\""));
        let parsed: DeploymentPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.items()[0].dest_path, "z.gb");
        assert_eq!(parsed, plan);
    }
}
