//! Durable transfer progress markers.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::DeploymentPlan;

/// Where a transfer run stopped.
///
/// `items_completed` counts the leading plan items that were fully handled
/// (copied, or skipped after a permanent item error). Items listed in
/// `skipped_items` are included in that count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCheckpoint {
    pub plan_id: String,
    pub items_completed: usize,
    pub bytes_transferred: u64,
    /// Index of the item in flight when the checkpoint was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<usize>,
    #[serde(default)]
    pub current_item_byte_offset: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_items: Vec<usize>,
    pub updated_at: DateTime<Utc>,
}

impl TransferCheckpoint {
    /// A checkpoint at the very start of `plan_id`.
    pub fn start(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            items_completed: 0,
            bytes_transferred: 0,
            current_item: None,
            current_item_byte_offset: 0,
            skipped_items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Checks this checkpoint against the plan it claims to belong to.
    pub fn validate(&self, plan: &DeploymentPlan) -> Result<(), CheckpointError> {
        if self.plan_id != plan.plan_id() {
            return Err(CheckpointError::Invalid(format!(
                "checkpoint belongs to plan {}, not {}",
                self.plan_id,
                plan.plan_id()
            )));
        }
        if self.items_completed > plan.len() {
            return Err(CheckpointError::Invalid(format!(
                "{} items completed but plan has {}",
                self.items_completed,
                plan.len()
            )));
        }
        if self.bytes_transferred > plan.total_bytes() {
            return Err(CheckpointError::Invalid(format!(
                "{} bytes transferred exceeds plan total {}",
                self.bytes_transferred,
                plan.total_bytes()
            )));
        }
        if let Some(idx) = self.current_item {
            let Some(item) = plan.item(idx) else {
                return Err(CheckpointError::Invalid(format!(
                    "current item {idx} out of range"
                )));
            };
            if idx != self.items_completed {
                return Err(CheckpointError::Invalid(format!(
                    "current item {idx} does not follow {} completed items",
                    self.items_completed
                )));
            }
            if self.current_item_byte_offset > item.source_size.max(item.byte_size) {
                return Err(CheckpointError::Invalid(format!(
                    "byte offset {} beyond item size",
                    self.current_item_byte_offset
                )));
            }
        }
        if let Some(bad) = self
            .skipped_items
            .iter()
            .find(|&&i| i >= self.items_completed)
        {
            return Err(CheckpointError::Invalid(format!(
                "skipped item {bad} not within completed range"
            )));
        }
        Ok(())
    }

    /// Whether every item of a plan with `plan_len` items has been handled.
    pub fn is_finished(&self, plan_len: usize) -> bool {
        self.items_completed >= plan_len
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid checkpoint: {0}")]
    Invalid(String),
}

/// Persistence for transfer checkpoints, keyed by plan id.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, plan_id: &str) -> Result<Option<TransferCheckpoint>, CheckpointError>;
    fn save(&self, checkpoint: &TransferCheckpoint) -> Result<(), CheckpointError>;
    fn clear(&self, plan_id: &str) -> Result<(), CheckpointError>;
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<HashMap<String, TransferCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, plan_id: &str) -> Result<Option<TransferCheckpoint>, CheckpointError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CheckpointError::Invalid("store poisoned".into()))?;
        Ok(map.get(plan_id).cloned())
    }

    fn save(&self, checkpoint: &TransferCheckpoint) -> Result<(), CheckpointError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CheckpointError::Invalid("store poisoned".into()))?;
        map.insert(checkpoint.plan_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn clear(&self, plan_id: &str) -> Result<(), CheckpointError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CheckpointError::Invalid("store poisoned".into()))?;
        map.remove(plan_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DeploymentItem, DeploymentItemKind};
    use std::path::PathBuf;

    fn plan() -> DeploymentPlan {
        let item = |name: &str, size| DeploymentItem {
            kind: DeploymentItemKind::Rom,
            source_path: PathBuf::from(name),
            dest_path: name.into(),
            byte_size: size,
            source_size: size,
            requires_conversion: false,
            target_format: None,
            content_id: None,
            platform_id: None,
        };
        DeploymentPlan::new("p1", "/dest", vec![item("a", 100), item("b", 200)])
    }

    #[test]
    fn fresh_checkpoint_is_valid() {
        assert!(TransferCheckpoint::start("p1").validate(&plan()).is_ok());
    }

    #[test]
    fn rejects_too_many_completed_items() {
        let mut cp = TransferCheckpoint::start("p1");
        cp.items_completed = 3;
        assert!(matches!(
            cp.validate(&plan()),
            Err(CheckpointError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_foreign_plan() {
        assert!(TransferCheckpoint::start("other").validate(&plan()).is_err());
    }

    #[test]
    fn mid_item_checkpoint() {
        let mut cp = TransferCheckpoint::start("p1");
        cp.items_completed = 1;
        cp.bytes_transferred = 150;
        cp.current_item = Some(1);
        cp.current_item_byte_offset = 50;
        assert!(cp.validate(&plan()).is_ok());

        cp.current_item_byte_offset = 500;
        assert!(cp.validate(&plan()).is_err());

        cp.current_item_byte_offset = 50;
        cp.current_item = Some(0);
        assert!(cp.validate(&plan()).is_err());
    }

    #[test]
    fn skipped_items_must_be_completed() {
        let mut cp = TransferCheckpoint::start("p1");
        cp.items_completed = 1;
        cp.skipped_items = vec![1];
        assert!(cp.validate(&plan()).is_err());
        cp.skipped_items = vec![0];
        assert!(cp.validate(&plan()).is_ok());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("p1").unwrap().is_none());
        let mut cp = TransferCheckpoint::start("p1");
        cp.items_completed = 2;
        store.save(&cp).unwrap();
        assert_eq!(store.load("p1").unwrap().unwrap().items_completed, 2);
        store.clear("p1").unwrap();
        assert!(store.load("p1").unwrap().is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&TransferCheckpoint::start("p1")).unwrap();
        assert!(json.contains("\"itemsCompleted\":0"));
        assert!(json.contains("\"currentItemByteOffset\":0"));
    }
}
