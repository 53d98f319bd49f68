//! Deployment log entries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use romrunner_protocol::{DeploymentPlan, Issue, TransferState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Cancelled | DeploymentStatus::Completed | DeploymentStatus::Failed
        )
    }

    /// Log status for an executor state. `Pending` has no log status.
    pub fn from_transfer_state(state: TransferState) -> Option<Self> {
        match state {
            TransferState::Pending => None,
            TransferState::Running => Some(DeploymentStatus::Running),
            TransferState::Paused => Some(DeploymentStatus::Paused),
            TransferState::Cancelled => Some(DeploymentStatus::Cancelled),
            TransferState::Completed => Some(DeploymentStatus::Completed),
            TransferState::Failed => Some(DeploymentStatus::Failed),
        }
    }
}

/// One deployment run, as remembered across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub plan_id: String,
    pub destination_id: String,
    pub destination_root: PathBuf,
    pub status: DeploymentStatus,
    pub total_items: usize,
    pub total_bytes: u64,
    #[serde(default)]
    pub items_completed: usize,
    #[serde(default)]
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Issue>,
}

impl DeploymentRecord {
    /// A fresh `running` record for `plan`.
    pub fn started(plan: &DeploymentPlan, destination_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan.plan_id().to_string(),
            destination_id: destination_id.into(),
            destination_root: plan.destination_root().to_path_buf(),
            status: DeploymentStatus::Running,
            total_items: plan.len(),
            total_bytes: plan.total_bytes(),
            items_completed: 0,
            bytes_transferred: 0,
            started_at: now,
            updated_at: now,
            finished_at: None,
            error: None,
        }
    }

    /// Whether the run stopped without reaching a terminal status: still
    /// `running` after a crash, or `paused`.
    pub fn is_interrupted(&self) -> bool {
        !self.status.is_terminal()
    }
}
