//! Events emitted to observers (UI, CLI, logs).
//!
//! Each event is a self-contained snapshot; nothing requires replaying
//! earlier events to interpret.

use serde::{Deserialize, Serialize};

use crate::issue::Issue;
use crate::types::{TransferProgress, TransferState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployEvent {
    #[serde(rename_all = "camelCase")]
    ScanProgress {
        root: String,
        entries_seen: usize,
        done: bool,
    },
    #[serde(rename_all = "camelCase")]
    PlanReady {
        plan_id: String,
        item_count: usize,
        skipped_count: usize,
        total_bytes: u64,
        warnings: Vec<String>,
    },
    TransferProgress(TransferProgress),
    #[serde(rename_all = "camelCase")]
    TransferItemError {
        plan_id: String,
        item_index: usize,
        dest_path: String,
        issue: Issue,
        /// The item was skipped and the run continues.
        skipped: bool,
    },
    #[serde(rename_all = "camelCase")]
    TransferState {
        plan_id: String,
        state: TransferState,
    },
    #[serde(rename_all = "camelCase")]
    TransferComplete {
        plan_id: String,
        state: TransferState,
        items_completed: usize,
        items_skipped: usize,
        bytes_transferred: u64,
        elapsed_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Issue>,
    },
}

impl DeployEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            DeployEvent::ScanProgress { .. } => "scan_progress",
            DeployEvent::PlanReady { .. } => "plan_ready",
            DeployEvent::TransferProgress(_) => "transfer_progress",
            DeployEvent::TransferItemError { .. } => "transfer_item_error",
            DeployEvent::TransferState { .. } => "transfer_state",
            DeployEvent::TransferComplete { .. } => "transfer_complete",
        }
    }
}
