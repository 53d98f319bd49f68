use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use romrunner_catalog::{Confidence, LayoutPaths};
use romrunner_layout::DestinationSnapshot;
use romrunner_protocol::{
    CheckpointError, CheckpointStore, DeploymentPlan, Issue, TransferCheckpoint,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::StoreError;
use crate::history::{DeploymentRecord, DeploymentStatus};

/// Scans kept per destination.
pub const DEFAULT_SNAPSHOT_HISTORY: usize = 10;

const OVERRIDES_FILE: &str = "path_overrides.json";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const DEPLOYMENTS_FILE: &str = "deployments.json";
const CHECKPOINT_DIR: &str = "checkpoints";
const PLAN_DIR: &str = "plans";

/// A remembered destination scan and what it was identified as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub snapshot: DestinationSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_profile: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    overrides: BTreeMap<String, LayoutPaths>,
    snapshots: BTreeMap<String, Vec<SnapshotRecord>>,
    deployments: Vec<DeploymentRecord>,
}

/// File-backed store. Keyed records are cached in memory and written
/// through on every change; checkpoints go straight to disk.
pub struct JsonStore {
    dir: PathBuf,
    history_limit: usize,
    state: RwLock<State>,
}

impl JsonStore {
    /// Opens (creating if needed) the store under `dir`, loading existing
    /// records.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(CHECKPOINT_DIR))?;
        fs::create_dir_all(dir.join(PLAN_DIR))?;
        let state = State {
            overrides: load_json(&dir.join(OVERRIDES_FILE))?,
            snapshots: load_json(&dir.join(SNAPSHOTS_FILE))?,
            deployments: load_json(&dir.join(DEPLOYMENTS_FILE))?,
        };
        debug!(
            dir = %dir.display(),
            overrides = state.overrides.len(),
            deployments = state.deployments.len(),
            "store opened"
        );
        Ok(Self {
            dir,
            history_limit: DEFAULT_SNAPSHOT_HISTORY,
            state: RwLock::new(state),
        })
    }

    /// Opens the store in the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(crate::default_store_dir()?)
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // -- path overrides ------------------------------------------------------

    pub fn path_overrides(&self, destination_id: &str) -> Result<Option<LayoutPaths>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.overrides.get(destination_id).cloned())
    }

    /// Stores overrides for a destination; empty overrides remove the entry.
    pub fn set_path_overrides(
        &self,
        destination_id: &str,
        overrides: LayoutPaths,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if overrides.is_empty() {
            state.overrides.remove(destination_id);
        } else {
            state.overrides.insert(destination_id.to_string(), overrides);
        }
        write_json(&self.dir.join(OVERRIDES_FILE), &state.overrides)
    }

    // -- snapshot history ----------------------------------------------------

    /// Appends a scan, dropping the oldest beyond the history limit.
    pub fn record_snapshot(
        &self,
        destination_id: &str,
        record: SnapshotRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let history = state.snapshots.entry(destination_id.to_string()).or_default();
        history.push(record);
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        write_json(&self.dir.join(SNAPSHOTS_FILE), &state.snapshots)
    }

    /// Oldest first.
    pub fn snapshot_history(&self, destination_id: &str) -> Result<Vec<SnapshotRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .snapshots
            .get(destination_id)
            .cloned()
            .unwrap_or_default())
    }

    pub fn latest_snapshot(&self, destination_id: &str) -> Result<Option<SnapshotRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .snapshots
            .get(destination_id)
            .and_then(|h| h.last())
            .cloned())
    }

    // -- deployment log ------------------------------------------------------

    /// Inserts `record`, replacing any earlier record of the same plan.
    pub fn record_deployment(&self, record: DeploymentRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        match state
            .deployments
            .iter()
            .position(|r| r.plan_id == record.plan_id)
        {
            Some(i) => state.deployments[i] = record,
            None => state.deployments.push(record),
        }
        write_json(&self.dir.join(DEPLOYMENTS_FILE), &state.deployments)
    }

    /// Moves a logged deployment to `status` with its latest progress.
    pub fn update_deployment(
        &self,
        plan_id: &str,
        status: DeploymentStatus,
        items_completed: usize,
        bytes_transferred: u64,
        error: Option<Issue>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let record = state
            .deployments
            .iter_mut()
            .find(|r| r.plan_id == plan_id)
            .ok_or_else(|| StoreError::UnknownDeployment(plan_id.to_string()))?;
        let now = Utc::now();
        record.status = status;
        record.items_completed = items_completed;
        record.bytes_transferred = bytes_transferred;
        record.updated_at = now;
        record.error = error;
        if status.is_terminal() {
            record.finished_at = Some(now);
        }
        info!(plan = %plan_id, ?status, items_completed, "deployment log updated");
        write_json(&self.dir.join(DEPLOYMENTS_FILE), &state.deployments)
    }

    /// Changes only the status, e.g. on pause.
    pub fn set_deployment_status(
        &self,
        plan_id: &str,
        status: DeploymentStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let record = state
            .deployments
            .iter_mut()
            .find(|r| r.plan_id == plan_id)
            .ok_or_else(|| StoreError::UnknownDeployment(plan_id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        write_json(&self.dir.join(DEPLOYMENTS_FILE), &state.deployments)
    }

    pub fn deployment(&self, plan_id: &str) -> Result<Option<DeploymentRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.deployments.iter().find(|r| r.plan_id == plan_id).cloned())
    }

    /// All logged deployments, oldest first.
    pub fn deployments(&self) -> Result<Vec<DeploymentRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.deployments.clone())
    }

    /// Deployments that never reached a terminal status (crashed while
    /// running, or paused), newest first.
    pub fn interrupted(&self) -> Result<Vec<DeploymentRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut found: Vec<DeploymentRecord> = state
            .deployments
            .iter()
            .filter(|r| r.is_interrupted())
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    // -- plans ---------------------------------------------------------------

    /// Keeps a plan so an interrupted deployment can be resumed by id.
    pub fn save_plan(&self, plan: &DeploymentPlan) -> Result<(), StoreError> {
        write_json(&self.record_path(PLAN_DIR, plan.plan_id()), plan)
    }

    pub fn load_plan(&self, plan_id: &str) -> Result<Option<DeploymentPlan>, StoreError> {
        let path = self.record_path(PLAN_DIR, plan_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    // -- checkpoints ---------------------------------------------------------

    fn record_path(&self, sub: &str, plan_id: &str) -> PathBuf {
        let safe: String = plan_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(sub).join(format!("{safe}.json"))
    }

    fn checkpoint_path(&self, plan_id: &str) -> PathBuf {
        self.record_path(CHECKPOINT_DIR, plan_id)
    }
}

impl CheckpointStore for JsonStore {
    fn load(&self, plan_id: &str) -> Result<Option<TransferCheckpoint>, CheckpointError> {
        let path = self.checkpoint_path(plan_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, checkpoint: &TransferCheckpoint) -> Result<(), CheckpointError> {
        let path = self.checkpoint_path(&checkpoint.plan_id);
        write_json(&path, checkpoint).map_err(|e| match e {
            StoreError::Io(e) => CheckpointError::Io(e),
            StoreError::Json(e) => CheckpointError::Json(e),
            other => CheckpointError::Invalid(other.to_string()),
        })
    }

    fn clear(&self, plan_id: &str) -> Result<(), CheckpointError> {
        match fs::remove_file(self.checkpoint_path(plan_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = fs::read_to_string(path)?;
    match serde_json::from_str(&data) {
        Ok(value) => Ok(value),
        Err(e) => {
            // Keep the damaged file for inspection and start over.
            warn!(path = %path.display(), error = %e, "unreadable store file, starting empty");
            fs::rename(path, path.with_extension("json.corrupt"))?;
            Ok(T::default())
        }
    }
}

/// Serialises `value` next to `path` and renames it into place.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
