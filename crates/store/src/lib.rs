//! Local persistence for ROM Runner.
//!
//! Everything lives as pretty-printed JSON under one directory
//! (`~/.config/romrunner/store` by default):
//!
//! - `path_overrides.json`: user path overrides keyed by destination id
//! - `snapshots.json`: recent destination scans per destination id
//! - `deployments.json`: the deployment log
//! - `checkpoints/<plan>.json`: transfer checkpoints
//! - `plans/<plan>.json`: saved plans, so interrupted runs can be resumed
//!
//! Files are replaced atomically (write to a sibling temp file, then
//! rename), so a crash mid-write leaves the previous version intact.

mod history;
mod store;

use std::path::{Path, PathBuf};

pub use history::{DeploymentRecord, DeploymentStatus};
pub use store::{DEFAULT_SNAPSHOT_HISTORY, JsonStore, SnapshotRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config directory not available")]
    NoConfigDir,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("unknown deployment: {0}")]
    UnknownDeployment(String),
}

/// Default store directory.
pub fn default_store_dir() -> Result<PathBuf, StoreError> {
    let base = config_dir().ok_or(StoreError::NoConfigDir)?;
    Ok(store_dir_in(&base))
}

fn store_dir_in(config_base: &Path) -> PathBuf {
    config_base.join("romrunner").join("store")
}

/// Stable key for a destination root: `/`-separated, no trailing separator.
pub fn destination_id(root: &Path) -> String {
    let s = root.to_string_lossy().replace('\\', "/");
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if cfg!(windows) {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
