//! Shared types exchanged between ROM Runner components.
//!
//! The planner produces a [`DeploymentPlan`], the transfer executor consumes
//! it and persists [`TransferCheckpoint`]s through a [`CheckpointStore`],
//! and every component reports to the outside world through
//! [`DeployEvent`]s and [`Issue`]s keyed by stable [`ErrorCode`]s.

pub mod checkpoint;
pub mod events;
pub mod issue;
pub mod plan;
pub mod types;

pub use checkpoint::{CheckpointError, CheckpointStore, MemoryCheckpointStore, TransferCheckpoint};
pub use events::DeployEvent;
pub use issue::{ErrorCode, Issue, ToIssue};
pub use plan::{DeploymentItem, DeploymentItemKind, DeploymentPlan, SkippedItem};
pub use types::{TransferProgress, TransferState};
