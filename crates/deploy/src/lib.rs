//! Deployment planning and orchestration.
//!
//! [`plan_deployment`] turns eligibility decisions and a resolved layout
//! into an ordered [`DeploymentPlan`], [`validate_plan`] checks it against
//! the destination, and [`DeployOrchestrator`] drives the whole pipeline:
//! scan, resolve, decide, plan, diagnose, validate, transfer.
//!
//! [`DeploymentPlan`]: romrunner_protocol::DeploymentPlan

mod orchestrator;
mod planner;
mod validate;

use romrunner_layout::ScanError;
use romrunner_library::LibraryError;
use romrunner_protocol::{ErrorCode, Issue, ToIssue};
use romrunner_store::StoreError;
use romrunner_transfer::TransferError;

pub use orchestrator::{
    DeployInputs, DeployOrchestrator, DeployOutcome, DeploySettings, DeployTarget, Inspection,
};
pub use planner::{
    AuxiliarySource, AuxiliarySources, ConversionPreferences, ConversionRule, DEST_PATH_CONFLICT,
    PlanOptions, PlanRequest, SelectedItem, plan_deployment,
};
pub use validate::{ValidationOptions, ValidationReport, validate_plan};

/// Errors that stop a deployment before or around the transfer.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("library error: {0}")]
    Library(#[from] LibraryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("plan validation failed with {} error(s)", .0.errors.len())]
    Validation(Box<ValidationReport>),

    #[error("counterfeit media: {0}")]
    CounterfeitMedia(String),

    #[error("cancelled")]
    Cancelled,
}

impl ToIssue for DeployError {
    fn to_issue(&self) -> Issue {
        match self {
            DeployError::Scan(e) => e.to_issue(),
            DeployError::Library(e) => e.to_issue(),
            DeployError::Transfer(e) => e.to_issue(),
            DeployError::Store(_) => {
                Issue::new(ErrorCode::TransferCheckpointInvalid, self.to_string(), true)
            }
            DeployError::Io(_) | DeployError::Join(_) => {
                Issue::new(ErrorCode::TransferWriteFailed, self.to_string(), true)
            }
            DeployError::UnknownDevice(_) => Issue::blocking(ErrorCode::DeviceUnknown, self.to_string()),
            DeployError::UnknownPlan(_) => Issue::blocking(ErrorCode::PlanUnknown, self.to_string()),
            DeployError::Validation(report) => report.errors.first().cloned().unwrap_or_else(|| {
                Issue::blocking(ErrorCode::PlanInsufficientSpace, self.to_string())
            }),
            DeployError::CounterfeitMedia(_) => {
                Issue::new(ErrorCode::FakeMediaDetected, self.to_string(), false)
            }
            DeployError::Cancelled => Issue::new(ErrorCode::Cancelled, self.to_string(), true),
        }
    }
}
