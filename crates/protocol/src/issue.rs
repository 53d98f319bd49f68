//! Stable error codes surfaced to UIs and tests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a surfaced problem. Callers match on these, never
/// on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DeviceUnknown,
    ScanUnreadable,
    ScanPermissionDenied,
    ResolutionAmbiguity,
    ResolutionFallback,
    PlanInsufficientSpace,
    PlanMissingAuxiliary,
    PlanSourceUnreadable,
    /// No saved plan under the requested id.
    PlanUnknown,
    TransferSourceUnreadable,
    TransferChecksumMismatch,
    TransferWriteFailed,
    TransferDestinationLost,
    TransferCheckpointInvalid,
    FakeMediaDetected,
    SlowMedia,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::DeviceUnknown => "DEVICE_UNKNOWN",
            ErrorCode::ScanUnreadable => "SCAN_UNREADABLE",
            ErrorCode::ScanPermissionDenied => "SCAN_PERMISSION_DENIED",
            ErrorCode::ResolutionAmbiguity => "RESOLUTION_AMBIGUITY",
            ErrorCode::ResolutionFallback => "RESOLUTION_FALLBACK",
            ErrorCode::PlanInsufficientSpace => "PLAN_INSUFFICIENT_SPACE",
            ErrorCode::PlanMissingAuxiliary => "PLAN_MISSING_AUXILIARY",
            ErrorCode::PlanSourceUnreadable => "PLAN_SOURCE_UNREADABLE",
            ErrorCode::PlanUnknown => "PLAN_UNKNOWN",
            ErrorCode::TransferSourceUnreadable => "TRANSFER_SOURCE_UNREADABLE",
            ErrorCode::TransferChecksumMismatch => "TRANSFER_CHECKSUM_MISMATCH",
            ErrorCode::TransferWriteFailed => "TRANSFER_WRITE_FAILED",
            ErrorCode::TransferDestinationLost => "TRANSFER_DESTINATION_LOST",
            ErrorCode::TransferCheckpointInvalid => "TRANSFER_CHECKPOINT_INVALID",
            ErrorCode::FakeMediaDetected => "FAKE_MEDIA_DETECTED",
            ErrorCode::SlowMedia => "SLOW_MEDIA",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A surfaced error or warning: stable code, short message, and whether the
/// user can recover (retry, override, free space) without restarting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl Issue {
    pub fn new(code: ErrorCode, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable,
        }
    }

    /// A recoverable issue.
    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, true)
    }

    /// An issue that blocks the operation until its cause is fixed.
    pub fn blocking(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Converts an error into its surfaced form.
pub trait ToIssue {
    fn to_issue(&self) -> Issue;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_wire_name_matches_as_str() {
        for code in [
            ErrorCode::ScanUnreadable,
            ErrorCode::DeviceUnknown,
            ErrorCode::PlanUnknown,
            ErrorCode::PlanInsufficientSpace,
            ErrorCode::TransferDestinationLost,
            ErrorCode::FakeMediaDetected,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn issue_display() {
        let issue = Issue::warning(ErrorCode::SlowMedia, "write speed 2 MB/s");
        assert_eq!(issue.to_string(), "[SLOW_MEDIA] write speed 2 MB/s");
        assert!(issue.recoverable);
        assert!(!Issue::blocking(ErrorCode::PlanUnknown, "no plan x").recoverable);
    }
}
