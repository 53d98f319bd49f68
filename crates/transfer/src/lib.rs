//! Resumable, verified file transfer onto removable media.
//!
//! The [`TransferExecutor`] walks a [`DeploymentPlan`] in order, writing each
//! item to a temporary sibling, verifying it and renaming it into place.
//! Progress is checkpointed so an interrupted run picks up where it stopped.
//!
//! [`DeploymentPlan`]: romrunner_protocol::DeploymentPlan

mod chunked;
mod convert;
mod destination;
pub mod diagnostics;
mod executor;
mod progress;
mod retry;
mod validation;

use std::io;

use romrunner_protocol::{CheckpointError, ErrorCode, Issue, ToIssue};

pub use chunked::{ChunkReader, calculate_file_checksum, checksum_bytes, checksum_reader};
pub use convert::{Converter, ConverterRegistry};
pub use destination::{DestWriter, DestinationIo, LocalDestination};
pub use executor::{TransferExecutor, TransferHandle, TransferOptions, TransferReport};
pub use progress::SpeedCalculator;
pub use retry::RetryPolicy;
pub use validation::validate_relative_path;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Bytes written within one item between intra-file checkpoints: 64 MiB.
pub const DEFAULT_CHECKPOINT_GRANULARITY: u64 = 64 * 1024 * 1024;

/// Suffix of the temporary file an item is written to before the rename.
pub const TEMP_SUFFIX: &str = ".romrunner-part";

/// How the executor reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the item with backoff.
    Transient,
    /// Skip the item and continue with the next one.
    ItemPermanent,
    /// Stop the run; the checkpoint is kept for a later resume.
    DestinationWide,
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("cannot read source {path}: {source}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("write to {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch for {path}")]
    ChecksumMismatch { path: String },

    #[error("size mismatch for {path}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("destination lost: {0}")]
    DestinationLost(String),

    #[error("invalid checkpoint: {0}")]
    CheckpointInvalid(String),

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("conversion of {path} failed: {message}")]
    Conversion { path: String, message: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::SourceUnreadable { source, .. } => match io_class(source) {
                ErrorClass::Transient => ErrorClass::Transient,
                _ => ErrorClass::ItemPermanent,
            },
            TransferError::Write { source, .. } | TransferError::Io(source) => io_class(source),
            TransferError::ChecksumMismatch { .. } | TransferError::SizeMismatch { .. } => {
                ErrorClass::Transient
            }
            TransferError::Conversion { .. } | TransferError::InvalidPath(_) => {
                ErrorClass::ItemPermanent
            }
            TransferError::DestinationLost(_)
            | TransferError::CheckpointInvalid(_)
            | TransferError::Checkpoint(_)
            | TransferError::Cancelled => ErrorClass::DestinationWide,
        }
    }

    /// How a transient error is handled once its retries are used up. Only
    /// failures on the destination side stop the run; a source that keeps
    /// timing out or a copy that keeps failing verification costs just the
    /// item.
    pub fn class_after_retries(&self) -> ErrorClass {
        match self {
            TransferError::SourceUnreadable { .. }
            | TransferError::ChecksumMismatch { .. }
            | TransferError::SizeMismatch { .. }
            | TransferError::Conversion { .. }
            | TransferError::InvalidPath(_) => ErrorClass::ItemPermanent,
            TransferError::Write { .. }
            | TransferError::Io(_)
            | TransferError::DestinationLost(_)
            | TransferError::CheckpointInvalid(_)
            | TransferError::Checkpoint(_)
            | TransferError::Cancelled => ErrorClass::DestinationWide,
        }
    }

    /// Whether this is a verification failure rather than an I/O failure.
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            TransferError::ChecksumMismatch { .. } | TransferError::SizeMismatch { .. }
        )
    }
}

fn io_class(err: &io::Error) -> ErrorClass {
    use io::ErrorKind::*;
    match err.kind() {
        TimedOut | Interrupted | WouldBlock | ConnectionReset | ConnectionAborted
        | UnexpectedEof => ErrorClass::Transient,
        NotConnected | BrokenPipe | StorageFull | ReadOnlyFilesystem => {
            ErrorClass::DestinationWide
        }
        _ => ErrorClass::ItemPermanent,
    }
}

impl ToIssue for TransferError {
    fn to_issue(&self) -> Issue {
        let code = match self {
            TransferError::SourceUnreadable { .. } | TransferError::Conversion { .. } => {
                ErrorCode::TransferSourceUnreadable
            }
            TransferError::ChecksumMismatch { .. } | TransferError::SizeMismatch { .. } => {
                ErrorCode::TransferChecksumMismatch
            }
            TransferError::DestinationLost(_) => ErrorCode::TransferDestinationLost,
            TransferError::CheckpointInvalid(_)
            | TransferError::Checkpoint(CheckpointError::Invalid(_)) => {
                ErrorCode::TransferCheckpointInvalid
            }
            TransferError::Cancelled => ErrorCode::Cancelled,
            TransferError::Write { .. }
            | TransferError::Checkpoint(_)
            | TransferError::InvalidPath(_)
            | TransferError::Io(_) => ErrorCode::TransferWriteFailed,
        };
        // A bad checkpoint needs the user to discard it; everything else can
        // be skipped, retried or resumed.
        let recoverable = !matches!(
            self,
            TransferError::CheckpointInvalid(_)
                | TransferError::Checkpoint(CheckpointError::Invalid(_))
        );
        Issue::new(code, self.to_string(), recoverable)
    }
}
