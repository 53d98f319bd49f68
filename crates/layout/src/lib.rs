//! Destination layout detection.
//!
//! Three stages, leaves first:
//!
//! 1. **Scan**: [`scan_destination`] lists the first levels of a destination
//!    root (plus explicitly probed deeper marker paths) into a
//!    [`DestinationSnapshot`]. This is the only stage that touches the disk.
//! 2. **Match**: [`match_layouts`] scores every catalog layout profile
//!    against the snapshot's markers. Pure.
//! 3. **Resolve**: [`resolve_layout`] merges user overrides, the detected
//!    layout and the expected profile into one [`ResolvedLayout`]. Pure.

pub mod matcher;
pub mod resolver;
pub mod scanner;
pub mod snapshot;

use romrunner_protocol::{ErrorCode, Issue, ToIssue};

pub use matcher::{ExpectedComparison, MatchReport, ProfileMatch, match_layouts, score_profile};
pub use resolver::{
    Discrepancy, PathSource, ResolveInput, ResolveSettings, ResolvedLayout, ResolvedPath,
    FALLBACK_PATHS, join_rel, resolve_layout,
};
pub use scanner::{ContentRoot, ScanOptions, discover_content, scan_destination};
pub use snapshot::{ContentClass, DestinationSnapshot, DiscoveredFile};

/// Errors that abort a destination scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("destination unreadable: {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("destination is not a directory: {0}")]
    NotADirectory(String),
}

impl ScanError {
    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        let path = path.display().to_string();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            ScanError::PermissionDenied { path }
        } else {
            ScanError::Unreadable { path, source: err }
        }
    }
}

impl ToIssue for ScanError {
    fn to_issue(&self) -> Issue {
        match self {
            ScanError::PermissionDenied { .. } => {
                Issue::new(ErrorCode::ScanPermissionDenied, self.to_string(), true)
            }
            ScanError::Unreadable { .. } | ScanError::NotADirectory(_) => {
                Issue::new(ErrorCode::ScanUnreadable, self.to_string(), true)
            }
        }
    }
}

/// Normalises a relative marker path for comparison: `/` separators, no
/// leading/trailing separators or `.` segments, lowercase.
pub fn normalize_marker(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_normalization() {
        assert_eq!(normalize_marker("MUOS/info/"), "muos/info");
        assert_eq!(normalize_marker("\\Roms\\GB"), "roms/gb");
        assert_eq!(normalize_marker("./.stock/"), ".stock");
        assert_eq!(normalize_marker(""), "");
    }

    #[test]
    fn scan_error_codes() {
        let denied = ScanError::PermissionDenied {
            path: "/mnt/sd".into(),
        };
        assert_eq!(denied.to_issue().code, ErrorCode::ScanPermissionDenied);

        let gone = ScanError::from_io(
            std::path::Path::new("/mnt/sd"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert_eq!(gone.to_issue().code, ErrorCode::ScanUnreadable);
    }
}
