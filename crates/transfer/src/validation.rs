use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a destination path is relative and stays inside the
/// destination root.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`), with either separator
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    if file_path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {file_path}"
        )));
    }

    let path = Path::new(file_path);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::ParentDir | Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_relative_path("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_relative_path("../../../etc/passwd").is_err());
        assert!(validate_relative_path("Roms/../../escape").is_err());
        assert!(validate_relative_path("Roms\\..\\..\\escape").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_relative_path("/tmp/malicious").is_err());
    }

    #[test]
    fn accepts_nested_rom_path() {
        assert!(validate_relative_path("Roms/gb/Tetris (World).gb").is_ok());
        assert!(validate_relative_path("BIOS/scph1001.bin").is_ok());
    }

    #[test]
    fn accepts_dotfile() {
        assert!(validate_relative_path(".romrunner-speedtest").is_ok());
    }

    #[test]
    fn accepts_name_containing_dots() {
        assert!(validate_relative_path("Roms/snes/Mr..Do!.sfc").is_ok());
    }
}
