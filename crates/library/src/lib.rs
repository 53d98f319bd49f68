//! Local content library: scanning, content hashing and BIOS verification.
//!
//! The library is the source side of a deployment. [`scan_library`] walks
//! one or more roots and classifies files to catalog platforms by extension,
//! [`HashPool`] identifies files on a bounded rayon pool, and
//! [`verify_bios`] checks a BIOS folder against the catalog's known hashes.

mod bios;
mod hash;
mod scan;

use std::path::PathBuf;

use romrunner_protocol::{ErrorCode, Issue, ToIssue};

pub use bios::{BiosCheck, BiosReport, BiosStatus, PlatformBiosSummary, verify_bios};
pub use hash::{FileHashes, HashPool, hash_file};
pub use scan::{LibraryItem, LibraryScan, LibraryScanOptions, scan_library};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("cannot read library path {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("hash pool: {0}")]
    Pool(String),
}

impl ToIssue for LibraryError {
    fn to_issue(&self) -> Issue {
        Issue::new(ErrorCode::PlanSourceUnreadable, self.to_string(), true)
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use romrunner_catalog::Catalog;

    pub const CATALOG: &str = r#"{
        "version": "lib-test",
        "platforms": [
            {"id": "gb", "name": "Game Boy", "aliases": ["gameboy"], "extensions": ["gb"]},
            {"id": "gba", "name": "Game Boy Advance", "extensions": ["gba"]},
            {"id": "psx", "name": "PlayStation", "aliases": ["ps1"], "extensions": ["cue", "chd", "iso"]},
            {"id": "psp", "name": "PSP", "extensions": ["iso", "cso"]}
        ],
        "biosFiles": [
            {"id": "gba-bios", "filename": "gba_bios.bin", "platformId": "gba",
             "requiredForEmulators": ["mgba"],
             "knownHashes": [{"md5": "1075691be817f0f84f92965dc2cce078"}]},
            {"id": "psx-scph1001", "filename": "scph1001.bin", "platformId": "psx", "required": true,
             "alternateFilenames": ["SCPH-1001.BIN"],
             "knownHashes": [{"md5": "BF3522A097DC95EA568CDF57C4B45404"}]},
            {"id": "psx-scph5501", "filename": "scph5501.bin", "platformId": "psx", "required": true},
            {"id": "dc-boot", "filename": "dc_boot.bin", "platformId": "psx", "subdirectory": "dc"}
        ]
    }"#;

    pub fn catalog() -> Catalog {
        Catalog::from_json(CATALOG).unwrap()
    }
}
