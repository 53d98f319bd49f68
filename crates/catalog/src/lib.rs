//! Reference catalog for ROM Runner deployments.
//!
//! The catalog is an immutable, versioned snapshot of everything the engine
//! needs to know ahead of time: platforms, devices and their chipsets,
//! operating systems with their layout profiles, emulators, BIOS
//! requirements, performance baselines, compatibility records and policy
//! thresholds. It is loaded once per session and passed explicitly (usually
//! as `Arc<Catalog>`) into every resolver call.
//!
//! Collections are kept as ordered `Vec`s: layout detection breaks ties by
//! declaration order, so the order in the source document is significant.

mod catalog;
mod policy;
mod records;
mod types;

pub use catalog::{Catalog, CatalogSource};
pub use policy::Policy;
pub use records::{
    CompatRecord, CompatStatus, HardwareTarget, PerformanceRecord, PerformanceTier,
};
pub use types::{
    BiosFile, BiosHash, Chipset, Confidence, DetectionRules, Device, DifficultyTier, Emulator,
    LayoutPaths, LayoutProfile, LayoutVariation, OperatingSystem, PathKind, Platform,
    VariationCondition,
};

/// Wildcard used in record keys for "any content" / "any emulator".
pub const WILDCARD: &str = "*";

/// Errors produced while loading or validating a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("duplicate performance record key: {0}")]
    DuplicatePerformanceKey(String),

    #[error("duplicate compatibility record key: {0}")]
    DuplicateCompatKey(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

fn is_wildcard(value: &str) -> bool {
    value == WILDCARD
}
