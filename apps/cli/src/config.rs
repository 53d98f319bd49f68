//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/romrunner/config.toml`
//! - Windows: `%APPDATA%/romrunner/config.toml`

use std::path::{Path, PathBuf};

use romrunner_deploy::{ConversionPreferences, DeploySettings, PlanOptions, ValidationOptions};
use romrunner_layout::ResolveSettings;
use romrunner_transfer::diagnostics::{DiagnosticsOptions, SpeedProbeOptions};
use romrunner_transfer::{
    DEFAULT_CHECKPOINT_GRANULARITY, DEFAULT_CHUNK_SIZE, RetryPolicy, TransferOptions,
};
use serde::{Deserialize, Serialize};

/// ROM Runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directories scanned for ROMs.
    #[serde(default)]
    pub library_roots: Vec<PathBuf>,

    /// Local directory holding BIOS files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_dir: Option<PathBuf>,

    /// Catalog snapshot (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,

    /// Store directory; `~/.config/romrunner/store` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Per-platform conversion rules, e.g. `[conversions.psx]` with
    /// `targetFormat = "chd"`.
    #[serde(default)]
    pub conversions: ConversionPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "yes")]
    pub scan_before_deploy: bool,

    #[serde(default)]
    pub trust_detected_layout: bool,

    #[serde(default = "yes")]
    pub remember_scanned_layouts: bool,

    #[serde(default = "yes")]
    pub remember_path_overrides: bool,

    /// Directory depth searched below each library root.
    #[serde(default = "default_library_depth")]
    pub library_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_before_deploy: true,
            trust_detected_layout: false,
            remember_scanned_layouts: true,
            remember_path_overrides: true,
            library_depth: default_library_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "yes")]
    pub verify_checksums: bool,

    #[serde(default)]
    pub overwrite_existing: bool,

    #[serde(default = "yes")]
    pub include_bios: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_checkpoint_granularity")]
    pub checkpoint_granularity: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fail validation when a required BIOS file has no local source.
    #[serde(default)]
    pub block_on_missing_bios: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            overwrite_existing: false,
            include_bios: true,
            chunk_size: default_chunk_size(),
            checkpoint_granularity: default_checkpoint_granularity(),
            retry_attempts: default_retry_attempts(),
            block_on_missing_bios: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Probe capacity and speed before every deploy.
    #[serde(default)]
    pub run_before_deploy: bool,

    /// Counterfeit media blocks the deploy instead of warning.
    #[serde(default)]
    pub block_on_counterfeit: bool,
}

fn yes() -> bool {
    true
}

fn default_library_depth() -> usize {
    8
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_checkpoint_granularity() -> u64 {
    DEFAULT_CHECKPOINT_GRANULARITY
}

fn default_retry_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

impl AppConfig {
    /// Loads configuration from `path`, or creates a default if not found.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Pipeline settings for one deploy pass. `slow_media_bps` comes from
    /// the catalog policy.
    pub fn deploy_settings(&self, slow_media_bps: u64) -> DeploySettings {
        let retry = RetryPolicy {
            max_attempts: self.transfer.retry_attempts.max(1),
            ..RetryPolicy::default()
        };
        DeploySettings {
            scan_before_deploy: self.scan.scan_before_deploy,
            resolve: ResolveSettings {
                trust_detected_layout: self.scan.trust_detected_layout,
            },
            remember_scanned_layouts: self.scan.remember_scanned_layouts,
            remember_path_overrides: self.scan.remember_path_overrides,
            plan: PlanOptions {
                include_bios: self.transfer.include_bios,
            },
            validation: ValidationOptions {
                block_on_missing_auxiliary: self.transfer.block_on_missing_bios,
                ..ValidationOptions::default()
            },
            diagnostics: self
                .diagnostics
                .run_before_deploy
                .then(|| self.diagnostics_options(slow_media_bps)),
            transfer: TransferOptions {
                chunk_size: self.transfer.chunk_size.max(1),
                checkpoint_granularity: self.transfer.checkpoint_granularity,
                verify_checksums: self.transfer.verify_checksums,
                overwrite_existing: self.transfer.overwrite_existing,
                retry,
                ..TransferOptions::default()
            },
        }
    }

    pub fn diagnostics_options(&self, slow_media_bps: u64) -> DiagnosticsOptions {
        DiagnosticsOptions {
            speed: Some(SpeedProbeOptions {
                slow_bps: slow_media_bps,
                ..SpeedProbeOptions::default()
            }),
            block_on_counterfeit: self.diagnostics.block_on_counterfeit,
            ..DiagnosticsOptions::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("romrunner")
            .join("config.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("romrunner").join("config.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/romrunner/config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AppConfig::default();
        assert!(config.library_roots.is_empty());
        assert!(config.scan.scan_before_deploy);
        assert!(!config.scan.trust_detected_layout);
        assert!(config.transfer.verify_checksums);
        assert_eq!(config.transfer.retry_attempts, 3);
        assert!(!config.diagnostics.run_before_deploy);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            library_roots = ["/roms"]

            [scan]
            trust_detected_layout = true

            [transfer]
            retry_attempts = 5
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.conversions.get("psx").is_none());
        assert_eq!(config.library_roots, vec![PathBuf::from("/roms")]);
        assert!(config.scan.trust_detected_layout);
        assert!(config.scan.remember_path_overrides);
        assert_eq!(config.transfer.retry_attempts, 5);
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn conversion_rules_from_toml() {
        let toml_str = r#"
            [conversions.psx]
            targetFormat = "chd"
            sourceExtensions = ["cue", "iso"]
            sizeRatio = 0.6
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let rule = config.conversions.get("psx").unwrap();
        assert_eq!(rule.target_format, "chd");
        assert_eq!(rule.size_ratio, 0.6);
    }

    #[test]
    fn load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("romrunner").join("config.toml");
        let config = AppConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert!(config.catalog_path.is_none());

        let mut changed = config;
        changed.catalog_path = Some("/data/catalog.json".into());
        changed.save_to(&path).unwrap();
        let reloaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.catalog_path, Some(PathBuf::from("/data/catalog.json")));
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.transfer.include_bios = false;
        config.transfer.retry_attempts = 0;
        config.diagnostics.run_before_deploy = true;
        config.diagnostics.block_on_counterfeit = true;

        let settings = config.deploy_settings(5 * 1024 * 1024);
        assert!(!settings.plan.include_bios);
        assert_eq!(settings.transfer.retry.max_attempts, 1);
        let diag = settings.diagnostics.unwrap();
        assert!(diag.block_on_counterfeit);
        assert_eq!(diag.speed.unwrap().slow_bps, 5 * 1024 * 1024);
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path();
        assert!(path.ends_with("config.toml"));
    }
}
