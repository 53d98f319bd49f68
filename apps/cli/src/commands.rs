//! Subcommand implementations. Results go to stdout as JSON; progress and
//! diagnostics go through `tracing`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, bail};
use romrunner_catalog::{Catalog, LayoutPaths};
use romrunner_deploy::{DeployInputs, DeployOrchestrator, DeployTarget, validate_plan};
use romrunner_eligibility::{EmulatorOverrides, OverrideAction, UserOverrides};
use romrunner_library::{BiosReport, HashPool, LibraryScan, LibraryScanOptions, scan_library, verify_bios};
use romrunner_protocol::{DeployEvent, TransferState};
use romrunner_store::JsonStore;
use romrunner_transfer::diagnostics::diagnose as probe_media;
use romrunner_transfer::{DestinationIo, LocalDestination};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::TargetArgs;
use crate::config::AppConfig;

pub struct Context {
    config: AppConfig,
    catalog_override: Option<PathBuf>,
}

impl Context {
    pub fn new(config: AppConfig, catalog_override: Option<&Path>) -> Self {
        Self {
            config,
            catalog_override: catalog_override.map(Path::to_path_buf),
        }
    }

    fn catalog(&self) -> anyhow::Result<Arc<Catalog>> {
        let path = self
            .catalog_override
            .as_ref()
            .or(self.config.catalog_path.as_ref())
            .context("no catalog configured; pass --catalog or set catalog_path")?;
        let catalog = Catalog::load(path)
            .with_context(|| format!("loading catalog {}", path.display()))?;
        info!(version = %catalog.version(), "catalog loaded");
        Ok(Arc::new(catalog))
    }

    fn store(&self) -> anyhow::Result<Arc<JsonStore>> {
        let store = match &self.config.store_dir {
            Some(dir) => JsonStore::open(dir)?,
            None => JsonStore::open_default()?,
        };
        Ok(Arc::new(store))
    }

    fn orchestrator(&self) -> anyhow::Result<DeployOrchestrator> {
        let catalog = self.catalog()?;
        let settings = self.config.deploy_settings(catalog.policy().slow_media_bps);
        Ok(DeployOrchestrator::new(catalog, self.store()?, settings))
    }

    fn scan_library(&self, catalog: &Catalog, roots: &[PathBuf]) -> anyhow::Result<LibraryScan> {
        let roots = if roots.is_empty() {
            self.config.library_roots.as_slice()
        } else {
            roots
        };
        if roots.is_empty() {
            bail!("no library roots configured; pass --root or set library_roots");
        }
        let opts = LibraryScanOptions {
            max_depth: self.config.scan.library_depth,
            ..LibraryScanOptions::default()
        };
        let scan = scan_library(roots, catalog, &opts)?;
        for file in &scan.ambiguous {
            warn!(path = %file.path.display(), candidates = ?file.candidates, "ambiguous platform");
        }
        Ok(scan)
    }

    fn verify_bios(&self, catalog: &Catalog, dir: Option<&Path>) -> anyhow::Result<Option<BiosReport>> {
        let Some(dir) = dir.or(self.config.bios_dir.as_deref()) else {
            return Ok(None);
        };
        let pool = HashPool::new()?;
        Ok(Some(verify_bios(catalog, dir, &pool)?))
    }

    fn inputs(&self, catalog: &Catalog, target: &TargetArgs) -> anyhow::Result<DeployInputs> {
        let scan = self.scan_library(catalog, &[])?;
        let mut user_overrides = UserOverrides::new();
        for id in &target.include {
            user_overrides.set(id.clone(), OverrideAction::Include);
        }
        for id in &target.exclude {
            user_overrides.set(id.clone(), OverrideAction::Exclude);
        }
        let mut emulator_overrides = EmulatorOverrides::new();
        for pair in &target.emulator {
            let (platform, emulator) = split_pair(pair)?;
            emulator_overrides.set(platform, emulator);
        }
        Ok(DeployInputs {
            library: scan.items,
            bios: self.verify_bios(catalog, None)?,
            user_overrides,
            emulator_overrides,
            conversions: self.config.conversions.clone(),
            path_overrides: parse_path_overrides(&target.paths)?,
        })
    }
}

fn deploy_target(target: &TargetArgs) -> DeployTarget {
    DeployTarget {
        root: target.dest.clone(),
        device_id: target.device.clone(),
        os_id: target.os.clone(),
    }
}

fn split_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => Ok((k.trim(), v.trim())),
        _ => bail!("expected KEY=VALUE, got {pair:?}"),
    }
}

fn parse_path_overrides(pairs: &[String]) -> anyhow::Result<Option<LayoutPaths>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut paths = LayoutPaths::default();
    for pair in pairs {
        let (kind, path) = split_pair(pair)?;
        let slot = match kind.to_ascii_lowercase().as_str() {
            "roms" => &mut paths.roms,
            "bios" => &mut paths.bios,
            "saves" => &mut paths.saves,
            "states" => &mut paths.states,
            "screenshots" => &mut paths.screenshots,
            "portmaster" => &mut paths.portmaster,
            other => bail!("unknown path kind {other:?}"),
        };
        *slot = Some(path.to_string());
    }
    Ok(Some(paths))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_events(mut rx: mpsc::Receiver<DeployEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                DeployEvent::TransferProgress(p) => debug!(progress = ?p, "transfer progress"),
                DeployEvent::TransferItemError { .. } => {
                    warn!(event = %serde_json::to_string(&event).unwrap_or_default(), "item error")
                }
                other => info!(event = other.name(), "{}", serde_json::to_string(other).unwrap_or_default()),
            }
        }
    })
}

pub fn library(ctx: &Context, roots: &[PathBuf], hash: bool) -> anyhow::Result<()> {
    let catalog = ctx.catalog()?;
    let scan = ctx.scan_library(&catalog, roots)?;
    info!(
        items = scan.items.len(),
        unmatched = scan.unmatched.len(),
        ambiguous = scan.ambiguous.len(),
        bytes = scan.total_bytes(),
        "library scanned"
    );
    if hash {
        let pool = HashPool::new()?;
        let paths: Vec<PathBuf> = scan.items.iter().map(|i| i.path.clone()).collect();
        let hashed: Vec<_> = pool
            .hash_files(&paths)
            .into_iter()
            .filter_map(|(path, result)| match result {
                Ok(h) => Some(serde_json::json!({ "path": path, "hashes": h })),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "hashing failed");
                    None
                }
            })
            .collect();
        return print_json(&hashed);
    }
    print_json(&scan)
}

pub fn bios(ctx: &Context, dir: Option<&Path>) -> anyhow::Result<()> {
    let catalog = ctx.catalog()?;
    let report = ctx
        .verify_bios(&catalog, dir)?
        .context("no BIOS directory configured; pass --dir or set bios_dir")?;
    let summaries: Vec<_> = catalog
        .platforms()
        .iter()
        .map(|p| report.completeness(&p.id, None))
        .filter(|s| s.required > 0)
        .collect();
    for summary in summaries.iter().filter(|s| !s.is_complete()) {
        warn!(
            platform = %summary.platform_id,
            missing = ?summary.missing,
            mismatched = ?summary.mismatched,
            "BIOS set incomplete"
        );
    }
    print_json(&serde_json::json!({ "checks": report.checks, "platforms": summaries }))
}

pub async fn inspect(ctx: &Context, target: &TargetArgs) -> anyhow::Result<()> {
    let orch = ctx.orchestrator()?;
    let overrides = parse_path_overrides(&target.paths)?;
    let inspection = orch.inspect(&deploy_target(target), overrides.as_ref()).await?;
    print_json(&serde_json::json!({
        "destinationId": inspection.destination_id,
        "osId": inspection.os_id,
        "matches": inspection.report,
        "layout": inspection.layout,
    }))
}

pub async fn plan(ctx: &Context, target: &TargetArgs) -> anyhow::Result<()> {
    let orch = ctx.orchestrator()?;
    let inputs = ctx.inputs(orch.catalog(), target)?;
    let deploy_target = deploy_target(target);
    let inspection = orch.inspect(&deploy_target, inputs.path_overrides.as_ref()).await?;
    let selected = orch.decide(&deploy_target, inspection.os_id.as_deref(), &inputs);
    let plan = orch.plan(&inspection, &selected, &inputs).await;

    let free = LocalDestination::new(&target.dest).available_space()?;
    let settings = ctx.config.deploy_settings(orch.catalog().policy().slow_media_bps);
    let validation = validate_plan(&plan, free, &settings.validation);
    if !validation.is_valid() {
        warn!(errors = validation.errors.len(), "plan would be rejected");
    }
    print_json(&serde_json::json!({ "plan": plan, "validation": validation }))
}

pub async fn deploy(ctx: &Context, target: &TargetArgs) -> anyhow::Result<()> {
    let mut orch = ctx.orchestrator()?;
    let inputs = ctx.inputs(orch.catalog(), target)?;
    let events = orch.take_events().map(log_events);

    let cancel = orch.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let result = orch.deploy(&deploy_target(target), &inputs).await;
    drop(orch);
    if let Some(events) = events {
        let _ = events.await;
    }
    let outcome = result?;

    print_json(&serde_json::json!({
        "plan": outcome.plan.as_ref(),
        "validation": outcome.validation,
        "media": outcome.media,
        "report": outcome.report,
    }))?;
    if outcome.report.state != TransferState::Completed {
        bail!("deployment ended in state {:?}", outcome.report.state);
    }
    Ok(())
}

pub async fn diagnose(ctx: &Context, dest: &Path, no_speed: bool) -> anyhow::Result<()> {
    let slow_bps = match ctx.catalog() {
        Ok(catalog) => catalog.policy().slow_media_bps,
        Err(e) => {
            debug!(error = %e, "no catalog, using default slow-media threshold");
            romrunner_catalog::Policy::default().slow_media_bps
        }
    };
    let mut opts = ctx.config.diagnostics_options(slow_bps);
    if no_speed {
        opts.speed = None;
    }
    let dest = LocalDestination::new(dest);
    let report = tokio::task::spawn_blocking(move || probe_media(&dest, &opts)).await??;
    for issue in report.issues() {
        warn!(code = %issue.code, "{}", issue.message);
    }
    print_json(&report)
}

pub fn history(ctx: &Context, interrupted: bool) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let records = if interrupted {
        store.interrupted()?
    } else {
        store.deployments()?
    };
    print_json(&records)
}

pub async fn resume(ctx: &Context, plan_id: &str) -> anyhow::Result<()> {
    let mut orch = ctx.orchestrator()?;
    let events = orch.take_events().map(log_events);
    let cancel = orch.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = orch.resume_deployment(plan_id).await;
    drop(orch);
    if let Some(events) = events {
        let _ = events.await;
    }
    let report = result?;
    print_json(&report)?;
    if report.state != TransferState::Completed {
        bail!("deployment ended in state {:?}", report.state);
    }
    Ok(())
}
