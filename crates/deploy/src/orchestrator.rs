//! Scan-to-transfer orchestrator.
//!
//! Drives one deployment pass against one destination: scan, resolve,
//! decide, plan, (optionally) diagnose, validate and transfer. Progress is
//! published as [`DeployEvent`]s and the run is recorded in the
//! [`JsonStore`] deployment log so it can be resumed after a crash.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use romrunner_catalog::{Catalog, Confidence, LayoutPaths};
use romrunner_eligibility::{EligibilityQuery, EligibilityResolver, EmulatorOverrides, UserOverrides};
use romrunner_layout::{
    ContentClass, ContentRoot, DestinationSnapshot, MatchReport, ResolveInput, ResolveSettings,
    ResolvedLayout, ScanOptions, discover_content, match_layouts, resolve_layout, scan_destination,
};
use romrunner_library::{BiosReport, LibraryItem};
use romrunner_protocol::{CheckpointStore, DeployEvent, DeploymentPlan, ToIssue, TransferState};
use romrunner_store::{DeploymentRecord, DeploymentStatus, JsonStore, SnapshotRecord, destination_id};
use romrunner_transfer::diagnostics::{DiagnosticsOptions, MediaReport, diagnose};
use romrunner_transfer::{
    ConverterRegistry, DestinationIo, LocalDestination, TransferExecutor, TransferHandle,
    TransferOptions, TransferReport,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::DeployError;
use crate::planner::{
    AuxiliarySources, ConversionPreferences, PlanOptions, PlanRequest, SelectedItem,
    plan_deployment,
};
use crate::validate::{ValidationOptions, ValidationReport, validate_plan};

/// Depth below the BIOS directory catalogued for already-present files.
const BIOS_DISCOVERY_DEPTH: usize = 3;

/// Pipeline switches. Passed by value; immutable for the pass.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Scan the destination before resolving. When off, the layout comes
    /// from overrides and the expected profile alone.
    pub scan_before_deploy: bool,
    pub resolve: ResolveSettings,
    /// Append every scan to the snapshot history.
    pub remember_scanned_layouts: bool,
    /// Persist explicit path overrides and reuse stored ones.
    pub remember_path_overrides: bool,
    pub plan: PlanOptions,
    pub validation: ValidationOptions,
    /// Media probes run before validation; skipped when `None`.
    pub diagnostics: Option<DiagnosticsOptions>,
    pub transfer: TransferOptions,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            scan_before_deploy: true,
            resolve: ResolveSettings::default(),
            remember_scanned_layouts: true,
            remember_path_overrides: true,
            plan: PlanOptions::default(),
            validation: ValidationOptions::default(),
            diagnostics: None,
            transfer: TransferOptions::default(),
        }
    }
}

/// Where to deploy and for which device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub root: PathBuf,
    pub device_id: String,
    /// Expected OS; the device's default OS when `None`.
    pub os_id: Option<String>,
}

/// User inputs for one pass.
#[derive(Debug, Clone, Default)]
pub struct DeployInputs {
    pub library: Vec<LibraryItem>,
    pub bios: Option<BiosReport>,
    pub user_overrides: UserOverrides,
    pub emulator_overrides: EmulatorOverrides,
    pub conversions: ConversionPreferences,
    /// Path overrides for this pass. Stored overrides apply when `None`.
    pub path_overrides: Option<LayoutPaths>,
}

/// What the destination turned out to be.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub destination_id: String,
    pub os_id: Option<String>,
    pub snapshot: Option<DestinationSnapshot>,
    pub report: Option<MatchReport>,
    pub layout: ResolvedLayout,
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub layout: ResolvedLayout,
    pub plan: Arc<DeploymentPlan>,
    pub validation: ValidationReport,
    pub media: Option<MediaReport>,
    pub report: TransferReport,
}

/// Orchestrates deployment passes against removable media.
pub struct DeployOrchestrator {
    catalog: Arc<Catalog>,
    resolver: EligibilityResolver,
    store: Arc<JsonStore>,
    settings: DeploySettings,
    converters: ConverterRegistry,
    events_tx: mpsc::Sender<DeployEvent>,
    events_rx: Option<mpsc::Receiver<DeployEvent>>,
    /// Token of the pending or running pass; replaced once that pass ends
    /// cancelled.
    cancel: Mutex<CancellationToken>,
    active: Mutex<Option<TransferHandle>>,
}

impl DeployOrchestrator {
    pub fn new(catalog: Arc<Catalog>, store: Arc<JsonStore>, settings: DeploySettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            resolver: EligibilityResolver::new(Arc::clone(&catalog)),
            catalog,
            store,
            settings,
            converters: ConverterRegistry::new(),
            events_tx,
            events_rx: Some(events_rx),
            cancel: Mutex::new(CancellationToken::new()),
            active: Mutex::new(None),
        }
    }

    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// State and completion events wait for room in the channel, so the
    /// receiver must be drained while a transfer runs.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<DeployEvent>> {
        self.events_rx.take()
    }

    /// Cancels the current (or next) pass at its next checkpoint. Later
    /// passes get a fresh token.
    pub fn cancel_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Retires `token` once its pass is over, so a cancel does not outlive
    /// the pass it was aimed at.
    fn end_pass(&self, token: &CancellationToken) {
        if !token.is_cancelled() {
            return;
        }
        let mut current = match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.is_cancelled() {
            debug!("pass cancelled, arming a fresh token");
            *current = CancellationToken::new();
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    /// Pauses the running transfer. Returns `false` when none is running.
    pub fn pause(&self) -> bool {
        self.with_active(TransferHandle::pause)
    }

    pub fn resume(&self) -> bool {
        self.with_active(TransferHandle::resume)
    }

    fn with_active(&self, f: impl FnOnce(&TransferHandle)) -> bool {
        let Ok(guard) = self.active.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(handle) => {
                f(handle);
                true
            }
            None => false,
        }
    }

    fn set_active(&self, handle: Option<TransferHandle>) {
        if let Ok(mut guard) = self.active.lock() {
            *guard = handle;
        }
    }

    fn ensure_running(cancel: &CancellationToken) -> Result<(), DeployError> {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        Ok(())
    }

    async fn emit(&self, event: DeployEvent) {
        let _ = self.events_tx.send(event).await;
    }

    fn target_os(&self, target: &DeployTarget) -> Result<Option<String>, DeployError> {
        let device = self
            .catalog
            .device(&target.device_id)
            .ok_or_else(|| DeployError::UnknownDevice(target.device_id.clone()))?;
        Ok(target.os_id.clone().or_else(|| device.default_os.clone()))
    }

    /// Scans the destination (when enabled), matches layout profiles and
    /// resolves the paths to deploy into.
    pub async fn inspect(
        &self,
        target: &DeployTarget,
        path_overrides: Option<&LayoutPaths>,
    ) -> Result<Inspection, DeployError> {
        let os_id = self.target_os(target)?;
        let dest_id = destination_id(&target.root);
        let overrides = self.path_overrides_for(&dest_id, path_overrides);
        let profiles = self.catalog.layout_profiles();
        let expected = os_id.as_deref().and_then(|os| self.catalog.profile_for_os(os));

        let (mut snapshot, report) = if self.settings.scan_before_deploy {
            let root_label = target.root.display().to_string();
            self.emit(DeployEvent::ScanProgress {
                root: root_label.clone(),
                entries_seen: 0,
                done: false,
            })
            .await;

            let root = target.root.clone();
            let opts = ScanOptions::for_profiles(profiles);
            let snap = tokio::task::spawn_blocking(move || scan_destination(&root, &opts)).await??;
            let report = match_layouts(&snap, profiles, expected.map(|p| p.id.as_str()));

            self.emit(DeployEvent::ScanProgress {
                root: root_label,
                entries_seen: snap.entry_count(),
                done: true,
            })
            .await;
            (Some(snap), Some(report))
        } else {
            (None, None)
        };

        let layout = resolve_layout(&ResolveInput {
            root: &target.root,
            expected,
            profiles,
            report: report.as_ref(),
            snapshot: snapshot.as_ref(),
            user_overrides: overrides.as_ref(),
            settings: self.settings.resolve,
        });
        for issue in layout.issues() {
            warn!(code = %issue.code, "{}", issue.message);
        }

        if let Some(snap) = snapshot.take() {
            let roots = vec![ContentRoot::new(ContentClass::Bios, layout.bios.path.clone())];
            let (snap, found) = tokio::task::spawn_blocking(move || {
                let mut snap = snap;
                let found = discover_content(&mut snap, &roots, BIOS_DISCOVERY_DEPTH);
                (snap, found)
            })
            .await?;
            let found = found?;
            debug!(bios_files = found, "catalogued destination BIOS files");
            self.remember_snapshot(&dest_id, &snap, report.as_ref());
            snapshot = Some(snap);
        }

        info!(
            destination = %dest_id,
            profile = ?layout.profile_id,
            confidence = ?layout.confidence,
            "destination resolved"
        );
        Ok(Inspection {
            destination_id: dest_id,
            os_id,
            snapshot,
            report,
            layout,
        })
    }

    fn path_overrides_for(&self, dest_id: &str, explicit: Option<&LayoutPaths>) -> Option<LayoutPaths> {
        if !self.settings.remember_path_overrides {
            return explicit.cloned();
        }
        if let Some(paths) = explicit {
            if let Err(e) = self.store.set_path_overrides(dest_id, paths.clone()) {
                warn!(destination = %dest_id, error = %e, "failed to remember path overrides");
            }
            return Some(paths.clone());
        }
        match self.store.path_overrides(dest_id) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(destination = %dest_id, error = %e, "failed to read stored path overrides");
                None
            }
        }
    }

    fn remember_snapshot(&self, dest_id: &str, snap: &DestinationSnapshot, report: Option<&MatchReport>) {
        if !self.settings.remember_scanned_layouts {
            return;
        }
        let best = report.and_then(MatchReport::best);
        let record = SnapshotRecord {
            snapshot: snap.clone(),
            detected_profile: best.map(|m| m.profile_id.clone()),
            confidence: best.map_or(Confidence::None, |m| m.confidence),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.record_snapshot(dest_id, record) {
            warn!(destination = %dest_id, error = %e, "failed to record snapshot");
        }
    }

    /// Runs the eligibility cascade for every library item.
    pub fn decide(
        &self,
        target: &DeployTarget,
        os_id: Option<&str>,
        inputs: &DeployInputs,
    ) -> Vec<SelectedItem> {
        inputs
            .library
            .iter()
            .map(|item| {
                let emulator = match os_id {
                    Some(os) => inputs.emulator_overrides.emulator_for(&self.catalog, os, &item.platform_id),
                    None => inputs.emulator_overrides.get(&item.platform_id),
                };
                let decision = self.resolver.decide(
                    &EligibilityQuery {
                        content_id: &item.content_id,
                        platform_id: &item.platform_id,
                        device_id: &target.device_id,
                        emulator_id: emulator,
                    },
                    &inputs.user_overrides,
                );
                SelectedItem {
                    content_id: item.content_id.clone(),
                    platform_id: item.platform_id.clone(),
                    source_path: item.path.clone(),
                    size: item.size,
                    emulator_id: emulator.map(str::to_string),
                    decision,
                }
            })
            .collect()
    }

    /// Builds the plan for `selected` and publishes `plan_ready`.
    pub async fn plan(
        &self,
        inspection: &Inspection,
        selected: &[SelectedItem],
        inputs: &DeployInputs,
    ) -> DeploymentPlan {
        let auxiliary = inputs
            .bios
            .as_ref()
            .map(AuxiliarySources::from_report)
            .unwrap_or_default();
        let plan = plan_deployment(&PlanRequest {
            catalog: &self.catalog,
            layout: &inspection.layout,
            items: selected,
            snapshot: inspection.snapshot.as_ref(),
            auxiliary: &auxiliary,
            conversions: &inputs.conversions,
            options: self.settings.plan,
            plan_id: None,
        });
        self.emit(DeployEvent::PlanReady {
            plan_id: plan.plan_id().to_string(),
            item_count: plan.len(),
            skipped_count: plan.skipped().len(),
            total_bytes: plan.total_bytes(),
            warnings: plan.warnings().to_vec(),
        })
        .await;
        plan
    }

    /// Runs a full pass: inspect, decide, plan, diagnose, validate and
    /// transfer.
    pub async fn deploy(
        &self,
        target: &DeployTarget,
        inputs: &DeployInputs,
    ) -> Result<DeployOutcome, DeployError> {
        let cancel = self.cancel_token();
        let result = self.deploy_pass(target, inputs, &cancel).await;
        self.end_pass(&cancel);
        result
    }

    async fn deploy_pass(
        &self,
        target: &DeployTarget,
        inputs: &DeployInputs,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, DeployError> {
        let inspection = self.inspect(target, inputs.path_overrides.as_ref()).await?;
        Self::ensure_running(cancel)?;

        let selected = self.decide(target, inspection.os_id.as_deref(), inputs);
        let plan = Arc::new(self.plan(&inspection, &selected, inputs).await);
        let dest: Arc<dyn DestinationIo> = Arc::new(LocalDestination::new(&target.root));

        let media = match &self.settings.diagnostics {
            Some(opts) => {
                let (d, o) = (Arc::clone(&dest), opts.clone());
                let report = tokio::task::spawn_blocking(move || diagnose(d.as_ref(), &o)).await??;
                for issue in report.issues() {
                    warn!(code = %issue.code, "{}", issue.message);
                }
                if report.blocks_deploy() {
                    error!(destination = %inspection.destination_id, "counterfeit media, deploy blocked");
                    return Err(DeployError::CounterfeitMedia(target.root.display().to_string()));
                }
                Some(report)
            }
            None => None,
        };

        let validation = {
            let (d, p, o) = (Arc::clone(&dest), Arc::clone(&plan), self.settings.validation);
            tokio::task::spawn_blocking(move || -> Result<ValidationReport, DeployError> {
                let free = d.available_space()?;
                Ok(validate_plan(&p, free, &o))
            })
            .await??
        };
        for issue in &validation.warnings {
            warn!(code = %issue.code, "{}", issue.message);
        }
        if !validation.is_valid() {
            error!(plan = %plan.plan_id(), errors = validation.errors.len(), "plan rejected");
            return Err(DeployError::Validation(Box::new(validation)));
        }
        Self::ensure_running(cancel)?;

        self.store.save_plan(&plan)?;
        self.store
            .record_deployment(DeploymentRecord::started(&plan, inspection.destination_id.clone()))?;
        let report = self.execute(Arc::clone(&plan), dest, cancel).await?;

        Ok(DeployOutcome {
            layout: inspection.layout,
            plan,
            validation,
            media,
            report,
        })
    }

    /// Continues a logged deployment from its checkpoint.
    pub async fn resume_deployment(&self, plan_id: &str) -> Result<TransferReport, DeployError> {
        let cancel = self.cancel_token();
        let result = self.resume_pass(plan_id, &cancel).await;
        self.end_pass(&cancel);
        result
    }

    async fn resume_pass(
        &self,
        plan_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, DeployError> {
        let plan = self
            .store
            .load_plan(plan_id)?
            .ok_or_else(|| DeployError::UnknownPlan(plan_id.to_string()))?;
        match self.store.deployment(plan_id)? {
            Some(_) => self.store.set_deployment_status(plan_id, DeploymentStatus::Running)?,
            None => {
                let dest_id = destination_id(plan.destination_root());
                self.store.record_deployment(DeploymentRecord::started(&plan, dest_id))?;
            }
        }
        info!(plan = %plan_id, root = %plan.destination_root().display(), "resuming deployment");
        let dest: Arc<dyn DestinationIo> = Arc::new(LocalDestination::new(plan.destination_root()));
        self.execute(Arc::new(plan), dest, cancel).await
    }

    async fn execute(
        &self,
        plan: Arc<DeploymentPlan>,
        dest: Arc<dyn DestinationIo>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, DeployError> {
        let plan_id = plan.plan_id().to_string();
        let checkpoints: Arc<dyn CheckpointStore> = self.store.clone();
        let (executor, handle) =
            TransferExecutor::new(plan, dest, checkpoints, self.settings.transfer.clone());
        let executor = executor
            .with_events(self.events_tx.clone())
            .with_converters(self.converters.clone());

        self.set_active(Some(handle.clone()));
        let forward = tokio::spawn({
            let (cancel, handle) = (cancel.clone(), handle.clone());
            async move {
                cancel.cancelled().await;
                handle.cancel();
            }
        });
        let tracker = tokio::spawn(track_status(
            Arc::clone(&self.store),
            plan_id.clone(),
            handle.subscribe(),
        ));

        let result = executor.run().await;
        forward.abort();
        self.set_active(None);
        let _ = tracker.await;

        match result {
            Ok(report) => {
                let status =
                    DeploymentStatus::from_transfer_state(report.state).unwrap_or(DeploymentStatus::Failed);
                if let Err(e) = self.store.update_deployment(
                    &plan_id,
                    status,
                    report.items_completed,
                    report.bytes_transferred,
                    report.error.clone(),
                ) {
                    warn!(plan = %plan_id, error = %e, "failed to update deployment log");
                }
                info!(
                    plan = %plan_id,
                    state = ?report.state,
                    items = report.items_completed,
                    bytes = report.bytes_transferred,
                    "deployment finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(plan = %plan_id, error = %e, "transfer could not start");
                if let Err(log_err) = self.store.update_deployment(
                    &plan_id,
                    DeploymentStatus::Failed,
                    0,
                    0,
                    Some(e.to_issue()),
                ) {
                    warn!(plan = %plan_id, error = %log_err, "failed to update deployment log");
                }
                Err(e.into())
            }
        }
    }
}

/// Mirrors pause/resume transitions into the deployment log until the
/// executor drops its state sender.
async fn track_status(store: Arc<JsonStore>, plan_id: String, mut rx: watch::Receiver<TransferState>) {
    while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        if !matches!(state, TransferState::Paused | TransferState::Running) {
            continue;
        }
        if let Some(status) = DeploymentStatus::from_transfer_state(state)
            && let Err(e) = store.set_deployment_status(&plan_id, status)
        {
            warn!(plan = %plan_id, error = %e, "failed to record status change");
        }
    }
}
