//! Plan execution: ordered, checkpointed, pausable copying.
//!
//! Each item is written to `<dest>.romrunner-part`, verified, then renamed
//! into place, so an interrupted run never leaves a truncated file under its
//! final name. The executor owns the checkpoint and all counters; observers
//! get [`DeployEvent`] snapshots and the current [`TransferState`] through a
//! `watch` channel.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use romrunner_protocol::{
    CheckpointError, CheckpointStore, DeployEvent, DeploymentItem, DeploymentPlan, Issue,
    ToIssue, TransferCheckpoint, TransferProgress, TransferState,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunked::{ChunkReader, calculate_file_checksum, checksum_reader};
use crate::convert::{ConverterRegistry, unconverted_dest};
use crate::destination::{DestWriter, DestinationIo};
use crate::progress::SpeedCalculator;
use crate::retry::RetryPolicy;
use crate::validation::validate_relative_path;
use crate::{
    DEFAULT_CHECKPOINT_GRANULARITY, DEFAULT_CHUNK_SIZE, ErrorClass, TEMP_SUFFIX, TransferError,
};

/// Knobs for one transfer run.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub chunk_size: usize,
    /// Bytes written within an item between intra-file checkpoints.
    pub checkpoint_granularity: u64,
    /// Compare SHA-256 of source and written file before the rename.
    pub verify_checksums: bool,
    /// Replace destination files that already exist with the same size.
    pub overwrite_existing: bool,
    pub retry: RetryPolicy,
    /// Minimum gap between `transfer_progress` events within an item.
    pub progress_interval: Duration,
    /// Where converted files are staged; the system temp dir when `None`.
    pub staging_dir: Option<PathBuf>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checkpoint_granularity: DEFAULT_CHECKPOINT_GRANULARITY,
            verify_checksums: true,
            overwrite_existing: false,
            retry: RetryPolicy::default(),
            progress_interval: Duration::from_millis(500),
            staging_dir: None,
        }
    }
}

/// Outcome of [`TransferExecutor::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub plan_id: String,
    pub state: TransferState,
    pub items_completed: usize,
    pub skipped_items: Vec<usize>,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
    pub error: Option<Issue>,
}

/// Control surface for a running transfer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    state: watch::Receiver<TransferState>,
}

impl TransferHandle {
    /// Requests a pause at the next item or chunk boundary.
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    /// Requests cancellation. Completed items stay in place.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.state.clone()
    }
}

struct ItemSource {
    path: PathBuf,
    dest_path: String,
    /// `path` is a converter output that must be removed afterwards.
    staged: bool,
}

/// Executes one [`DeploymentPlan`] against one destination.
pub struct TransferExecutor {
    plan: Arc<DeploymentPlan>,
    dest: Arc<dyn DestinationIo>,
    store: Arc<dyn CheckpointStore>,
    converters: ConverterRegistry,
    options: TransferOptions,
    events: Option<mpsc::Sender<DeployEvent>>,
    cancel: CancellationToken,
    pause_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<TransferState>,
    checkpoint: TransferCheckpoint,
    /// Checkpointed bytes before the item in flight.
    item_base: u64,
    /// Bytes shown to observers, including unconfirmed intra-item progress.
    live_bytes: u64,
    speed: SpeedCalculator,
    last_progress: Option<Instant>,
    warnings: Vec<String>,
}

impl TransferExecutor {
    pub fn new(
        plan: Arc<DeploymentPlan>,
        dest: Arc<dyn DestinationIo>,
        store: Arc<dyn CheckpointStore>,
        options: TransferOptions,
    ) -> (Self, TransferHandle) {
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(TransferState::Pending);
        let handle = TransferHandle {
            cancel: cancel.clone(),
            pause: Arc::new(pause_tx),
            state: state_rx,
        };
        let checkpoint = TransferCheckpoint::start(plan.plan_id());
        let executor = Self {
            plan,
            dest,
            store,
            converters: ConverterRegistry::new(),
            options,
            events: None,
            cancel,
            pause_rx,
            state_tx,
            checkpoint,
            item_base: 0,
            live_bytes: 0,
            speed: SpeedCalculator::default(),
            last_progress: None,
            warnings: Vec::new(),
        };
        (executor, handle)
    }

    /// Sends events to `tx`. Progress events are dropped when the channel is
    /// full; state and completion events wait for room.
    pub fn with_events(mut self, tx: mpsc::Sender<DeployEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    /// Runs the plan to a terminal state.
    ///
    /// Resumes from the stored checkpoint when one exists. Returns `Err` only
    /// when the run cannot start (unreadable or foreign checkpoint); every
    /// other outcome is reported through [`TransferReport::state`].
    pub async fn run(mut self) -> Result<TransferReport, TransferError> {
        let started = Instant::now();
        let plan_id = self.plan.plan_id().to_string();

        self.checkpoint = self.load_checkpoint().await?;
        self.live_bytes = self.checkpoint.bytes_transferred;
        if self.checkpoint.items_completed > 0 || self.checkpoint.current_item.is_some() {
            info!(
                plan = %plan_id,
                items_completed = self.checkpoint.items_completed,
                offset = self.checkpoint.current_item_byte_offset,
                "resuming from checkpoint"
            );
        }
        info!(
            plan = %plan_id,
            items = self.plan.len(),
            total_bytes = self.plan.total_bytes(),
            dest = %self.dest.root().display(),
            "transfer started"
        );

        let outcome = if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            self.set_state(TransferState::Running).await;
            self.run_items().await
        };

        let (state, issue) = match outcome {
            Ok(()) => {
                let store = Arc::clone(&self.store);
                let id = plan_id.clone();
                if let Err(e) = blocking(move || store.clear(&id).map_err(TransferError::from)).await
                {
                    warn!(plan = %plan_id, error = %e, "could not clear checkpoint");
                }
                (TransferState::Completed, None)
            }
            Err(err) => {
                if let Err(e) = self.save_checkpoint().await {
                    warn!(plan = %plan_id, error = %e, "could not persist checkpoint");
                }
                let state = if matches!(err, TransferError::Cancelled) {
                    TransferState::Cancelled
                } else {
                    TransferState::Failed
                };
                (state, Some(err.to_issue()))
            }
        };
        self.set_state(state).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let cp = &self.checkpoint;
        match &issue {
            None => info!(
                plan = %plan_id,
                items = cp.items_completed,
                skipped = cp.skipped_items.len(),
                bytes = cp.bytes_transferred,
                elapsed_ms,
                "transfer completed"
            ),
            Some(issue) => warn!(
                plan = %plan_id,
                state = ?state,
                items = cp.items_completed,
                error = %issue,
                "transfer stopped"
            ),
        }

        let report = TransferReport {
            plan_id: plan_id.clone(),
            state,
            items_completed: cp.items_completed,
            skipped_items: cp.skipped_items.clone(),
            bytes_transferred: cp.bytes_transferred,
            elapsed_ms,
            warnings: self.warnings.clone(),
            error: issue,
        };
        self.emit(DeployEvent::TransferComplete {
            plan_id,
            state,
            items_completed: report.items_completed,
            items_skipped: report.skipped_items.len(),
            bytes_transferred: report.bytes_transferred,
            elapsed_ms,
            error: report.error.clone(),
        })
        .await;
        Ok(report)
    }

    async fn load_checkpoint(&self) -> Result<TransferCheckpoint, TransferError> {
        let store = Arc::clone(&self.store);
        let plan_id = self.plan.plan_id().to_string();
        let stored = blocking(move || store.load(&plan_id).map_err(TransferError::from)).await?;
        let Some(cp) = stored else {
            return Ok(TransferCheckpoint::start(self.plan.plan_id()));
        };
        match cp.validate(&self.plan) {
            Ok(()) => Ok(cp),
            Err(CheckpointError::Invalid(msg)) => Err(TransferError::CheckpointInvalid(msg)),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_items(&mut self) -> Result<(), TransferError> {
        let plan = Arc::clone(&self.plan);
        while self.checkpoint.items_completed < plan.len() {
            let index = self.checkpoint.items_completed;
            let Some(item) = plan.item(index) else {
                break;
            };
            self.gate().await?;

            let resume_offset = match self.checkpoint.current_item {
                Some(i) if i == index => self.checkpoint.current_item_byte_offset,
                _ => 0,
            };
            self.item_base = self
                .checkpoint
                .bytes_transferred
                .saturating_sub(resume_offset.min(item.byte_size));

            match self.transfer_with_retry(index, item, resume_offset).await {
                Ok(()) => {
                    debug!(item = index, dest = %item.dest_path, "item done");
                    self.finish_item(index, item, false);
                }
                Err((TransferError::Cancelled, _)) => return Err(TransferError::Cancelled),
                Err((err, ErrorClass::ItemPermanent)) => {
                    warn!(item = index, dest = %item.dest_path, error = %err, "skipping item");
                    self.item_error(index, &item.dest_path, &err, true).await;
                    self.finish_item(index, item, true);
                }
                Err((err, _)) => {
                    error!(item = index, dest = %item.dest_path, error = %err, "transfer failed");
                    self.item_error(index, &item.dest_path, &err, false).await;
                    return Err(err);
                }
            }
            self.save_checkpoint().await?;
            self.emit_progress(index, &item.dest_path, true);
        }
        Ok(())
    }

    /// Retries transient failures with backoff. On exhaustion the error is
    /// reclassified by [`TransferError::class_after_retries`].
    async fn transfer_with_retry(
        &mut self,
        index: usize,
        item: &DeploymentItem,
        resume_offset: u64,
    ) -> Result<(), (TransferError, ErrorClass)> {
        let mut attempt = 0u32;
        let mut offset = resume_offset;
        loop {
            attempt += 1;
            let err = match self.transfer_item(index, item, offset).await {
                Ok(()) => return Ok(()),
                Err(TransferError::Cancelled) => {
                    return Err((TransferError::Cancelled, ErrorClass::DestinationWide));
                }
                Err(e) => self.confirm_destination(e).await,
            };
            let class = err.class();
            if class != ErrorClass::Transient {
                return Err((err, class));
            }
            if !self.options.retry.allows_retry(attempt) {
                warn!(item = index, attempts = attempt, error = %err, "retries exhausted");
                let escalated = err.class_after_retries();
                return Err((err, escalated));
            }

            offset = match self.checkpoint.current_item {
                Some(i) if i == index && !err.is_verification() => {
                    self.checkpoint.current_item_byte_offset
                }
                _ => 0,
            };
            let delay = self.options.retry.delay_for_attempt(attempt);
            warn!(
                item = index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient error, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err((TransferError::Cancelled, ErrorClass::DestinationWide));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn transfer_item(
        &mut self,
        index: usize,
        item: &DeploymentItem,
        start_offset: u64,
    ) -> Result<(), TransferError> {
        validate_relative_path(&item.dest_path)?;
        let dest = Arc::clone(&self.dest);
        if !blocking(move || Ok(dest.is_available())).await? {
            return Err(self.destination_lost());
        }

        let source = self.prepare_source(index, item).await?;
        let result = self.copy_source(index, item, &source, start_offset).await;
        if source.staged {
            let staged = source.path.clone();
            let _ = tokio::task::spawn_blocking(move || std::fs::remove_file(staged)).await;
        }
        result
    }

    async fn prepare_source(
        &mut self,
        index: usize,
        item: &DeploymentItem,
    ) -> Result<ItemSource, TransferError> {
        if !item.requires_conversion {
            return Ok(ItemSource {
                path: item.source_path.clone(),
                dest_path: item.dest_path.clone(),
                staged: false,
            });
        }
        let format = item.target_format.clone().unwrap_or_default();
        let Some(converter) = self.converters.get(&format) else {
            let msg = format!(
                "no converter for '{format}', copied {} unconverted",
                item.source_path.display()
            );
            if !self.warnings.contains(&msg) {
                warn!(item = index, format = %format, "no converter registered, copying as-is");
                self.warnings.push(msg);
            }
            let dest_path = unconverted_dest(&item.dest_path, &item.source_path);
            validate_relative_path(&dest_path)?;
            return Ok(ItemSource {
                path: item.source_path.clone(),
                dest_path,
                staged: false,
            });
        };

        let staging_dir = self
            .options
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let staged = staging_dir.join(format!("{}-{index}.{format}", self.plan.plan_id()));
        let src = item.source_path.clone();
        let out = staged.clone();
        debug!(item = index, format = %format, "converting");
        blocking(move || {
            converter
                .convert(&src, &out)
                .map_err(|e| TransferError::Conversion {
                    path: src.display().to_string(),
                    message: e.to_string(),
                })
        })
        .await?;
        Ok(ItemSource {
            path: staged,
            dest_path: item.dest_path.clone(),
            staged: true,
        })
    }

    async fn copy_source(
        &mut self,
        index: usize,
        item: &DeploymentItem,
        source: &ItemSource,
        start_offset: u64,
    ) -> Result<(), TransferError> {
        let dest_path = source.dest_path.clone();
        let temp = format!("{dest_path}{TEMP_SUFFIX}");
        let mut offset = if source.staged { 0 } else { start_offset };

        let src = source.path.clone();
        let chunk_size = self.options.chunk_size;
        let mut reader =
            blocking(move || ChunkReader::new(&src, chunk_size).map_err(|e| source_error(&src, e)))
                .await?;
        let file_size = reader.file_size();

        if offset == 0 && !self.options.overwrite_existing {
            let dest = Arc::clone(&self.dest);
            let path = dest_path.clone();
            let existing =
                blocking(move || dest.file_len(&path).map_err(|e| write_error(&path, e))).await?;
            if existing == Some(file_size) {
                debug!(item = index, dest = %dest_path, "already present, keeping it");
                return Ok(());
            }
        }

        if offset > 0 {
            let dest = Arc::clone(&self.dest);
            let path = temp.clone();
            let temp_len =
                blocking(move || dest.file_len(&path).map_err(|e| write_error(&path, e))).await?;
            if offset > file_size || temp_len.is_none_or(|len| len < offset) {
                debug!(item = index, offset, "partial file unusable, restarting item");
                offset = 0;
            } else {
                debug!(item = index, offset, "continuing partial file");
            }
        }

        let dest = Arc::clone(&self.dest);
        let src = source.path.clone();
        let path = temp.clone();
        let (mut reader, mut writer) = blocking(move || {
            reader.seek_to(offset).map_err(|e| source_error(&src, e))?;
            let writer = dest
                .open_writer(&path, offset)
                .map_err(|e| write_error(&path, e))?;
            Ok((reader, writer))
        })
        .await?;

        self.record_offset(index, item, offset, source.staged);
        let mut since_checkpoint = 0u64;
        loop {
            self.gate().await?;

            let src = source.path.clone();
            let path = temp.clone();
            let (r, w, n) = blocking(move || {
                let Some(chunk) = reader.next_chunk().map_err(|e| source_error(&src, e))? else {
                    return Ok((reader, writer, 0));
                };
                writer
                    .write_all(&chunk)
                    .map_err(|e| write_error(&path, e))?;
                Ok((reader, writer, chunk.len()))
            })
            .await?;
            reader = r;
            writer = w;
            if n == 0 {
                break;
            }

            offset += n as u64;
            since_checkpoint += n as u64;
            self.speed.add_sample(n as u64);
            self.record_offset(index, item, offset, source.staged);

            if since_checkpoint >= self.options.checkpoint_granularity {
                since_checkpoint = 0;
                writer = sync_writer(writer, &temp).await?;
                self.save_checkpoint().await?;
            }
            self.emit_progress(index, &dest_path, false);
        }

        drop(sync_writer(writer, &temp).await?);
        self.verify(&source.path, &temp, file_size).await?;

        let dest = Arc::clone(&self.dest);
        let path = dest_path.clone();
        blocking(move || dest.rename(&temp, &path).map_err(|e| write_error(&path, e))).await
    }

    async fn verify(&self, source: &Path, temp: &str, expected: u64) -> Result<(), TransferError> {
        let dest = Arc::clone(&self.dest);
        let src = source.to_path_buf();
        let path = temp.to_string();
        let checksums = self.options.verify_checksums;
        blocking(move || {
            let actual = dest
                .file_len(&path)
                .map_err(|e| write_error(&path, e))?
                .unwrap_or(0);
            if actual != expected {
                let _ = dest.remove_file(&path);
                return Err(TransferError::SizeMismatch {
                    path,
                    expected,
                    actual,
                });
            }
            if !checksums {
                return Ok(());
            }
            let want = calculate_file_checksum(&src).map_err(|e| source_error(&src, e))?;
            let got = dest
                .open_reader(&path)
                .and_then(checksum_reader)
                .map_err(|e| write_error(&path, e))?;
            if want != got {
                let _ = dest.remove_file(&path);
                return Err(TransferError::ChecksumMismatch { path });
            }
            Ok(())
        })
        .await
    }

    /// Reclassifies a write failure as destination loss when the volume is
    /// gone.
    async fn confirm_destination(&self, err: TransferError) -> TransferError {
        if !matches!(err, TransferError::Write { .. } | TransferError::Io(_)) {
            return err;
        }
        let dest = Arc::clone(&self.dest);
        let available = tokio::task::spawn_blocking(move || dest.is_available())
            .await
            .unwrap_or(false);
        if available {
            err
        } else {
            self.destination_lost()
        }
    }

    fn destination_lost(&self) -> TransferError {
        TransferError::DestinationLost(format!(
            "{} is no longer reachable",
            self.dest.root().display()
        ))
    }

    /// Cancellation and pause checkpoint, called before each item and chunk.
    async fn gate(&mut self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let paused = *self.pause_rx.borrow_and_update();
        if !paused {
            return Ok(());
        }

        self.set_state(TransferState::Paused).await;
        if let Err(e) = self.save_checkpoint().await {
            warn!(error = %e, "could not persist checkpoint on pause");
        }
        info!(plan = %self.plan.plan_id(), "transfer paused");
        loop {
            let changed = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                changed = self.pause_rx.changed() => changed,
            };
            // A dropped handle can never resume us, so treat it as a resume.
            if changed.is_err() || !*self.pause_rx.borrow_and_update() {
                break;
            }
        }
        info!(plan = %self.plan.plan_id(), "transfer resumed");
        self.set_state(TransferState::Running).await;
        Ok(())
    }

    fn record_offset(&mut self, index: usize, item: &DeploymentItem, offset: u64, staged: bool) {
        let shown = offset.min(item.byte_size);
        self.live_bytes = self.item_base + shown;
        let cp = &mut self.checkpoint;
        cp.current_item = Some(index);
        // Converter output is regenerated on resume, so it has no usable offset.
        if staged {
            cp.current_item_byte_offset = 0;
            cp.bytes_transferred = self.item_base;
        } else {
            cp.current_item_byte_offset = offset;
            cp.bytes_transferred = self.item_base + shown;
        }
    }

    fn finish_item(&mut self, index: usize, item: &DeploymentItem, skipped: bool) {
        let cp = &mut self.checkpoint;
        cp.items_completed = index + 1;
        cp.current_item = None;
        cp.current_item_byte_offset = 0;
        if skipped {
            cp.skipped_items.push(index);
            cp.bytes_transferred = self.item_base;
        } else {
            cp.bytes_transferred = self.item_base + item.byte_size;
        }
        self.live_bytes = cp.bytes_transferred;
    }

    async fn save_checkpoint(&mut self) -> Result<(), TransferError> {
        self.checkpoint.updated_at = Utc::now();
        let store = Arc::clone(&self.store);
        let cp = self.checkpoint.clone();
        blocking(move || store.save(&cp).map_err(TransferError::from)).await
    }

    async fn set_state(&mut self, next: TransferState) {
        let current = *self.state_tx.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = ?current, to = ?next, "ignoring invalid state transition");
            return;
        }
        self.state_tx.send_replace(next);
        debug!(plan = %self.plan.plan_id(), from = ?current, to = ?next, "state changed");
        self.emit(DeployEvent::TransferState {
            plan_id: self.plan.plan_id().to_string(),
            state: next,
        })
        .await;
    }

    async fn item_error(&self, index: usize, dest_path: &str, err: &TransferError, skipped: bool) {
        self.emit(DeployEvent::TransferItemError {
            plan_id: self.plan.plan_id().to_string(),
            item_index: index,
            dest_path: dest_path.to_string(),
            issue: err.to_issue(),
            skipped,
        })
        .await;
    }

    fn emit_progress(&mut self, index: usize, current_file: &str, force: bool) {
        let Some(tx) = &self.events else {
            return;
        };
        let now = Instant::now();
        if !force
            && self
                .last_progress
                .is_some_and(|last| now.duration_since(last) < self.options.progress_interval)
        {
            return;
        }
        self.last_progress = Some(now);

        let total_bytes = self.plan.total_bytes();
        let remaining = total_bytes.saturating_sub(self.live_bytes);
        let progress = TransferProgress {
            plan_id: self.plan.plan_id().to_string(),
            state: *self.state_tx.borrow(),
            item_index: index,
            total_items: self.plan.len(),
            items_completed: self.checkpoint.items_completed,
            current_file: current_file.to_string(),
            bytes_transferred: self.live_bytes,
            total_bytes,
            speed_bps: self.speed.bytes_per_second() as u64,
            eta_secs: self.speed.eta(remaining).map(|d| d.as_secs()),
        };
        let _ = tx.try_send(DeployEvent::TransferProgress(progress));
    }

    async fn emit(&self, event: DeployEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

async fn sync_writer(
    mut writer: Box<dyn DestWriter>,
    path: &str,
) -> Result<Box<dyn DestWriter>, TransferError> {
    let path = path.to_string();
    blocking(move || {
        writer.sync().map_err(|e| write_error(&path, e))?;
        Ok(writer)
    })
    .await
}

/// Runs blocking filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, TransferError>
where
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Io(io::Error::other(e)))?
}

fn source_error(path: &Path, source: io::Error) -> TransferError {
    TransferError::SourceUnreadable {
        path: path.display().to_string(),
        source,
    }
}

fn write_error(path: &str, source: io::Error) -> TransferError {
    TransferError::Write {
        path: path.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Converter;
    use crate::destination::LocalDestination;
    use romrunner_protocol::{DeploymentItemKind, ErrorCode, MemoryCheckpointStore};
    use std::fs;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    fn rom(source: PathBuf, dest: &str, size: u64) -> DeploymentItem {
        DeploymentItem {
            kind: DeploymentItemKind::Rom,
            source_path: source,
            dest_path: dest.into(),
            byte_size: size,
            source_size: size,
            requires_conversion: false,
            target_format: None,
            content_id: None,
            platform_id: None,
        }
    }

    fn fast_options() -> TransferOptions {
        TransferOptions {
            chunk_size: 4,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_factor: 2.0,
            },
            progress_interval: Duration::ZERO,
            ..TransferOptions::default()
        }
    }

    struct Setup {
        _lib: tempfile::TempDir,
        card: tempfile::TempDir,
        plan: Arc<DeploymentPlan>,
        sources: Vec<Vec<u8>>,
    }

    /// Three ROMs: 10, 32 and 7 bytes.
    fn setup() -> Setup {
        let lib = tempfile::tempdir().unwrap();
        let card = tempfile::tempdir().unwrap();
        let sources: Vec<Vec<u8>> = vec![
            b"tetris rom".to_vec(),
            (0u8..32).collect(),
            b"bios!!!".to_vec(),
        ];
        let items = vec![
            rom(write_source(lib.path(), "a.gb", &sources[0]), "Roms/gb/a.gb", 10),
            rom(write_source(lib.path(), "b.gba", &sources[1]), "Roms/gba/b.gba", 32),
            rom(write_source(lib.path(), "c.bin", &sources[2]), "BIOS/c.bin", 7),
        ];
        let plan = Arc::new(DeploymentPlan::new("plan-1", card.path(), items));
        Setup {
            _lib: lib,
            card,
            plan,
            sources,
        }
    }

    fn local(card: &Path) -> Arc<dyn DestinationIo> {
        Arc::new(LocalDestination::new(card))
    }

    async fn drain(mut rx: mpsc::Receiver<DeployEvent>) -> Vec<DeployEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    fn part_files(root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                    found.push(path);
                }
            }
        }
        found
    }

    #[derive(Clone, Copy)]
    enum Fault {
        None,
        Corrupt,
        /// The first `n` writes time out.
        TimeoutWrites(usize),
        /// Cancels the run after `n` writes.
        CancelAfter(usize),
    }

    /// Local destination with injectable write faults.
    struct FaultyDestination {
        inner: LocalDestination,
        fault: Fault,
        writes: Arc<AtomicUsize>,
        cancel: CancellationToken,
    }

    struct FaultyWriter {
        inner: Box<dyn DestWriter>,
        fault: Fault,
        writes: Arc<AtomicUsize>,
        cancel: CancellationToken,
    }

    impl Write for FaultyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fault {
                Fault::Corrupt => {
                    let flipped: Vec<u8> = buf.iter().map(|b| b ^ 0xff).collect();
                    self.inner.write_all(&flipped)?;
                    Ok(buf.len())
                }
                Fault::TimeoutWrites(limit) if n <= limit => {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "device busy"))
                }
                Fault::CancelAfter(limit) => {
                    let written = self.inner.write(buf);
                    if n >= limit {
                        self.cancel.cancel();
                    }
                    written
                }
                _ => self.inner.write(buf),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl DestWriter for FaultyWriter {
        fn sync(&mut self) -> io::Result<()> {
            self.inner.sync()
        }
    }

    impl DestinationIo for FaultyDestination {
        fn root(&self) -> &Path {
            self.inner.root()
        }
        fn is_available(&self) -> bool {
            self.inner.is_available()
        }
        fn file_len(&self, rel: &str) -> io::Result<Option<u64>> {
            self.inner.file_len(rel)
        }
        fn create_dir_all(&self, rel: &str) -> io::Result<()> {
            self.inner.create_dir_all(rel)
        }
        fn open_writer(&self, rel: &str, start_at: u64) -> io::Result<Box<dyn DestWriter>> {
            Ok(Box::new(FaultyWriter {
                inner: self.inner.open_writer(rel, start_at)?,
                fault: self.fault,
                writes: Arc::clone(&self.writes),
                cancel: self.cancel.clone(),
            }))
        }
        fn open_reader(&self, rel: &str) -> io::Result<Box<dyn Read + Send>> {
            self.inner.open_reader(rel)
        }
        fn write_at(&self, rel: &str, offset: u64, data: &[u8]) -> io::Result<()> {
            self.inner.write_at(rel, offset, data)
        }
        fn read_at(&self, rel: &str, offset: u64, len: usize) -> io::Result<Vec<u8>> {
            self.inner.read_at(rel, offset, len)
        }
        fn rename(&self, from: &str, to: &str) -> io::Result<()> {
            self.inner.rename(from, to)
        }
        fn remove_file(&self, rel: &str) -> io::Result<()> {
            self.inner.remove_file(rel)
        }
        fn available_space(&self) -> io::Result<u64> {
            self.inner.available_space()
        }
        fn total_space(&self) -> io::Result<u64> {
            self.inner.total_space()
        }
    }

    fn faulty(
        card: &Path,
        fault: Fault,
        cancel: CancellationToken,
    ) -> (Arc<dyn DestinationIo>, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let dest = FaultyDestination {
            inner: LocalDestination::new(card),
            fault,
            writes: Arc::clone(&writes),
            cancel,
        };
        (Arc::new(dest), writes)
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn copies_every_item_in_order() {
        let s = setup();
        let store = Arc::new(MemoryCheckpointStore::new());
        let (tx, rx) = mpsc::channel(1024);
        let (exec, handle) =
            TransferExecutor::new(Arc::clone(&s.plan), local(s.card.path()), store.clone(), fast_options());
        let report = exec.with_events(tx).run().await.unwrap();

        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(handle.state(), TransferState::Completed);
        assert_eq!(report.items_completed, 3);
        assert!(report.skipped_items.is_empty());
        assert_eq!(report.bytes_transferred, 49);
        assert_eq!(fs::read(s.card.path().join("Roms/gb/a.gb")).unwrap(), s.sources[0]);
        assert_eq!(fs::read(s.card.path().join("Roms/gba/b.gba")).unwrap(), s.sources[1]);
        assert_eq!(fs::read(s.card.path().join("BIOS/c.bin")).unwrap(), s.sources[2]);
        assert!(part_files(s.card.path()).is_empty());
        assert!(store.load("plan-1").unwrap().is_none());

        let events = drain(rx).await;
        let states: Vec<TransferState> = events
            .iter()
            .filter_map(|e| match e {
                DeployEvent::TransferState { state, .. } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![TransferState::Running, TransferState::Completed]);
        assert!(matches!(
            events.last(),
            Some(DeployEvent::TransferComplete { items_completed: 3, error: None, .. })
        ));
        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                DeployEvent::TransferProgress(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.bytes_transferred, 49);
        assert_eq!(last_progress.items_completed, 3);
    }

    #[tokio::test]
    async fn unreadable_source_is_skipped() {
        let s = setup();
        fs::remove_file(&s.plan.items()[1].source_path).unwrap();
        let (tx, rx) = mpsc::channel(1024);
        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        let report = exec.with_events(tx).run().await.unwrap();

        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(report.items_completed, 3);
        assert_eq!(report.skipped_items, vec![1]);
        assert_eq!(report.bytes_transferred, 17);
        assert!(!s.card.path().join("Roms/gba/b.gba").exists());
        assert!(s.card.path().join("BIOS/c.bin").exists());

        let events = drain(rx).await;
        let item_error = events
            .iter()
            .find_map(|e| match e {
                DeployEvent::TransferItemError {
                    item_index,
                    issue,
                    skipped,
                    ..
                } => Some((*item_index, issue.code, *skipped)),
                _ => None,
            })
            .unwrap();
        assert_eq!(item_error, (1, ErrorCode::TransferSourceUnreadable, true));
    }

    #[tokio::test]
    async fn cancel_before_start() {
        let s = setup();
        let (exec, handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        handle.cancel();
        let report = exec.run().await.unwrap();
        assert_eq!(report.state, TransferState::Cancelled);
        assert_eq!(report.error.unwrap().code, ErrorCode::Cancelled);
        assert_eq!(report.items_completed, 0);
        assert!(!s.card.path().join("Roms").exists());
    }

    #[tokio::test]
    async fn cancel_mid_item_then_resume_from_offset() {
        let s = setup();
        let store = Arc::new(MemoryCheckpointStore::new());

        // Item 0 is 10 bytes (3 writes); cancel two writes into item 1.
        let (exec, handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            store.clone(),
            fast_options(),
        );
        let (dest, _) = faulty(s.card.path(), Fault::CancelAfter(5), handle.cancel_token());
        let exec = TransferExecutor { dest, ..exec };
        let report = exec.run().await.unwrap();

        assert_eq!(report.state, TransferState::Cancelled);
        assert_eq!(report.items_completed, 1);
        assert!(s.card.path().join("Roms/gb/a.gb").exists());
        assert!(!s.card.path().join("Roms/gba/b.gba").exists());
        assert_eq!(part_files(s.card.path()).len(), 1);

        let cp = store.load("plan-1").unwrap().unwrap();
        assert_eq!(cp.items_completed, 1);
        assert_eq!(cp.current_item, Some(1));
        assert_eq!(cp.current_item_byte_offset, 8);
        assert_eq!(cp.bytes_transferred, 18);

        // Resume: 24 bytes of item 1 (6 writes) plus item 2 (2 writes).
        let (dest, writes) = faulty(s.card.path(), Fault::None, CancellationToken::new());
        let (exec, _handle) =
            TransferExecutor::new(Arc::clone(&s.plan), dest, store.clone(), fast_options());
        let report = exec.run().await.unwrap();

        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(writes.load(Ordering::SeqCst), 8);
        assert_eq!(report.bytes_transferred, 49);
        assert_eq!(fs::read(s.card.path().join("Roms/gba/b.gba")).unwrap(), s.sources[1]);
        assert!(part_files(s.card.path()).is_empty());
    }

    #[tokio::test]
    async fn resume_skips_exactly_completed_items() {
        let s = setup();
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut cp = TransferCheckpoint::start("plan-1");
        cp.items_completed = 2;
        cp.bytes_transferred = 42;
        store.save(&cp).unwrap();
        // Would fail if it were attempted again.
        fs::remove_file(&s.plan.items()[0].source_path).unwrap();

        let (tx, rx) = mpsc::channel(1024);
        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            store.clone(),
            fast_options(),
        );
        let report = exec.with_events(tx).run().await.unwrap();

        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(report.items_completed, 3);
        assert_eq!(report.bytes_transferred, 49);
        assert!(report.skipped_items.is_empty());
        assert!(!s.card.path().join("Roms/gb/a.gb").exists());
        assert!(s.card.path().join("BIOS/c.bin").exists());
        let events = drain(rx).await;
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, DeployEvent::TransferItemError { .. }))
        );
    }

    #[tokio::test]
    async fn foreign_checkpoint_is_rejected() {
        let s = setup();
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut cp = TransferCheckpoint::start("plan-1");
        cp.items_completed = 9;
        store.save(&cp).unwrap();

        let (exec, handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            store,
            fast_options(),
        );
        let err = exec.run().await.unwrap_err();
        assert!(matches!(err, TransferError::CheckpointInvalid(_)));
        assert_eq!(err.to_issue().code, ErrorCode::TransferCheckpointInvalid);
        assert_eq!(handle.state(), TransferState::Pending);
    }

    #[tokio::test]
    async fn pause_then_resume() {
        let s = setup();
        let (exec, handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        handle.pause();
        let task = tokio::spawn(exec.run());

        let mut states = handle.subscribe();
        states
            .wait_for(|s| *s == TransferState::Paused)
            .await
            .unwrap();
        assert!(!s.card.path().join("Roms/gb/a.gb").exists());

        handle.resume();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(report.items_completed, 3);
    }

    #[tokio::test]
    async fn cancel_while_paused() {
        let s = setup();
        let store = Arc::new(MemoryCheckpointStore::new());
        let (exec, handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            store.clone(),
            fast_options(),
        );
        handle.pause();
        let task = tokio::spawn(exec.run());
        handle
            .subscribe()
            .wait_for(|s| *s == TransferState::Paused)
            .await
            .unwrap();
        handle.cancel();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.state, TransferState::Cancelled);
        assert!(store.load("plan-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_destination_fails_and_keeps_checkpoint() {
        let s = setup();
        let gone = s.card.path().join("unplugged");
        let store = Arc::new(MemoryCheckpointStore::new());
        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(&gone),
            store.clone(),
            fast_options(),
        );
        let report = exec.run().await.unwrap();
        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(
            report.error.unwrap().code,
            ErrorCode::TransferDestinationLost
        );
        assert!(!gone.exists());
        assert_eq!(store.load("plan-1").unwrap().unwrap().items_completed, 0);
    }

    #[tokio::test]
    async fn corrupted_writes_skip_item_after_retries() {
        let s = setup();
        let plan = Arc::new(DeploymentPlan::new(
            "plan-1",
            s.card.path(),
            vec![s.plan.items()[0].clone()],
        ));
        let (dest, writes) = faulty(s.card.path(), Fault::Corrupt, CancellationToken::new());
        let (exec, _handle) = TransferExecutor::new(
            plan,
            dest,
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        let (tx, rx) = mpsc::channel(1024);
        let report = exec.with_events(tx).run().await.unwrap();

        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(report.skipped_items, vec![0]);
        // Three attempts of three chunks each.
        assert_eq!(writes.load(Ordering::SeqCst), 9);
        assert!(!s.card.path().join("Roms/gb/a.gb").exists());
        assert!(part_files(s.card.path()).is_empty());
        let events = drain(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            DeployEvent::TransferItemError { issue, skipped: true, .. }
                if issue.code == ErrorCode::TransferChecksumMismatch
        )));
    }

    #[tokio::test]
    async fn transient_write_error_is_retried() {
        let s = setup();
        let (dest, _) = faulty(s.card.path(), Fault::TimeoutWrites(1), CancellationToken::new());
        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            dest,
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        let report = exec.run().await.unwrap();
        assert_eq!(report.state, TransferState::Completed);
        assert!(report.skipped_items.is_empty());
        assert_eq!(fs::read(s.card.path().join("Roms/gb/a.gb")).unwrap(), s.sources[0]);
    }

    #[tokio::test]
    async fn exhausted_transient_errors_fail_the_run() {
        let s = setup();
        let store = Arc::new(MemoryCheckpointStore::new());
        let (dest, writes) = faulty(
            s.card.path(),
            Fault::TimeoutWrites(usize::MAX),
            CancellationToken::new(),
        );
        let (exec, _handle) =
            TransferExecutor::new(Arc::clone(&s.plan), dest, store.clone(), fast_options());
        let report = exec.run().await.unwrap();
        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(report.error.unwrap().code, ErrorCode::TransferWriteFailed);
        assert_eq!(writes.load(Ordering::SeqCst), 3);
        assert!(store.load("plan-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn existing_file_is_kept_unless_overwriting() {
        let s = setup();
        let target = s.card.path().join("Roms/gb/a.gb");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"0123456789").unwrap();

        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        exec.run().await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"0123456789");

        let options = TransferOptions {
            overwrite_existing: true,
            ..fast_options()
        };
        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            options,
        );
        exec.run().await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), s.sources[0]);
    }

    struct Upper;

    impl Converter for Upper {
        fn target_format(&self) -> &str {
            "up"
        }

        fn convert(&self, source: &Path, output: &Path) -> io::Result<()> {
            let data = fs::read(source)?;
            fs::write(output, data.to_ascii_uppercase())
        }
    }

    fn conversion_plan(s: &Setup) -> Arc<DeploymentPlan> {
        let mut item = s.plan.items()[0].clone();
        item.dest_path = "Roms/gb/a.up".into();
        item.requires_conversion = true;
        item.target_format = Some("up".into());
        Arc::new(DeploymentPlan::new("plan-1", s.card.path(), vec![item]))
    }

    #[tokio::test]
    async fn converts_through_registered_converter() {
        let s = setup();
        let staging = tempfile::tempdir().unwrap();
        let mut converters = ConverterRegistry::new();
        converters.register(Arc::new(Upper));
        let options = TransferOptions {
            staging_dir: Some(staging.path().to_path_buf()),
            ..fast_options()
        };
        let (exec, _handle) = TransferExecutor::new(
            conversion_plan(&s),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            options,
        );
        let report = exec.with_converters(converters).run().await.unwrap();
        assert_eq!(report.state, TransferState::Completed);
        assert!(report.warnings.is_empty());
        assert_eq!(fs::read(s.card.path().join("Roms/gb/a.up")).unwrap(), b"TETRIS ROM");
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_converter_copies_as_is() {
        let s = setup();
        let (exec, _handle) = TransferExecutor::new(
            conversion_plan(&s),
            local(s.card.path()),
            Arc::new(MemoryCheckpointStore::new()),
            fast_options(),
        );
        let report = exec.run().await.unwrap();
        assert_eq!(report.state, TransferState::Completed);
        assert_eq!(report.warnings.len(), 1);
        assert!(!s.card.path().join("Roms/gb/a.up").exists());
        assert_eq!(fs::read(s.card.path().join("Roms/gb/a.gb")).unwrap(), s.sources[0]);
    }

    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryCheckpointStore,
        saves: std::sync::Mutex<Vec<TransferCheckpoint>>,
    }

    impl CheckpointStore for RecordingStore {
        fn load(&self, plan_id: &str) -> Result<Option<TransferCheckpoint>, CheckpointError> {
            self.inner.load(plan_id)
        }

        fn save(&self, checkpoint: &TransferCheckpoint) -> Result<(), CheckpointError> {
            self.saves.lock().unwrap().push(checkpoint.clone());
            self.inner.save(checkpoint)
        }

        fn clear(&self, plan_id: &str) -> Result<(), CheckpointError> {
            self.inner.clear(plan_id)
        }
    }

    #[tokio::test]
    async fn checkpoints_after_items_and_every_granule() {
        let s = setup();
        let store = Arc::new(RecordingStore::default());
        let options = TransferOptions {
            checkpoint_granularity: 8,
            ..fast_options()
        };
        let (exec, _handle) = TransferExecutor::new(
            Arc::clone(&s.plan),
            local(s.card.path()),
            store.clone(),
            options,
        );
        let report = exec.run().await.unwrap();
        assert_eq!(report.state, TransferState::Completed);

        let saves = store.saves.lock().unwrap();
        let intra: Vec<(usize, u64)> = saves
            .iter()
            .filter_map(|cp| cp.current_item.map(|i| (i, cp.current_item_byte_offset)))
            .collect();
        assert_eq!(intra, vec![(0, 8), (1, 8), (1, 16), (1, 24), (1, 32)]);
        let finished: Vec<usize> = saves
            .iter()
            .filter(|cp| cp.current_item.is_none())
            .map(|cp| cp.items_completed)
            .collect();
        assert_eq!(finished, vec![1, 2, 3]);
        assert!(store.inner.load("plan-1").unwrap().is_none());
    }
}
