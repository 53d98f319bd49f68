//! Media health probes: counterfeit capacity and write/read speed.
//!
//! Both probes are blocking and write small files at the destination root,
//! which they remove before returning.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use romrunner_protocol::{ErrorCode, Issue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::destination::DestinationIo;

pub const CAPACITY_PROBE_FILE: &str = ".romrunner-capacity";
pub const SPEED_PROBE_FILE: &str = ".romrunner-speedtest";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CapacityProbeOptions {
    pub pattern_len: usize,
    /// Free space left untouched at the end of the volume.
    pub end_margin: u64,
    /// Upper bound on the far probe offset.
    pub max_offset: Option<u64>,
}

impl Default for CapacityProbeOptions {
    fn default() -> Self {
        Self {
            pattern_len: 4096,
            end_margin: 16 * MIB,
            max_offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CapacityVerdict {
    Genuine { probed_offset: u64 },
    /// Data written near the reported end did not survive.
    Counterfeit { probed_offset: u64 },
    Inconclusive { reason: String },
}

impl CapacityVerdict {
    pub fn is_counterfeit(&self) -> bool {
        matches!(self, CapacityVerdict::Counterfeit { .. })
    }
}

/// Largest file FAT32 can hold. Cards ship formatted FAT32 up to 32 GB, so
/// a far probe past this offset is retried just below it.
pub const FAT32_MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Writes a recognisable pattern at the start of a probe file and another
/// near the reported end of free space, syncs, and reads both back.
///
/// Media that lies about its size wraps or drops the far write, so one of
/// the patterns comes back wrong. On filesystems without sparse files the
/// far write allocates everything in between.
///
/// I/O failures never fail the probe: they yield
/// [`CapacityVerdict::Inconclusive`].
pub fn probe_capacity(
    dest: &dyn DestinationIo,
    options: &CapacityProbeOptions,
) -> Result<CapacityVerdict, TransferError> {
    let len = options.pattern_len.max(16) as u64;
    let available = match dest.available_space() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "free space unknown, capacity probe skipped");
            return Ok(CapacityVerdict::Inconclusive {
                reason: format!("free space unknown: {e}"),
            });
        }
    };
    let Some(room) = available.checked_sub(options.end_margin + 2 * len) else {
        return Ok(CapacityVerdict::Inconclusive {
            reason: format!("only {available} bytes free"),
        });
    };
    let mut offset = room + len;
    if let Some(max) = options.max_offset {
        offset = offset.min(max);
    }
    offset = align_down(offset);
    if offset < len {
        return Ok(CapacityVerdict::Inconclusive {
            reason: "volume too small to probe".into(),
        });
    }

    let head = pattern(0x5eed_0001, len as usize);
    debug!(offset, available, "capacity probe");
    let mut result = write_and_compare(dest, &head, offset);
    let bounded = align_down(FAT32_MAX_FILE_SIZE.saturating_sub(len));
    if offset > bounded
        && bounded >= len
        && let Err(e) = result
    {
        debug!(error = %e, offset = bounded, "far write refused, retrying within FAT32 file limit");
        offset = bounded;
        result = write_and_compare(dest, &head, offset);
    }
    if let Err(e) = dest.remove_file(CAPACITY_PROBE_FILE) {
        warn!(error = %e, "could not remove capacity probe file");
    }

    match result {
        Ok(true) => Ok(CapacityVerdict::Genuine {
            probed_offset: offset,
        }),
        Ok(false) => {
            warn!(offset, "capacity probe read back wrong data");
            Ok(CapacityVerdict::Counterfeit {
                probed_offset: offset,
            })
        }
        Err(e) => {
            warn!(offset, error = %e, "capacity probe could not complete");
            Ok(CapacityVerdict::Inconclusive {
                reason: format!("probe at byte {offset} failed: {e}"),
            })
        }
    }
}

fn write_and_compare(dest: &dyn DestinationIo, head: &[u8], offset: u64) -> io::Result<bool> {
    let tail = pattern(offset ^ 0x5eed_0002, head.len());
    dest.write_at(CAPACITY_PROBE_FILE, 0, head)?;
    dest.write_at(CAPACITY_PROBE_FILE, offset, &tail)?;
    let head_back = dest.read_at(CAPACITY_PROBE_FILE, 0, head.len())?;
    let tail_back = dest.read_at(CAPACITY_PROBE_FILE, offset, tail.len())?;
    Ok(head_back == head && tail_back == tail)
}

fn align_down(offset: u64) -> u64 {
    offset - offset % 4096
}

/// Deterministic non-zero bytes.
fn pattern(seed: u64, len: usize) -> Vec<u8> {
    let mut x = seed | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x as u8).max(1)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    VerySlow,
    Slow,
    Adequate,
    Fast,
}

#[derive(Debug, Clone)]
pub struct SpeedProbeOptions {
    pub size: u64,
    pub chunk_size: usize,
    /// Writes below this are `slow`; below a quarter of it, `very_slow`.
    pub slow_bps: u64,
    pub fast_bps: u64,
}

impl Default for SpeedProbeOptions {
    fn default() -> Self {
        Self {
            size: 8 * MIB,
            chunk_size: MIB as usize,
            slow_bps: 10 * MIB,
            fast_bps: 30 * MIB,
        }
    }
}

impl SpeedProbeOptions {
    pub fn classify(&self, write_bps: u64) -> SpeedClass {
        if write_bps >= self.fast_bps {
            SpeedClass::Fast
        } else if write_bps >= self.slow_bps {
            SpeedClass::Adequate
        } else if write_bps >= self.slow_bps / 4 {
            SpeedClass::Slow
        } else {
            SpeedClass::VerySlow
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedReport {
    pub write_bps: u64,
    pub read_bps: u64,
    pub class: SpeedClass,
}

/// Writes, syncs and reads back a dedicated temp file.
pub fn probe_speed(
    dest: &dyn DestinationIo,
    options: &SpeedProbeOptions,
) -> Result<SpeedReport, TransferError> {
    let chunk = pattern(0xfeed, options.chunk_size.max(1));
    let result = (|| -> Result<(Duration, Duration), TransferError> {
        let started = Instant::now();
        let mut writer = dest.open_writer(SPEED_PROBE_FILE, 0)?;
        let mut left = options.size;
        while left > 0 {
            let n = left.min(chunk.len() as u64) as usize;
            writer.write_all(&chunk[..n])?;
            left -= n as u64;
        }
        writer.sync()?;
        drop(writer);
        let write_time = started.elapsed();

        let started = Instant::now();
        let mut reader = dest.open_reader(SPEED_PROBE_FILE)?;
        let mut buf = vec![0u8; chunk.len()];
        while reader.read(&mut buf)? > 0 {}
        Ok((write_time, started.elapsed()))
    })();
    if let Err(e) = dest.remove_file(SPEED_PROBE_FILE) {
        warn!(error = %e, "could not remove speed probe file");
    }
    let (write_time, read_time) = result?;

    let write_bps = rate(options.size, write_time);
    let read_bps = rate(options.size, read_time);
    let class = options.classify(write_bps);
    info!(write_bps, read_bps, class = ?class, "speed probe");
    Ok(SpeedReport {
        write_bps,
        read_bps,
        class,
    })
}

fn rate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64().max(1e-6);
    (bytes as f64 / secs) as u64
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsOptions {
    pub capacity: CapacityProbeOptions,
    /// Skip the speed probe when `None`.
    pub speed: Option<SpeedProbeOptions>,
    /// Counterfeit media blocks deployment instead of warning.
    pub block_on_counterfeit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReport {
    pub capacity: CapacityVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedReport>,
    pub block_on_counterfeit: bool,
}

impl MediaReport {
    pub fn blocks_deploy(&self) -> bool {
        self.block_on_counterfeit && self.capacity.is_counterfeit()
    }

    pub fn issues(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        if let CapacityVerdict::Counterfeit { probed_offset } = &self.capacity {
            issues.push(Issue::new(
                ErrorCode::FakeMediaDetected,
                format!("data written at byte {probed_offset} did not read back"),
                !self.block_on_counterfeit,
            ));
        }
        if let Some(speed) = &self.speed
            && speed.class <= SpeedClass::Slow
        {
            issues.push(Issue::warning(
                ErrorCode::SlowMedia,
                format!("media writes at {} KiB/s", speed.write_bps / 1024),
            ));
        }
        issues
    }
}

/// Runs the capacity probe and, when configured, the speed probe. A probe
/// that cannot finish leaves its part of the report empty or inconclusive.
pub fn diagnose(
    dest: &dyn DestinationIo,
    options: &DiagnosticsOptions,
) -> Result<MediaReport, TransferError> {
    let capacity = probe_capacity(dest, &options.capacity)?;
    let speed = match &options.speed {
        Some(opts) => match probe_speed(dest, opts) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "speed probe failed, skipping it");
                None
            }
        },
        None => None,
    };
    Ok(MediaReport {
        capacity,
        speed,
        block_on_counterfeit: options.block_on_counterfeit,
    })
}
