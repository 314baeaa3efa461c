//! Churn engine: sizes the slot pool from free space, then toggles one random
//! slot per tick between "file present" and "file absent".
//!
//! The engine thread is the only writer. Pool and counters sit together under
//! one `RwLock` so readers (telemetry, console) always observe a slot and the
//! counters that describe it in the same state. File I/O happens outside the
//! lock; only the bookkeeping is done while holding it.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::churn::slot_pool::{OccupancyBitmap, Slot, SlotPool};
use crate::core::config::ChurnConfig;
use crate::core::errors::{ChurnError, Result};
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::capacity::{CapacityMonitor, CapacitySnapshot, DiskInfo};

/// Byte every backing file is padded with.
pub const PAD_BYTE: u8 = b' ';
const WRITE_CHUNK: usize = 64 * 1024;
const LOCK_FILE: &str = ".lock";
/// Longest uninterrupted sleep between shutdown checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Backing file name for a slot index.
pub fn slot_file_name(index: usize) -> String {
    format!("DCH_CHURN_FILE_{index:08}.dat")
}

// ──────────────────── settings ────────────────────

/// Tunables applied before the pool is sized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChurnSettings {
    pub directory: PathBuf,
    pub max_file_size: u64,
    pub slot_count_override: Option<usize>,
    pub sleep_interval_micros: u64,
    pub min_sleep_interval_micros: u64,
    pub seed: Option<u64>,
}

impl From<&ChurnConfig> for ChurnSettings {
    fn from(cfg: &ChurnConfig) -> Self {
        Self {
            directory: cfg.directory.clone(),
            max_file_size: cfg.max_file_size,
            slot_count_override: cfg.slot_count.filter(|&n| n > 0),
            sleep_interval_micros: cfg.sleep_interval_micros,
            min_sleep_interval_micros: cfg.min_sleep_interval_micros,
            seed: cfg.seed,
        }
    }
}

impl Default for ChurnSettings {
    fn default() -> Self {
        Self::from(&ChurnConfig::default())
    }
}

// ──────────────────── shared state ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Sizing,
    Running,
}

/// Everything a reader may need to see consistently, under one lock.
#[derive(Debug, Default)]
struct ChurnState {
    pool: SlotPool,
    created: u64,
    removed: u64,
    failed_creates: u64,
    failed_removes: u64,
    start_time: i64,
    max_file_size: u64,
    sleep_interval_micros: u64,
}

/// Point-in-time copy of the engine's counters and pool aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressStats {
    pub capacity: usize,
    pub occupied: usize,
    pub occupied_bytes: u64,
    pub created: u64,
    pub removed: u64,
    pub failed_creates: u64,
    pub failed_removes: u64,
    pub max_file_size: u64,
    pub sleep_interval_micros: u64,
    /// Unix seconds; 0 until the pool is sized.
    pub start_time: i64,
}

/// Result of one churn step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Created(usize),
    Removed(usize),
    /// Write failed; the slot stays empty and the partial file is removed.
    CreateFailed(usize),
    /// Delete failed; the slot is cleared anyway.
    RemoveFailed(usize),
}

impl TickOutcome {
    pub const fn index(self) -> usize {
        match self {
            Self::Created(i) | Self::Removed(i) | Self::CreateFailed(i) | Self::RemoveFailed(i) => {
                i
            }
        }
    }
}

// ──────────────────── read handle ────────────────────

/// Cloneable read-only view for telemetry and console threads.
#[derive(Clone)]
pub struct StressView {
    shared: Arc<RwLock<ChurnState>>,
    monitor: Arc<CapacityMonitor>,
    directory: PathBuf,
}

impl StressView {
    pub fn stats(&self) -> StressStats {
        let state = self.shared.read();
        StressStats {
            capacity: state.pool.capacity(),
            occupied: state.pool.occupied_count(),
            occupied_bytes: state.pool.total_occupied_bytes(),
            created: state.created,
            removed: state.removed,
            failed_creates: state.failed_creates,
            failed_removes: state.failed_removes,
            max_file_size: state.max_file_size,
            sleep_interval_micros: state.sleep_interval_micros,
            start_time: state.start_time,
        }
    }

    pub fn occupancy_bitmap(&self) -> OccupancyBitmap {
        self.shared.read().pool.occupancy_bitmap()
    }

    /// Copies of every occupied slot, in index order.
    pub fn occupied_slots(&self) -> Vec<Slot> {
        self.shared.read().pool.iter_occupied().copied().collect()
    }

    /// Run `f` against the pool while holding the read lock.
    pub fn with_pool<R>(&self, f: impl FnOnce(&SlotPool) -> R) -> R {
        f(&self.shared.read().pool)
    }

    pub fn capacity(&self) -> Arc<CapacitySnapshot> {
        self.monitor.snapshot()
    }

    pub fn disk_info(&self) -> DiskInfo {
        self.monitor.to_telemetry()
    }

    pub fn start_time(&self) -> i64 {
        self.shared.read().start_time
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_path(&self, index: usize) -> PathBuf {
        self.directory.join(slot_file_name(index))
    }
}

// ──────────────────── engine ────────────────────

pub struct ChurnEngine {
    settings: ChurnSettings,
    state: EngineState,
    shared: Arc<RwLock<ChurnState>>,
    monitor: Arc<CapacityMonitor>,
    logger: ActivityLoggerHandle,
    rng: StdRng,
    #[cfg(unix)]
    _dir_lock: Option<nix::fcntl::Flock<File>>,
}

impl ChurnEngine {
    pub fn new(
        settings: ChurnSettings,
        monitor: Arc<CapacityMonitor>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        let rng = settings
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let shared = ChurnState {
            max_file_size: settings.max_file_size,
            sleep_interval_micros: settings.sleep_interval_micros,
            ..ChurnState::default()
        };
        Self {
            settings,
            state: EngineState::Uninitialized,
            shared: Arc::new(RwLock::new(shared)),
            monitor,
            logger,
            rng,
            #[cfg(unix)]
            _dir_lock: None,
        }
    }

    pub const fn state(&self) -> EngineState {
        self.state
    }

    pub fn settings(&self) -> &ChurnSettings {
        &self.settings
    }

    pub fn view(&self) -> StressView {
        StressView {
            shared: Arc::clone(&self.shared),
            monitor: Arc::clone(&self.monitor),
            directory: self.settings.directory.clone(),
        }
    }

    // ──────────────────── knobs ────────────────────

    /// Returns `false` (and changes nothing) once sizing has begun or for a zero size.
    pub fn set_max_file_size(&mut self, bytes: u64) -> bool {
        if self.state != EngineState::Uninitialized || bytes == 0 {
            return false;
        }
        self.settings.max_file_size = bytes;
        self.shared.write().max_file_size = bytes;
        true
    }

    /// Returns `false` once sizing has begun or for a zero count.
    pub fn set_slot_count_override(&mut self, slots: usize) -> bool {
        if self.state != EngineState::Uninitialized || slots == 0 {
            return false;
        }
        self.settings.slot_count_override = Some(slots);
        true
    }

    /// Returns `false` once sizing has begun or when below the configured minimum.
    pub fn set_sleep_interval_micros(&mut self, micros: u64) -> bool {
        if self.state != EngineState::Uninitialized
            || micros < self.settings.min_sleep_interval_micros
        {
            return false;
        }
        self.settings.sleep_interval_micros = micros;
        self.shared.write().sleep_interval_micros = micros;
        true
    }

    // ──────────────────── sizing ────────────────────

    /// Prepare the directory and size the pool. Every failure here is fatal.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(ChurnError::Runtime {
                details: "churn engine already started".to_string(),
            });
        }
        if self.settings.max_file_size == 0 {
            return Err(ChurnError::InvalidConfig {
                details: "max_file_size must be greater than zero".to_string(),
            });
        }
        self.state = EngineState::Sizing;

        let dir = self.settings.directory.clone();
        fs::create_dir_all(&dir).map_err(|e| ChurnError::io(&dir, e))?;
        self.lock_directory()?;

        let removed = clean_directory(&dir)?;
        self.logger.send(ActivityEvent::DirectoryCleaned {
            path: dir.display().to_string(),
            removed,
        });

        let snapshot = self.monitor.refresh()?;
        let capacity = self.settings.slot_count_override.map_or_else(
            || compute_capacity(snapshot.free_bytes, self.settings.max_file_size),
            |n| n,
        );
        let pool = SlotPool::create(capacity)?;

        {
            let mut state = self.shared.write();
            state.pool = pool;
            state.start_time = unix_now();
            state.max_file_size = self.settings.max_file_size;
            state.sleep_interval_micros = self.settings.sleep_interval_micros;
        }
        self.logger.send(ActivityEvent::PoolSized {
            slots: capacity,
            max_file_size: self.settings.max_file_size,
            free_bytes: snapshot.free_bytes,
        });
        eprintln!(
            "[DCH-CHURN] {} slots of {} bytes in {} ({removed} stale files removed)",
            capacity,
            self.settings.max_file_size,
            dir.display()
        );

        self.state = EngineState::Running;
        Ok(())
    }

    #[cfg(unix)]
    fn lock_directory(&mut self) -> Result<()> {
        use std::os::unix::fs::OpenOptionsExt as _;

        let lock_path = self.settings.directory.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&lock_path)
            .map_err(|e| ChurnError::io(&lock_path, e))?;

        #[allow(deprecated)]
        let lock = nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusiveNonblock)
            .map_err(|(_file, e)| ChurnError::Runtime {
                details: format!(
                    "churn directory {} is locked by another process: {e}",
                    self.settings.directory.display()
                ),
            })?;
        self._dir_lock = Some(lock);
        Ok(())
    }

    #[cfg(not(unix))]
    fn lock_directory(&mut self) -> Result<()> {
        Ok(())
    }

    // ──────────────────── running ────────────────────

    /// One churn step: pick a slot uniformly, toggle it, re-probe capacity.
    ///
    /// File I/O failures are logged and counted, never returned.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.state != EngineState::Running {
            return Err(ChurnError::Runtime {
                details: "tick called before the engine was started".to_string(),
            });
        }

        let (index, occupied) = {
            let state = self.shared.read();
            let index = self.rng.random_range(0..state.pool.capacity());
            let occupied = state.pool.get(index).is_some_and(Slot::is_occupied);
            (index, occupied)
        };
        let path = self.settings.directory.join(slot_file_name(index));

        let outcome = if occupied {
            self.empty_slot(index, &path)?
        } else {
            self.fill_slot(index, &path)?
        };

        if let Err(e) = self.monitor.refresh() {
            eprintln!("[DCH-CHURN] capacity refresh failed, keeping last snapshot: {e}");
            self.logger.send(ActivityEvent::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Tick until shutdown is requested, sleeping the configured interval between steps.
    pub fn run(&mut self, shutdown: &SignalHandler) -> Result<()> {
        let interval = Duration::from_micros(self.settings.sleep_interval_micros);
        while !shutdown.should_shutdown() {
            self.tick()?;
            if shutdown.sleep_interruptible(interval, SHUTDOWN_POLL) {
                break;
            }
        }
        Ok(())
    }

    fn fill_slot(&self, index: usize, path: &Path) -> Result<TickOutcome> {
        let size = self.settings.max_file_size;
        match write_padding_file(path, size) {
            Ok(()) => {
                let mut state = self.shared.write();
                state.pool.fill(index, size, unix_now())?;
                state.created += 1;
                Ok(TickOutcome::Created(index))
            }
            Err(e) => {
                let _ = fs::remove_file(path);
                self.shared.write().failed_creates += 1;
                self.report_failure(index, path, &e, true);
                Ok(TickOutcome::CreateFailed(index))
            }
        }
    }

    fn empty_slot(&self, index: usize, path: &Path) -> Result<TickOutcome> {
        let result = match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(ChurnError::io(path, e)),
            _ => Ok(()),
        };

        let mut state = self.shared.write();
        state.pool.clear(index)?;
        state.removed += 1;
        match result {
            Ok(()) => Ok(TickOutcome::Removed(index)),
            Err(e) => {
                state.failed_removes += 1;
                drop(state);
                self.report_failure(index, path, &e, false);
                Ok(TickOutcome::RemoveFailed(index))
            }
        }
    }

    fn report_failure(&self, slot: usize, path: &Path, err: &ChurnError, creating: bool) {
        let verb = if creating { "create" } else { "remove" };
        eprintln!("[DCH-CHURN] failed to {verb} slot {slot}: {err}");
        let path = path.display().to_string();
        let error_code = err.code().to_string();
        let error_message = err.to_string();
        self.logger.send(if creating {
            ActivityEvent::FileCreateFailed {
                slot,
                path,
                error_code,
                error_message,
            }
        } else {
            ActivityEvent::FileRemoveFailed {
                slot,
                path,
                error_code,
                error_message,
            }
        });
    }
}

// ──────────────────── helpers ────────────────────

/// `free / max_file_size + 1`, saturating for pools too large to address.
pub fn compute_capacity(free_bytes: u64, max_file_size: u64) -> usize {
    let slots = free_bytes / max_file_size.max(1);
    usize::try_from(slots)
        .unwrap_or(usize::MAX)
        .saturating_add(1)
}

/// Remove every regular file in `dir` except the lock file.
///
/// Failing to list the directory is fatal; a single undeletable file is only reported.
fn clean_directory(dir: &Path) -> Result<usize> {
    let entries = fs::read_dir(dir).map_err(|e| ChurnError::io(dir, e))?;
    let mut removed = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("[DCH-CHURN] skipping unreadable entry in {}: {e}", dir.display());
                continue;
            }
        };
        if entry.file_name() == LOCK_FILE {
            continue;
        }
        let is_file = entry.file_type().is_ok_and(|t| t.is_file());
        if !is_file {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!(
                "[DCH-CHURN] could not remove stale file {}: {e}",
                entry.path().display()
            ),
        }
    }
    Ok(removed)
}

fn write_padding_file(path: &Path, size: u64) -> Result<()> {
    let mut file = {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o600);
        }
        opts.open(path).map_err(|e| ChurnError::io(path, e))?
    };

    let chunk = vec![PAD_BYTE; WRITE_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = usize::try_from(remaining).map_or(WRITE_CHUNK, |r| r.min(WRITE_CHUNK));
        file.write_all(&chunk[..n])
            .map_err(|e| ChurnError::io(path, e))?;
        remaining -= n as u64;
    }
    file.flush().map_err(|e| ChurnError::io(path, e))
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ──────────────────── tests ────────────────────
