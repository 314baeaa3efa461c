//! Activity logger thread: owns the `JsonlWriter`; every other thread sends
//! `ActivityEvent`s through a bounded crossbeam channel. `send` uses
//! `try_send`, so the churn loop and connection handlers never block on
//! logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{ChurnError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ServerStarted {
        version: String,
        config_hash: String,
        directory: String,
    },
    ServerStopped {
        reason: String,
        uptime_secs: u64,
        created: u64,
        removed: u64,
    },
    DirectoryCleaned {
        path: String,
        removed: usize,
    },
    PoolSized {
        slots: usize,
        max_file_size: u64,
        free_bytes: u64,
    },
    FileCreateFailed {
        slot: usize,
        path: String,
        error_code: String,
        error_message: String,
    },
    FileRemoveFailed {
        slot: usize,
        path: String,
        error_code: String,
        error_message: String,
    },
    ObserverConnected {
        peer: String,
        observers: usize,
    },
    ObserverDisconnected {
        peer: String,
        observers: usize,
    },
    ProtocolError {
        peer: String,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable, non-blocking handle onto the logger thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle with no logger thread behind it; every event is discarded.
    pub fn detached() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event. If the channel is full the event is dropped and counted.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Join its handle afterwards.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the `dch-logger` thread writing to `config.path`.
pub fn spawn_logger(config: JsonlConfig) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    spawn_logger_with_capacity(config, CHANNEL_CAPACITY)
}

pub fn spawn_logger_with_capacity(
    config: JsonlConfig,
    capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("dch-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| ChurnError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ServerStarted {
            version,
            config_hash,
            directory,
        } => {
            let mut e = LogEntry::new(EventType::ServerStart, Severity::Info);
            e.path = Some(directory.clone());
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::ServerStopped {
            reason,
            uptime_secs,
            created,
            removed,
        } => {
            let mut e = LogEntry::new(EventType::ServerStop, Severity::Info);
            e.details = Some(format!(
                "reason={reason} uptime={uptime_secs}s created={created} removed={removed}"
            ));
            e
        }
        ActivityEvent::DirectoryCleaned { path, removed } => {
            let mut e = LogEntry::new(EventType::DirectoryCleaned, Severity::Info);
            e.path = Some(path.clone());
            e.details = Some(format!("removed={removed}"));
            e
        }
        ActivityEvent::PoolSized {
            slots,
            max_file_size,
            free_bytes,
        } => {
            let mut e = LogEntry::new(EventType::PoolSized, Severity::Info);
            e.size = Some(*max_file_size);
            e.details = Some(format!("slots={slots} free_bytes={free_bytes}"));
            e
        }
        ActivityEvent::FileCreateFailed {
            slot,
            path,
            error_code,
            error_message,
        } => failure_entry(EventType::FileCreateFailed, *slot, path, error_code, error_message),
        ActivityEvent::FileRemoveFailed {
            slot,
            path,
            error_code,
            error_message,
        } => failure_entry(EventType::FileRemoveFailed, *slot, path, error_code, error_message),
        ActivityEvent::ObserverConnected { peer, observers } => {
            let mut e = LogEntry::new(EventType::ObserverConnected, Severity::Info);
            e.details = Some(format!("peer={peer} observers={observers}"));
            e
        }
        ActivityEvent::ObserverDisconnected { peer, observers } => {
            let mut e = LogEntry::new(EventType::ObserverDisconnected, Severity::Info);
            e.details = Some(format!("peer={peer} observers={observers}"));
            e
        }
        ActivityEvent::ProtocolError { peer, details } => {
            let mut e = LogEntry::new(EventType::ProtocolError, Severity::Warning);
            e.details = Some(format!("peer={peer} {details}"));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::ServerStop, Severity::Info),
    }
}

fn failure_entry(
    event: EventType,
    slot: usize,
    path: &str,
    error_code: &str,
    error_message: &str,
) -> LogEntry {
    let mut e = LogEntry::new(event, Severity::Warning);
    e.slot = Some(slot);
    e.path = Some(path.to_string());
    e.error_code = Some(error_code.to_string());
    e.error_message = Some(error_message.to_string());
    e
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> JsonlConfig {
        JsonlConfig {
            path: dir.join("activity.jsonl"),
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        handle.send(ActivityEvent::ServerStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc".to_string(),
            directory: "DiskStressFiles".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert!(contents.contains("server_start"));
        assert!(contents.contains("config_hash=abc"));
    }

    #[test]
    fn clones_share_one_writer() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        let h2 = handle.clone();

        handle.send(ActivityEvent::PoolSized {
            slots: 5,
            max_file_size: 500_000,
            free_bytes: 2_000_000,
        });
        h2.send(ActivityEvent::FileCreateFailed {
            slot: 3,
            path: "/stress/DCH_CHURN_FILE_00000003.dat".to_string(),
            error_code: "DCH-3002".to_string(),
            error_message: "no space left on device".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "pool_sized");
        assert_eq!(lines[1]["event"], "file_create_failed");
        assert_eq!(lines[1]["slot"], 3);
        assert_eq!(lines[1]["error_code"], "DCH-3002");
    }

    #[test]
    fn full_channel_counts_drops() {
        let (tx, _rx) = bounded(1);
        let handle = ActivityLoggerHandle {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        };
        for _ in 0..3 {
            handle.send(ActivityEvent::Error {
                code: "DCH-3900".to_string(),
                message: "x".to_string(),
            });
        }
        assert_eq!(handle.dropped_events(), 2);
    }

    #[test]
    fn detached_handle_discards_silently() {
        let handle = ActivityLoggerHandle::detached();
        handle.send(ActivityEvent::Shutdown);
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }
}
