//! Capacity monitor: statvfs probe of the directory under stress, published as an
//! immutable snapshot that readers can hold without blocking refreshes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::errors::Result;
use crate::platform::pal::{FsStats, Platform};

/// One consistent reading of the volume under stress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub block_size: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
}

impl CapacitySnapshot {
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    #[must_use]
    pub fn used_blocks(&self) -> u64 {
        self.total_blocks.saturating_sub(self.free_blocks)
    }

    #[must_use]
    pub fn used_inodes(&self) -> u64 {
        self.total_inodes.saturating_sub(self.free_inodes)
    }

    /// Render as the `diskinfo` telemetry body.
    #[must_use]
    pub fn to_telemetry(&self) -> DiskInfo {
        DiskInfo {
            totalbytes: self.total_bytes,
            totalinodes: self.total_inodes,
            totalblocks: self.total_blocks,
            blocksize: self.block_size,
            freebytes: self.free_bytes,
            freeinodes: self.free_inodes,
            freeblocks: self.free_blocks,
            usedbytes: self.used_bytes(),
            usedinodes: self.used_inodes(),
            usedblocks: self.used_blocks(),
            totalbytesstring: group_thousands(self.total_bytes),
            freebytesstring: group_thousands(self.free_bytes),
            usedbytesstring: group_thousands(self.used_bytes()),
            totalblocksstring: group_thousands(self.total_blocks),
            freeblocksstring: group_thousands(self.free_blocks),
            usedblocksstring: group_thousands(self.used_blocks()),
            totalinodesstring: group_thousands(self.total_inodes),
            freeinodesstring: group_thousands(self.free_inodes),
            usedinodesstring: group_thousands(self.used_inodes()),
        }
    }
}

impl From<FsStats> for CapacitySnapshot {
    fn from(stats: FsStats) -> Self {
        Self {
            total_bytes: stats.total_bytes,
            free_bytes: stats.free_bytes,
            total_blocks: stats.total_blocks,
            free_blocks: stats.free_blocks,
            total_inodes: stats.total_inodes,
            free_inodes: stats.free_inodes,
            block_size: stats.block_size,
            fs_type: stats.fs_type,
            mount_point: stats.mount_point,
        }
    }
}

/// Wire form of a capacity snapshot. Field names are consumed verbatim by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub totalbytes: u64,
    pub totalinodes: u64,
    pub totalblocks: u64,
    pub blocksize: u64,
    pub freebytes: u64,
    pub freeinodes: u64,
    pub freeblocks: u64,
    pub usedbytes: u64,
    pub usedinodes: u64,
    pub usedblocks: u64,
    pub totalbytesstring: String,
    pub freebytesstring: String,
    pub usedbytesstring: String,
    pub totalblocksstring: String,
    pub freeblocksstring: String,
    pub usedblocksstring: String,
    pub totalinodesstring: String,
    pub freeinodesstring: String,
    pub usedinodesstring: String,
}

/// Samples filesystem statistics for one directory.
///
/// The current snapshot sits behind an `Arc` that `refresh` swaps wholesale,
/// so a reader either sees the old reading or the new one, never a mix.
pub struct CapacityMonitor {
    platform: Arc<dyn Platform>,
    path: PathBuf,
    current: RwLock<Arc<CapacitySnapshot>>,
}

impl CapacityMonitor {
    /// Probe `path` once. Fails if the volume cannot be queried at all.
    pub fn new(platform: Arc<dyn Platform>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let first = CapacitySnapshot::from(platform.fs_stats(&path)?);
        Ok(Self {
            platform,
            path,
            current: RwLock::new(Arc::new(first)),
        })
    }

    /// Re-probe and publish a new snapshot. On failure the previous snapshot stays current.
    pub fn refresh(&self) -> Result<Arc<CapacitySnapshot>> {
        let fresh = Arc::new(CapacitySnapshot::from(self.platform.fs_stats(&self.path)?));
        *self.current.write() = Arc::clone(&fresh);
        Ok(fresh)
    }

    /// Current snapshot; cheap to hold across a long render.
    pub fn snapshot(&self) -> Arc<CapacitySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn available_bytes(&self) -> u64 {
        self.current.read().free_bytes
    }

    pub fn to_telemetry(&self) -> DiskInfo {
        self.snapshot().to_telemetry()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decimal rendering with `,` every three digits: `1234567` → `"1,234,567"`.
#[must_use]
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{CapacityMonitor, group_thousands};
    use crate::core::errors::{ChurnError, Result};
    use crate::platform::pal::{FsStats, MockPlatform, MountPoint, Platform, mock_stats};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyPlatform {
        calls: AtomicUsize,
        fail_after: usize,
    }

    impl Platform for FlakyPlatform {
        fn fs_stats(&self, path: &Path) -> Result<FsStats> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err(ChurnError::CapacityProbe {
                    path: path.to_path_buf(),
                    details: "device went away".to_string(),
                });
            }
            Ok(mock_stats(1_000_000, 1_000_000 - n as u64 * 1000))
        }

        fn mount_points(&self) -> Result<Vec<MountPoint>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn comma_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(u64::MAX), "18,446,744,073,709,551,615");
    }

    #[test]
    fn telemetry_contains_used_values_and_strings() {
        let platform = Arc::new(MockPlatform::with_free_bytes(10_000_000, 2_500_000));
        let monitor = CapacityMonitor::new(platform, "/stress").expect("monitor");
        let info = monitor.to_telemetry();

        assert_eq!(info.totalbytes, 10_000_000);
        assert_eq!(info.freebytes, 2_500_000);
        assert_eq!(info.usedbytes, 7_500_000);
        assert_eq!(info.usedbytesstring, "7,500,000");
        assert_eq!(info.usedinodes, info.totalinodes - info.freeinodes);
        assert_eq!(info.usedblocks, info.totalblocks - info.freeblocks);
        assert_eq!(info.blocksize, 4096);

        let json = serde_json::to_value(&info).expect("serialize");
        for key in [
            "totalbytes",
            "freebytes",
            "totalinodesstring",
            "freeblocksstring",
            "usedblocksstring",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn refresh_replaces_snapshot_wholesale() {
        let platform = Arc::new(MockPlatform::with_free_bytes(10_000_000, 4_000_000));
        let monitor = CapacityMonitor::new(platform.clone(), "/stress").expect("monitor");
        let held = monitor.snapshot();

        platform.set_stats("/", mock_stats(10_000_000, 3_000_000));
        monitor.refresh().expect("refresh");

        assert_eq!(held.free_bytes, 4_000_000, "held snapshot is immutable");
        assert_eq!(monitor.available_bytes(), 3_000_000);
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let platform = Arc::new(FlakyPlatform {
            calls: AtomicUsize::new(0),
            fail_after: 1,
        });
        let monitor = CapacityMonitor::new(platform, "/stress").expect("first probe works");
        let err = monitor.refresh().expect_err("second probe fails");
        assert_eq!(err.code(), "DCH-2001");
        assert_eq!(monitor.available_bytes(), 1_000_000);
    }

    #[test]
    fn initial_probe_failure_is_an_error() {
        let platform = Arc::new(FlakyPlatform {
            calls: AtomicUsize::new(0),
            fail_after: 0,
        });
        assert!(CapacityMonitor::new(platform, "/stress").is_err());
    }
}
