//! PAL trait and platform-specific implementations.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{ChurnError, Result};

/// Raw filesystem statistics for the volume holding a path.
///
/// Byte counts are `blocks * block_size`; `free_*` uses the superuser-inclusive
/// free counts so "used" equals `total - free`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub block_size: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
}

/// Mount-point metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

/// OS abstraction used by the capacity monitor.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    fn mount_points(&self) -> Result<Vec<MountPoint>>;
}

/// Linux platform implementation using `/proc` + `statvfs`.
#[derive(Debug)]
pub struct LinuxPlatform {
    mounts_cache: RwLock<Option<(Vec<MountPoint>, Instant)>>,
    cache_ttl: Duration,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts_cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(5),
        }
    }

    fn get_cached_mounts(&self) -> Result<Vec<MountPoint>> {
        {
            let cache = self.mounts_cache.read();
            if let Some((mounts, collected_at)) = &*cache
                && collected_at.elapsed() < self.cache_ttl
            {
                return Ok(mounts.clone());
            }
        }

        let raw = fs::read_to_string("/proc/self/mounts").map_err(|source| ChurnError::Io {
            path: PathBuf::from("/proc/self/mounts"),
            source,
        })?;
        let mounts = parse_proc_mounts(&raw);
        if mounts.is_empty() {
            return Err(ChurnError::MountParse {
                details: "no usable entries in /proc/self/mounts".to_string(),
            });
        }

        *self.mounts_cache.write() = Some((mounts.clone(), Instant::now()));
        Ok(mounts)
    }
}

impl Platform for LinuxPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| ChurnError::CapacityProbe {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;

        // Mount metadata is descriptive only; a missing /proc must not fail the probe.
        let (fs_type, mount_point) = match self.mount_points() {
            Ok(mounts) => resolve_mount_label(path, &mounts),
            Err(_) => ("unknown".to_string(), PathBuf::from("/")),
        };

        #[allow(clippy::useless_conversion)]
        let block_size = u64::from(stat.fragment_size());
        #[allow(clippy::useless_conversion)]
        let (total_blocks, free_blocks, avail_blocks) = (
            u64::from(stat.blocks()),
            u64::from(stat.blocks_free()),
            u64::from(stat.blocks_available()),
        );
        #[allow(clippy::useless_conversion)]
        let (total_inodes, free_inodes) = (u64::from(stat.files()), u64::from(stat.files_available()));

        Ok(FsStats {
            total_bytes: total_blocks.saturating_mul(block_size),
            free_bytes: free_blocks.saturating_mul(block_size),
            available_bytes: avail_blocks.saturating_mul(block_size),
            total_blocks,
            free_blocks,
            total_inodes,
            free_inodes,
            block_size,
            fs_type,
            mount_point,
        })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        self.get_cached_mounts()
    }
}

/// In-memory mock implementation for deterministic tests.
///
/// Stats are keyed by mount point; `set_stats` swaps them at runtime so tests
/// can simulate free space shrinking under churn.
#[derive(Debug)]
pub struct MockPlatform {
    mounts: Vec<MountPoint>,
    stats_by_mount: RwLock<HashMap<PathBuf, FsStats>>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(mounts: Vec<MountPoint>, stats_by_mount: HashMap<PathBuf, FsStats>) -> Self {
        Self {
            mounts,
            stats_by_mount: RwLock::new(stats_by_mount),
        }
    }

    /// Single-mount mock rooted at `/` reporting the given free bytes.
    #[must_use]
    pub fn with_free_bytes(total_bytes: u64, free_bytes: u64) -> Self {
        let root = PathBuf::from("/");
        let stats = mock_stats(total_bytes, free_bytes);
        Self::new(
            vec![MountPoint {
                path: root.clone(),
                device: "mock".to_string(),
                fs_type: "mockfs".to_string(),
            }],
            HashMap::from([(root, stats)]),
        )
    }

    /// Replace the stats reported for a mount point.
    pub fn set_stats(&self, mount: impl Into<PathBuf>, stats: FsStats) {
        self.stats_by_mount.write().insert(mount.into(), stats);
    }
}

/// Build a plausible `FsStats` with 4 KiB blocks for tests and mocks.
#[must_use]
pub fn mock_stats(total_bytes: u64, free_bytes: u64) -> FsStats {
    let block_size = 4096;
    FsStats {
        total_bytes,
        free_bytes,
        available_bytes: free_bytes,
        total_blocks: total_bytes / block_size,
        free_blocks: free_bytes / block_size,
        total_inodes: 65_536,
        free_inodes: 60_000,
        block_size,
        fs_type: "mockfs".to_string(),
        mount_point: PathBuf::from("/"),
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mount = find_mount(path, &self.mounts).ok_or_else(|| ChurnError::CapacityProbe {
            path: path.to_path_buf(),
            details: "mock mount not found".to_string(),
        })?;
        self.stats_by_mount
            .read()
            .get(&mount.path)
            .cloned()
            .ok_or_else(|| ChurnError::CapacityProbe {
                path: mount.path.clone(),
                details: "mock stats not found".to_string(),
            })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        Ok(self.mounts.clone())
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(ChurnError::UnsupportedPlatform {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

fn resolve_mount_label(path: &Path, mounts: &[MountPoint]) -> (String, PathBuf) {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    find_mount(&absolute, mounts).map_or_else(
        || ("unknown".to_string(), PathBuf::from("/")),
        |mount| (mount.fs_type.clone(), mount.path.clone()),
    )
}

fn parse_proc_mounts(raw: &str) -> Vec<MountPoint> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            eprintln!("[DCH-PAL] warning: skipping malformed /proc/self/mounts line: {line}");
            continue;
        }
        mounts.push(MountPoint {
            path: unescape_mount_path(fields[1]),
            device: fields[0].to_string(),
            fs_type: fields[2].to_string(),
        });
    }
    mounts.sort_by(|left, right| {
        right
            .path
            .as_os_str()
            .len()
            .cmp(&left.path.as_os_str().len())
    });
    mounts
}

fn find_mount<'a>(path: &Path, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.path))
        .max_by_key(|mount| mount.path.as_os_str().len())
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel.
fn unescape_mount_path(raw: &str) -> PathBuf {
    let mut bytes = Vec::with_capacity(raw.len());
    let raw_bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\' && i + 3 < raw_bytes.len() {
            let a = raw_bytes[i + 1];
            let b = raw_bytes[i + 2];
            let c = raw_bytes[i + 3];
            if (b'0'..=b'7').contains(&a)
                && (b'0'..=b'7').contains(&b)
                && (b'0'..=b'7').contains(&c)
            {
                bytes.push((a - b'0') * 64 + (b - b'0') * 8 + (c - b'0'));
                i += 4;
                continue;
            }
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}
