//! Storage-pressure admission control.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::debug;

use fieldsync_common::{Error, Result};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Free-space floors, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageThresholds {
    /// Below this, new work is refused.
    pub hard_floor_bytes: u64,
    /// Below this, new work is accepted with an advisory.
    pub advisory_floor_bytes: u64,
}

impl StorageThresholds {
    /// Reject a hard floor above the advisory floor.
    pub fn validate(&self) -> Result<()> {
        if self.hard_floor_bytes > self.advisory_floor_bytes {
            return Err(Error::Config(format!(
                "hard_floor_bytes ({}) exceeds advisory_floor_bytes ({})",
                self.hard_floor_bytes, self.advisory_floor_bytes
            )));
        }
        Ok(())
    }
}

impl Default for StorageThresholds {
    fn default() -> Self {
        Self {
            hard_floor_bytes: 10 * MIB,
            advisory_floor_bytes: 50 * MIB,
        }
    }
}

/// Advisory attached to a storage check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageWarning {
    /// Below the hard floor; enqueue must be refused.
    CriticallyLow,
    /// Below the advisory floor; enqueue proceeds.
    GettingLow,
}

impl fmt::Display for StorageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageWarning::CriticallyLow => {
                write!(f, "Storage critically low, free up space before capturing more surveys")
            }
            StorageWarning::GettingLow => write!(f, "Storage getting low"),
        }
    }
}

/// Result of classifying free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCheck {
    /// Whether new work may be admitted.
    pub ok: bool,
    pub warning: Option<StorageWarning>,
    /// Free bytes the decision was made on.
    pub free_bytes: u64,
}

/// Classifies free space into admission decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageGuard {
    thresholds: StorageThresholds,
}

impl StorageGuard {
    pub fn new(thresholds: StorageThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &StorageThresholds {
        &self.thresholds
    }

    /// Classify `free_bytes` against both floors.
    pub fn check_storage_space(&self, free_bytes: u64) -> StorageCheck {
        let warning = if free_bytes < self.thresholds.hard_floor_bytes {
            Some(StorageWarning::CriticallyLow)
        } else if free_bytes < self.thresholds.advisory_floor_bytes {
            Some(StorageWarning::GettingLow)
        } else {
            None
        };

        StorageCheck {
            ok: warning != Some(StorageWarning::CriticallyLow),
            warning,
            free_bytes,
        }
    }
}

/// Source of the device's current free space.
#[async_trait]
pub trait FreeSpaceProbe: Send + Sync {
    async fn free_bytes(&self) -> Result<u64>;
}

/// Probe that always reports the same figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedFreeSpace(pub u64);

#[async_trait]
impl FreeSpaceProbe for FixedFreeSpace {
    async fn free_bytes(&self) -> Result<u64> {
        Ok(self.0)
    }
}

/// Probe reading the disk that holds a data directory.
#[derive(Debug, Clone)]
pub struct DiskFreeSpace {
    path: PathBuf,
}

impl DiskFreeSpace {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl FreeSpaceProbe for DiskFreeSpace {
    async fn free_bytes(&self) -> Result<u64> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || available_space_for(&path))
            .await
            .map_err(|e| Error::Store(format!("free space probe failed: {}", e)))?
    }
}

/// Free bytes on the disk whose mount point is the longest prefix of `path`.
fn available_space_for(path: &Path) -> Result<u64> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let disk = disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .ok_or_else(|| {
            Error::NotFound(format!("no mounted disk contains {}", path.display()))
        })?;

    debug!(
        "Disk {} has {} bytes available",
        disk.mount_point().display(),
        disk.available_space()
    );
    Ok(disk.available_space())
}
